// Core orchestration runtime for the Simmer recipe engine

pub mod engine;
pub mod error;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use types::*;
