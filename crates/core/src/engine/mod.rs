//! The orchestration runtime: dependency resolution, wave scheduling,
//! remote process execution and recipe-level sequencing.

pub mod client;
pub mod dag;
pub mod registry;
pub mod resolver;
pub mod runner;

pub use client::{NodeExecutor, ProcessClient, ProcessClientConfig};
pub use dag::{DagEngine, StageResults};
pub use registry::CallbackRegistry;
pub use runner::RecipeRunner;
