//! Error taxonomy for the orchestration runtime.
//!
//! All errors are fatal to the enclosing run; there is no retry inside the
//! core. The serving layer translates these into user-visible responses.

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An input value started with `:` but did not match the
    /// `:nodeId.outputs.outputName` reference pattern.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// A referenced node has no results entry. Indicates a scheduling
    /// invariant violation when raised from within the DAG engine.
    #[error("dependency '{0}' not resolved")]
    UnresolvedDependency(String),

    /// The stage graph contains a cycle or a reference to a node that does
    /// not exist in the stage.
    #[error("cycle detected or unresolved dependency: {0}")]
    CycleOrUnresolvedDependency(String),

    /// A synchronous execution call returned a non-success status.
    #[error("remote execution failed with status {status}: {body}")]
    RemoteExecution { status: u16, body: String },

    /// An asynchronous execution call returned something other than 202.
    #[error("expected 202 Accepted, got {0}")]
    UnexpectedStatus(u16),

    /// An asynchronous execution response carried no `Location` header.
    #[error("missing Location header on async execution response")]
    MissingLocation,

    /// The remote job settled in a failed or cancelled state, or its
    /// completion callback delivered a failure payload.
    #[error("job '{job_id}' failed: {detail}")]
    JobFailed { job_id: String, detail: String },

    /// No completion signal arrived for the job within the deadline.
    #[error("job '{job_id}' timed out after {timeout_ms} ms")]
    JobTimeout { job_id: String, timeout_ms: u64 },

    /// A `$`/`!` placeholder named a variable with no binding.
    #[error("variable '{name}' not found for substitution in node '{node_id}'")]
    VariableNotFound { name: String, node_id: String },

    /// The remote service answered with a body the client could not parse.
    #[error("malformed remote response: {0}")]
    MalformedResponse(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node task panicked or was aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}
