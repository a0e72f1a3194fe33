//! Engine error types.

use fabsync_client::ApiError;
use thiserror::Error;

/// Errors produced by deployment pipelines and lifecycle managers.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any controller call.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The reachability test rejected the switch.
    #[error("switch {target} is not reachable or not selectable: {reason}")]
    Unreachable { target: String, reason: String },

    /// One entry of a batched attachment response reported failure. The
    /// resource stays configured so a later apply can retry attachment alone.
    #[error("attachment failed for {target}: {message}")]
    Attach { target: String, message: String },

    /// A pipeline step failed; the remaining steps were not run.
    #[error("deployment step '{step}' failed for {resource}: {source}")]
    Step {
        step: &'static str,
        resource: String,
        #[source]
        source: ApiError,
    },

    /// A detach/delete convergence poll exhausted its budget.
    #[error("deployment timeout occurred for {resource}")]
    DeployTimeout { resource: String },

    /// A final convergence check reported a non-deployable state.
    #[error("{resource} failed to converge: {detail}")]
    Diverged { resource: String, detail: String },

    /// Transport or controller error outside a named step.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
