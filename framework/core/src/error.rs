use thiserror::Error;

/// Runtime error taxonomy for the load-test core.
///
/// Extraction misses are deliberately absent: a miss binds the rule's default value instead of
/// raising, so it never appears on an error path.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No resolution tier produced a binding for the key and the call site supplied no default.
    /// Fatal to the current request only; the virtual user moves on to its next iteration.
    #[error("No binding found for variable '{key}' in any scope")]
    UnresolvedVariable { key: String },

    /// A dataset ran out of rows under a policy that does not recycle.
    #[error("Dataset '{dataset}' is exhausted")]
    DatasetExhausted { dataset: String },

    /// The transport layer failed to deliver the request or receive a response.
    /// Recorded as a failed check; the virtual user continues.
    #[error("Transport failure for transaction '{transaction}': {message}")]
    TransportFailure {
        transaction: String,
        message: String,
    },

    /// A scenario-state delta referenced a scenario this worker does not know about.
    /// Logged and dropped, never fatal to the worker.
    #[error("Delta for unknown scenario '{scenario}'")]
    BroadcastApplyConflict { scenario: String },
}
