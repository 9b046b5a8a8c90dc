pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("amount must be greater than 0")]
    InvalidAmount,
    #[error("amount accumulation overflowed")]
    AmountOverflow,
    #[error("request is not in pending state")]
    InvalidState,
    #[error("workflow name already exists")]
    WorkflowNameExists,
    #[error("workflow name must not be empty")]
    EmptyWorkflowName,
    #[error("step level must be at least 1")]
    InvalidLevel,
    #[error("a step already exists at level {0}")]
    LevelOccupied(u32),
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
    #[error("failed to decode stored record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// True for the absence class of failures (workflow, step or request).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
