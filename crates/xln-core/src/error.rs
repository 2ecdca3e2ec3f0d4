/// Core protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid quorum: {0}")]
    InvalidQuorum(String),

    #[error("unknown hash type: {0}")]
    UnknownHashType(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("decode error: {0}")]
    Decode(String),
}
