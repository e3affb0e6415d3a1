use thiserror::Error;

use crate::codec::CodecError;

/// Crate-wide error type for configuration, session, and store failures.
#[derive(Debug, Error)]
pub enum FixError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("store i/o error: {0}")]
    Store(#[from] std::io::Error),

    #[error("channel closed")]
    ChannelClosed,

    #[error("session is not logged on")]
    NotLoggedOn,

    #[error("session already terminated")]
    AlreadyTerminated,
}

pub type Result<T> = std::result::Result<T, FixError>;
