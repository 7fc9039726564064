use shared::{CodecError, ErrorCode, WorldError};
use std::io;
use thiserror::Error;

/// Failures of the server process itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("could not parse configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("world snapshot failed: {0}")]
    World(#[from] WorldError),
}

/// A rejected client input. Always fatal to the offending connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {detail}")]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub detail: String,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    /// A packet arrived that the connection's current state does not accept.
    pub fn unexpected(packet: &str, state: impl std::fmt::Debug) -> Self {
        Self::new(
            ErrorCode::NotExpected,
            format!("{} not expected while {:?}", packet, state),
        )
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
