use crate::protocol::error::ProtocolError;
use thiserror::Error;

/// Crate-level error for the outstation driver.
///
/// Protocol-layer failures keep their own `ProtocolError` domain; this type
/// covers everything above the wire: configuration validation, port
/// construction and runtime plumbing.
#[derive(Debug, Error)]
pub enum OutstationError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("initialization error: {0}")]
    Initialization(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type OutstationResult<T> = Result<T, OutstationError>;
