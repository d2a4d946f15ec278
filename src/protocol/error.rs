use thiserror::Error;

/// Protocol-level error type for MD3.
///
/// Variants split along the link rules: structural/codec failures mean the
/// message is dropped without a response, while semantic failures in a
/// structurally valid message are answered with a reject.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Block or message has invalid structure (size, flags, ordering).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// Block checksum does not match its payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// Message exceeds the block budget without an end-of-message flag.
    #[error("unterminated message: {0} blocks without end-of-message flag")]
    Unterminated(usize),
    /// Underlying IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
