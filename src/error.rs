use thiserror::Error;

/// Malformed hex or wrongly sized input handed to a codec helper
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid hex data: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {expected} hex characters, got {actual}")]
    HexLength { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("key must be 32 bytes for AES-256, got {0}")]
    KeyLength(usize),

    #[error("ciphertext length {0} is not a multiple of the 16-byte block size")]
    BlockLength(usize),

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Failure reported by a key-management backend
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("failed to run key-management command: {0}")]
    Io(#[from] std::io::Error),

    #[error("key-management decrypt failed: {0}")]
    Rejected(String),

    #[error("key-management returned malformed plaintext: {0}")]
    Decode(#[from] data_encoding::DecodeError),
}

/// Terminal failure of one handshake attempt.
///
/// `Display` yields the fixed message shown to the operator; several protocol
/// variants intentionally share the same text and differ only in `code()`.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("E14 - Serial Port Error: {0}")]
    SerialOpen(String),

    #[error("E14 - Serial Port Error: {0}")]
    SerialRead(String),

    #[error("E31 - No Data Received during Handshake")]
    Timeout,

    #[error("E52-Invalid Data Received")]
    CrcMismatch,

    #[error("E52-Invalid Data Received")]
    InvalidData,

    #[error("E52-Invalid Data Received")]
    KeyUnavailable,

    #[error("Invalid HEX stream")]
    InvalidHex,

    #[error("Handshake worker stopped before reporting a result")]
    WorkerLost,
}

impl HandshakeError {
    /// Taxonomy name of the failure, stable across message changes
    pub fn code(&self) -> &'static str {
        match self {
            HandshakeError::SerialOpen(_) => "SerialOpenError",
            HandshakeError::SerialRead(_) => "SerialReadError",
            HandshakeError::Timeout => "HandshakeTimeout",
            HandshakeError::CrcMismatch => "CrcMismatch",
            HandshakeError::InvalidData => "InvalidData",
            HandshakeError::KeyUnavailable => "KeyUnavailable",
            HandshakeError::InvalidHex => "InvalidHex",
            HandshakeError::WorkerLost => "WorkerLost",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_messages() {
        assert_eq!(
            HandshakeError::SerialOpen("No such file or directory".into()).to_string(),
            "E14 - Serial Port Error: No such file or directory"
        );
        assert_eq!(
            HandshakeError::Timeout.to_string(),
            "E31 - No Data Received during Handshake"
        );
        assert_eq!(HandshakeError::CrcMismatch.to_string(), "E52-Invalid Data Received");
        assert_eq!(HandshakeError::InvalidData.to_string(), "E52-Invalid Data Received");
        assert_eq!(HandshakeError::InvalidHex.to_string(), "Invalid HEX stream");
    }

    #[test]
    fn test_codes_distinguish_shared_messages() {
        assert_eq!(HandshakeError::CrcMismatch.code(), "CrcMismatch");
        assert_eq!(HandshakeError::InvalidData.code(), "InvalidData");
        assert_eq!(HandshakeError::KeyUnavailable.code(), "KeyUnavailable");
    }

    #[test]
    fn test_worker_lost_is_not_a_serial_error() {
        let err = HandshakeError::WorkerLost;
        assert_eq!(err.code(), "WorkerLost");
        assert!(!err.to_string().starts_with("E14"));
    }
}
