//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("invalid magic token: {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("too many payload buffers: {0} (max {max})", max = crate::MAX_PACKET_BUFFERS)]
    TooManyBuffers(u32),

    #[error("payload buffer too large: {size} bytes (max {max})")]
    BufferTooLarge { size: u32, max: u32 },

    #[error("frame header too short: {got} bytes (need {need})", need = crate::HEADER_SIZE)]
    HeaderTooShort { got: usize },

    #[error("buffer count mismatch: header declares {declared}, got {got}")]
    BufferCountMismatch { declared: u32, got: u32 },

    #[error("invalid connect status code: {0}")]
    InvalidStatusCode(i32),

    #[error("invalid connect type: {0}")]
    InvalidConnectType(u16),

    #[error("invalid HA state: {0}")]
    InvalidHaState(i32),

    #[error("reply payload too short: {got} bytes (need {need})")]
    PayloadTooShort { got: usize, need: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::InvalidPacketType(9);
        assert!(err.to_string().contains('9'));

        let err = ProtocolError::TooManyBuffers(6);
        assert!(err.to_string().contains("max 5"));

        let err = ProtocolError::HeaderTooShort { got: 12 };
        assert!(err.to_string().contains("40"));

        let err = ProtocolError::InvalidMagic(*b"XXXX");
        assert!(err.to_string().contains("magic"));
    }
}
