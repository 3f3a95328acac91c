//! Unified error type for gridsync.

use gridsync_board::BoardError;
use gridsync_protocol::ProtocolError;
use gridsync_session::SessionError;
use gridsync_transport::TransportError;

/// Top-level error that wraps every layer's errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum GridsyncError {
    /// Connection, send, or receive failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding, decoding, or compression failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Invalid initial layout or a refused bulk mutation.
    #[error(transparent)]
    Board(#[from] BoardError),

    /// Connection admission or limiter failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Filesystem failure, e.g. opening the action log.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::FrameTooLarge { size: 512, max: 256 };
        let err: GridsyncError = err.into();
        assert!(matches!(err, GridsyncError::Transport(_)));
        assert!(err.to_string().contains("512"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let err: GridsyncError = err.into();
        assert!(matches!(err, GridsyncError::Protocol(_)));
    }

    #[test]
    fn test_from_board_error() {
        let err: GridsyncError = BoardError::NothingAffected.into();
        assert!(matches!(err, GridsyncError::Board(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err: GridsyncError = SessionError::Cancelled.into();
        assert!(matches!(err, GridsyncError::Session(_)));
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: GridsyncError = err.into();
        assert!(err.to_string().contains("missing"));
    }
}
