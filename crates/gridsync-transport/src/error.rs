use std::io;

/// Errors raised by a transport or one of its connections.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener could not be bound.
    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Accepting a TCP connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    /// The protocol upgrade was refused or broke off.
    #[error("handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    /// The peer announced or sent a frame larger than the configured limit.
    /// Raised before the payload is buffered whenever the header carries the
    /// length.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_frame_too_large_names_both_sizes() {
        let err = TransportError::FrameTooLarge { size: 300, max: 256 };
        assert_eq!(err.to_string(), "frame of 300 bytes exceeds limit of 256");
    }

    #[test]
    fn test_display_bind_names_address() {
        let err = TransportError::Bind {
            addr: "127.0.0.1:1".into(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().starts_with("bind to 127.0.0.1:1 failed"));
    }
}
