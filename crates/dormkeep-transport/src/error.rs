use std::time::Duration;

/// Errors raised while accepting or talking to a client connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer went away mid-operation.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding the listener or taking a socket off it failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The peer connected but its protocol handshake was malformed.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(#[source] std::io::Error),

    /// The peer connected but didn't finish its handshake in time.
    #[error("upgrade not completed within {0:?}")]
    UpgradeTimedOut(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_source_is_preserved() {
        use std::error::Error;

        let err = TransportError::SendFailed(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "peer gone",
        ));
        assert_eq!(err.to_string(), "send failed: peer gone");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_upgrade_timeout_names_the_limit() {
        let err = TransportError::UpgradeTimedOut(Duration::from_millis(250));
        assert_eq!(err.to_string(), "upgrade not completed within 250ms");
    }
}
