//! Broker error types.
//!
//! Every AMQP failure carries the handshake or runtime step it happened in,
//! so operators can tell a refused login from a failed bind at a glance. The
//! daemon keys its retry policy off [`BrokerError::is_socket_error`]: socket
//! failures are retried, protocol replies are fatal.

use thiserror::Error;

/// Errors produced by the publisher and consumer.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Underlying AMQP failure, tagged with the step that produced it.
    #[error("{context}: {source}")]
    Amqp {
        /// Short human label for the step ("Logging in", "Binding queue", …).
        context: &'static str,
        /// The library error.
        #[source]
        source: lapin::Error,
    },

    /// Publish payload could not be serialized.
    #[error("failed to encode publish payload: {0}")]
    Encode(#[from] shardcast_etf::EncodeError),
}

impl BrokerError {
    /// Tag a lapin error with its step context.
    #[must_use]
    pub fn amqp(context: &'static str, source: lapin::Error) -> Self {
        Self::Amqp { context, source }
    }

    /// Whether this is a TCP-level failure worth retrying (as opposed to a
    /// protocol reply, which will not improve on its own).
    #[must_use]
    pub fn is_socket_error(&self) -> bool {
        matches!(self, Self::Amqp { source: lapin::Error::IOError(_), .. })
    }

    /// The step this error occurred in, when it is an AMQP error.
    #[must_use]
    pub fn context(&self) -> Option<&'static str> {
        match self {
            Self::Amqp { context, .. } => Some(context),
            Self::Encode(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_errors_are_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = BrokerError::amqp("opening TCP socket", lapin::Error::IOError(io.into()));
        assert!(error.is_socket_error());
        assert_eq!(error.context(), Some("opening TCP socket"));
    }

    #[test]
    fn protocol_errors_are_not() {
        let error = BrokerError::amqp("Logging in", lapin::Error::InvalidConnectionState(
            lapin::ConnectionState::Closed,
        ));
        assert!(!error.is_socket_error());
    }
}
