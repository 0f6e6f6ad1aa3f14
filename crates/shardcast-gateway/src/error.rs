//! Gateway error types.
//!
//! Codec failures stay local to the frame that caused them (the session skips
//! the frame and keeps running); transport failures feed the reconnect
//! policy. Both surface to the embedder through the shard event stream.

use thiserror::Error;

/// Errors produced by the session and shard layers.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Inbound frame was not valid ETF.
    #[error("failed to decode gateway frame: {0}")]
    Decode(#[from] shardcast_etf::DecodeError),

    /// Outbound payload could not be serialized.
    #[error("failed to encode gateway frame: {0}")]
    Encode(#[from] shardcast_etf::EncodeError),

    /// Frame decoded but lacks a field the protocol requires.
    #[error("gateway frame is missing required field `{field}`")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },

    /// Underlying WebSocket failure.
    #[error("websocket transport error: {0}")]
    Transport(String),

    /// The shard task is gone; no further commands can be delivered.
    #[error("shard task has shut down")]
    ShardClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_convert() {
        let error: GatewayError = shardcast_etf::DecodeError::BadVersion(0).into();
        assert!(matches!(error, GatewayError::Decode(_)));
    }
}
