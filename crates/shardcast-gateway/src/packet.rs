//! Gateway packet envelope.
//!
//! Every inbound frame — from the socket or from a broker delivery — becomes
//! a [`Packet`]: the decoded envelope fields plus the untouched wire bytes.
//! Keeping `raw` byte-exact lets a packet be re-sent to a sibling shard
//! without a decode/encode round trip.

use bytes::Bytes;
use shardcast_etf::{Term, decode};

use crate::error::GatewayError;

/// A decoded gateway frame.
///
/// # Invariants
///
/// - `s` and `t` carry data only when `op == 0`; otherwise they hold their
///   absent sentinels (`-1` and the empty string).
/// - `raw` is byte-exact with the frame this packet was built from.
///
/// Packets are value-semantic; `raw` clones are reference-counted and cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Gateway opcode.
    pub op: i32,
    /// Dispatch sequence number; `-1` when absent.
    pub s: i32,
    /// Dispatch event name; empty when absent.
    pub t: String,
    /// Event payload.
    pub d: Term,
    /// The exact frame as received.
    pub raw: Bytes,
}

impl Packet {
    /// Decode a wire frame into a packet.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Decode`] if the frame is not valid ETF
    /// - [`GatewayError::MissingField`] if the envelope has no integer `op`
    pub fn from_wire(raw: Bytes) -> Result<Self, GatewayError> {
        let envelope = decode(&raw)?;

        let op = envelope
            .get_str("op")
            .and_then(Term::as_i64)
            .ok_or(GatewayError::MissingField { field: "op" })? as i32;

        let d = envelope.get_str("d").cloned().unwrap_or(Term::Undefined);

        let mut packet = Self { op, s: -1, t: String::new(), d, raw };
        if op == 0 {
            packet.s =
                envelope.get_str("s").and_then(Term::as_i64).map_or(-1, |seq| seq as i32);
            packet.t = envelope
                .get_str("t")
                .and_then(Term::as_str)
                .unwrap_or_default()
                .to_owned();
        }

        Ok(packet)
    }
}
