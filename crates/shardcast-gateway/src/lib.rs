//! Gateway client.
//!
//! One authenticated realtime session per shard, carried over a WebSocket
//! speaking ETF frames.
//!
//! # Architecture
//!
//! The protocol logic is Sans-IO: [`Session`] receives frames, heartbeat
//! ticks and close codes, and returns [`SessionAction`]s for the driver to
//! execute. [`Shard`] is the production driver — a single tokio task that
//! owns the socket, the heartbeat timer and the session, so every state
//! mutation is serialized on one task.
//!
//! # Components
//!
//! - [`Packet`]: decoded envelope plus the byte-exact wire frame
//! - [`Session`]: identify/resume/heartbeat/reconnect state machine
//! - [`Shard`] / [`ShardEvent`]: WebSocket driver and its event stream

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod packet;
mod session;
mod shard;

pub use error::GatewayError;
pub use packet::Packet;
pub use session::{
    CloseOutcome, MAX_RECONNECT_TRIES, Opcode, Session, SessionAction, SessionOptions, close_code,
};
pub use shard::{GATEWAY_URL, Shard, ShardEvent};
