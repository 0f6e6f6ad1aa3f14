//! Broker bridge.
//!
//! Typed publish/consume over AMQP 0-9-1 with a direct exchange. Event names
//! map to routing keys on the publish side; shard ids map to routing keys on
//! the consume side.
//!
//! # Components
//!
//! - [`Publisher`]: filtered publish of dispatch payloads
//! - [`Consumer`]: server-named auto-delete queue, auto-acked delivery loop
//! - [`BrokerError`]: AMQP failures tagged with the step that produced them

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod consumer;
mod endpoint;
mod error;
mod publisher;

pub use consumer::{Consumer, ConsumerEvent};
pub use error::BrokerError;
pub use publisher::Publisher;
