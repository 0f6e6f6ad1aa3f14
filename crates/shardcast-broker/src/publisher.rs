//! Event publisher.
//!
//! Forwards gateway dispatches into the group exchange, one routing key per
//! event name. Only dispatches (`op == 0`) are eligible, and a non-empty
//! event filter whitelists which of them leave the process. The body is the
//! ETF-encoded event payload alone — subscribers get `d`, not the envelope.

use std::collections::HashSet;

use lapin::{BasicProperties, options::BasicPublishOptions};
use shardcast_etf::encode;
use shardcast_gateway::Packet;

use crate::{endpoint::Endpoint, error::BrokerError};

/// Filtered publisher over a durable direct exchange.
pub struct Publisher {
    endpoint: Endpoint,
    exchange: String,
    events: HashSet<String>,
}

impl Publisher {
    /// Connect and declare the exchange.
    ///
    /// `events` is the publish filter: empty means everything, otherwise
    /// only listed event names are published.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Amqp`] tagged with the failing handshake step.
    pub async fn connect(
        host: &str,
        port: u16,
        exchange: impl Into<String>,
        events: HashSet<String>,
    ) -> Result<Self, BrokerError> {
        let exchange = exchange.into();
        let endpoint = Endpoint::connect(host, port, &exchange).await?;

        tracing::debug!(exchange, filter = events.len(), "publisher connected");
        Ok(Self { endpoint, exchange, events })
    }

    /// Publish a packet's payload under its event name.
    ///
    /// Silently discards anything that is not a dispatch or does not pass
    /// the filter.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::Encode`] if the payload cannot be serialized
    /// - [`BrokerError::Amqp`] tagged `"Publishing"` on a broker failure
    pub async fn publish(&self, packet: &Packet) -> Result<(), BrokerError> {
        if !should_publish(&self.events, packet) {
            return Ok(());
        }

        let body = encode(&packet.d)?;

        // Confirms are not enabled on this channel, so the returned
        // PublisherConfirm is inert; only the send itself can fail.
        let _confirm = self
            .endpoint
            .channel
            .basic_publish(
                &self.exchange,
                &packet.t,
                BasicPublishOptions { mandatory: false, immediate: false },
                &body,
                BasicProperties::default(),
            )
            .await
            .map_err(|error| BrokerError::amqp("Publishing", error))?;

        tracing::trace!(event = %packet.t, bytes = body.len(), "published dispatch");
        Ok(())
    }

    /// Graceful teardown of channel and connection.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Amqp`] tagged `"Closing channel"` or `"Closing
    /// connection"`.
    pub async fn close(self) -> Result<(), BrokerError> {
        self.endpoint.close().await
    }
}

/// The publish decision: dispatches only, filtered by event name.
fn should_publish(events: &HashSet<String>, packet: &Packet) -> bool {
    if packet.op != 0 {
        return false;
    }

    events.is_empty() || events.contains(&packet.t)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use shardcast_etf::Term;

    use super::*;

    fn dispatch(event: &str) -> Packet {
        Packet {
            op: 0,
            s: 1,
            t: event.to_owned(),
            d: Term::map([(Term::from("id"), Term::from("123"))]),
            raw: Bytes::new(),
        }
    }

    fn filter(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    #[test]
    fn non_dispatch_packets_never_publish() {
        let heartbeat_ack =
            Packet { op: 11, s: -1, t: String::new(), d: Term::Null, raw: Bytes::new() };
        assert!(!should_publish(&HashSet::new(), &heartbeat_ack));
    }

    #[test]
    fn filter_drops_unlisted_events() {
        let events = filter(&["A", "B"]);
        assert!(!should_publish(&events, &dispatch("C")));
        assert!(should_publish(&events, &dispatch("A")));
    }

    #[test]
    fn empty_filter_passes_everything() {
        assert!(should_publish(&HashSet::new(), &dispatch("ANYTHING")));
    }

    #[test]
    fn body_is_the_payload_not_the_envelope() {
        let packet = dispatch("MESSAGE_CREATE");
        let body = encode(&packet.d).unwrap();

        let term = shardcast_etf::decode(&body).unwrap();
        assert_eq!(term.get_str("id"), Some(&Term::from("123")));
        assert_eq!(term.get_str("op"), None);
    }
}
