//! Event consumer.
//!
//! Declares a server-named auto-delete queue, binds it to the group exchange
//! once per requested routing key, and drains deliveries on a background
//! task with `no_ack = true` — the broker considers a message delivered the
//! moment it is sent, and nothing here acknowledges anything.
//!
//! Each delivery body is decoded as a gateway envelope and surfaced as
//! `(routing key, Packet)` with `raw` holding the body byte-exact, so the
//! embedder can inject it straight into a shard's socket.

use bytes::Bytes;
use futures_util::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
};
use shardcast_gateway::Packet;
use tokio::{sync::mpsc, task::AbortHandle};

use crate::{endpoint::Endpoint, error::BrokerError};

/// Depth of the delivery event channel.
const CHANNEL_DEPTH: usize = 64;

/// Events surfaced by the consumer's delivery loop.
#[derive(Debug)]
pub enum ConsumerEvent {
    /// A message arrived on one of the bound routing keys.
    Delivery {
        /// The binding that matched.
        routing_key: String,
        /// The decoded message.
        packet: Packet,
    },
    /// The delivery stream failed; the loop has stopped.
    Error(BrokerError),
    /// The delivery stream ended (channel or connection closed).
    Closed,
}

/// Auto-acked consumer bound to a set of routing keys.
pub struct Consumer {
    endpoint: Endpoint,
    loop_handle: AbortHandle,
}

impl Consumer {
    /// Connect, declare the queue, bind every routing key, start consuming.
    ///
    /// Returns the consumer handle and the delivery event stream. Dropping
    /// the receiver stops the loop.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Amqp`] tagged with the failing step (`"Declaring
    /// queue"`, `"Binding queue"`, `"Consuming"`, or a handshake step).
    pub async fn connect(
        host: &str,
        port: u16,
        exchange: &str,
        events: &[String],
    ) -> Result<(Self, mpsc::Receiver<ConsumerEvent>), BrokerError> {
        let endpoint = Endpoint::connect(host, port, exchange).await?;

        let queue = endpoint
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions { auto_delete: true, ..QueueDeclareOptions::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|error| BrokerError::amqp("Declaring queue", error))?;

        for event in events {
            endpoint
                .channel
                .queue_bind(
                    queue.name().as_str(),
                    exchange,
                    event,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|error| BrokerError::amqp("Binding queue", error))?;
        }

        // One consume covers every binding on the queue.
        let deliveries = endpoint
            .channel
            .basic_consume(
                queue.name().as_str(),
                "",
                BasicConsumeOptions { no_ack: true, ..BasicConsumeOptions::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|error| BrokerError::amqp("Consuming", error))?;

        tracing::debug!(
            exchange,
            queue = %queue.name(),
            bindings = events.len(),
            "consumer attached"
        );

        let (event_tx, event_rx) = mpsc::channel(CHANNEL_DEPTH);
        let task = tokio::spawn(run(deliveries, event_tx));

        Ok((Self { endpoint, loop_handle: task.abort_handle() }, event_rx))
    }

    /// Graceful teardown: stop the loop, close channel and connection.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Amqp`] tagged `"Closing channel"` or `"Closing
    /// connection"`.
    pub async fn close(self) -> Result<(), BrokerError> {
        self.loop_handle.abort();
        self.endpoint.close().await
    }
}

/// Delivery loop. Runs until the stream ends, the stream fails, or the
/// receiver goes away.
async fn run(mut deliveries: lapin::Consumer, events: mpsc::Sender<ConsumerEvent>) {
    while let Some(delivery) = deliveries.next().await {
        match delivery {
            Ok(delivery) => {
                let routing_key = delivery.routing_key.to_string();

                match Packet::from_wire(Bytes::from(delivery.data)) {
                    Ok(packet) => {
                        if events
                            .send(ConsumerEvent::Delivery { routing_key, packet })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    },
                    Err(error) => {
                        // Codec failures stay local; the delivery is gone
                        // (auto-ack) and the loop keeps running.
                        tracing::warn!(%error, %routing_key, "dropping undecodable delivery");
                    },
                }
            },
            Err(error) => {
                let _ = events
                    .send(ConsumerEvent::Error(BrokerError::amqp("Consuming", error)))
                    .await;
                return;
            },
        }
    }

    let _ = events.send(ConsumerEvent::Closed).await;
}
