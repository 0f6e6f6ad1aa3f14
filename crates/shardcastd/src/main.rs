//! Shard fleet daemon.
//!
//! Runs one gateway session per shard, publishes their dispatches into the
//! publisher exchange, and injects packets consumed from the consumer
//! exchange back into the owning shard's socket.
//!
//! # Usage
//!
//! Every flag doubles as an environment variable, which is how container
//! deployments configure it:
//!
//! ```bash
//! # Fan out four shards in one process
//! HOST=rabbit PORT=5672 PUBLISHER_GROUP=gateway CONSUMER_GROUP=gateway-send \
//! EVENTS=MESSAGE_CREATE,GUILD_CREATE TOKEN=... SHARDS=4 shardcastd
//!
//! # Run a single shard of a larger fleet
//! HOST=rabbit PORT=5672 PUBLISHER_GROUP=gateway CONSUMER_GROUP=gateway-send \
//! TOKEN=... SHARD_ID=2 SHARD_COUNT=16 shardcastd
//! ```
//!
//! Exit code 1 signals an unrecoverable broker error; socket-level failures
//! are retried forever on a 5 second cadence.

use std::{
    collections::{HashMap, HashSet},
    process,
    time::Duration,
};

use clap::Parser;
use shardcast_broker::{Consumer, ConsumerEvent, Publisher};
use shardcast_gateway::{SessionOptions, Shard, ShardEvent};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Delay between broker connection attempts after a socket failure.
const BROKER_RETRY: Duration = Duration::from_secs(5);

/// Pause between shard launches; spaces out identifies so the gateway's
/// identify throttle is never tripped.
const IDENTIFY_STAGGER: Duration = Duration::from_secs(6);

/// Gateway-to-broker shard bridge
#[derive(Parser, Debug)]
#[command(name = "shardcastd")]
#[command(about = "Bridges gateway shards to an AMQP broker")]
#[command(version)]
struct Args {
    /// Broker hostname
    #[arg(long, env = "HOST")]
    host: String,

    /// Broker port
    #[arg(long, env = "PORT", default_value = "5672")]
    port: u16,

    /// Exchange that inbound gateway events are published to
    #[arg(long, env = "PUBLISHER_GROUP")]
    publisher_group: String,

    /// Exchange that outbound packets are consumed from
    #[arg(long, env = "CONSUMER_GROUP")]
    consumer_group: String,

    /// Comma-separated event names to publish; empty publishes everything
    #[arg(long, env = "EVENTS", value_delimiter = ',')]
    events: Vec<String>,

    /// Bot token
    #[arg(long, env = "TOKEN")]
    token: String,

    /// Fan out this many shards in one process
    #[arg(long, env = "SHARDS", conflicts_with_all = ["shard_id", "shard_count"])]
    shards: Option<i32>,

    /// Shard index (single-shard mode, with --shard-count)
    #[arg(long, env = "SHARD_ID", requires = "shard_count")]
    shard_id: Option<i32>,

    /// Total shard count (single-shard mode, with --shard-id)
    #[arg(long, env = "SHARD_COUNT", requires = "shard_id")]
    shard_count: Option<i32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let (shard_ids, shard_count) = match (args.shards, args.shard_id, args.shard_count) {
        (Some(count), _, _) => ((0..count).collect::<Vec<_>>(), count),
        (None, Some(id), Some(count)) => (vec![id], count),
        _ => {
            tracing::error!("Either SHARDS or SHARD_ID and SHARD_COUNT must be set");
            process::exit(1);
        },
    };

    let publisher_events: HashSet<String> =
        args.events.iter().filter(|name| !name.is_empty()).cloned().collect();

    tracing::info!(
        shards = shard_ids.len(),
        shard_count,
        events = publisher_events.len(),
        "Daemon starting"
    );

    // Launch the shards, each with its own publisher, staggered to respect
    // the identify throttle.
    let mut fleet: HashMap<i32, Shard> = HashMap::new();
    for (ordinal, &shard_id) in shard_ids.iter().enumerate() {
        if ordinal > 0 {
            tokio::time::sleep(IDENTIFY_STAGGER).await;
        }

        let publisher = connect_publisher(&args, shard_id, publisher_events.clone()).await;

        let options = SessionOptions::new(args.token.clone(), shard_id, shard_count);
        let (shard, events) = Shard::connect(options);
        tokio::spawn(pump_shard(shard_id, events, publisher));

        fleet.insert(shard_id, shard);
        tracing::info!(shard_id, "Shard launched");
    }

    // The consumer feeds broker messages back into the owning shard. Each
    // shard listens on its own id as the routing key.
    let routing_keys: Vec<String> = shard_ids.iter().map(ToString::to_string).collect();

    loop {
        let (consumer, events) = connect_consumer(&args, &routing_keys).await;

        route_deliveries(events, &fleet).await;

        // Delivery loop ended on a socket-level failure or a closed channel;
        // tear down and come back.
        let _ = consumer.close().await;
        tracing::warn!("Consumer stopped, reconnecting in 5 seconds");
        tokio::time::sleep(BROKER_RETRY).await;
    }
}

/// Connect a shard's publisher, retrying socket failures forever.
async fn connect_publisher(args: &Args, shard_id: i32, events: HashSet<String>) -> Publisher {
    loop {
        match Publisher::connect(&args.host, args.port, &args.publisher_group, events.clone())
            .await
        {
            Ok(publisher) => return publisher,
            Err(error) if error.is_socket_error() => {
                tracing::warn!(
                    shard_id,
                    "Failed to connect to broker socket, retrying in 5 seconds"
                );
                tokio::time::sleep(BROKER_RETRY).await;
            },
            Err(error) => {
                tracing::error!(shard_id, %error, "Unrecoverable publisher error");
                process::exit(1);
            },
        }
    }
}

/// Connect the consumer, retrying socket failures forever.
async fn connect_consumer(
    args: &Args,
    routing_keys: &[String],
) -> (Consumer, mpsc::Receiver<ConsumerEvent>) {
    loop {
        match Consumer::connect(&args.host, args.port, &args.consumer_group, routing_keys).await
        {
            Ok(pair) => return pair,
            Err(error) if error.is_socket_error() => {
                tracing::warn!("Consumer failed to connect to broker socket, retrying in 5 seconds");
                tokio::time::sleep(BROKER_RETRY).await;
            },
            Err(error) => {
                tracing::error!(%error, "Unrecoverable consumer error");
                process::exit(1);
            },
        }
    }
}

/// Forward one shard's gateway events into its publisher.
async fn pump_shard(
    shard_id: i32,
    mut events: mpsc::Receiver<ShardEvent>,
    publisher: Publisher,
) {
    while let Some(event) = events.recv().await {
        match event {
            ShardEvent::Connected => tracing::info!(shard_id, "Connected"),
            ShardEvent::Disconnected { code, reason } => {
                tracing::info!(shard_id, code, %reason, "Disconnected");
            },
            ShardEvent::Error(error) => tracing::warn!(shard_id, %error, "Gateway error"),
            ShardEvent::Packet(packet) => {
                if let Err(error) = publisher.publish(&packet).await {
                    tracing::warn!(shard_id, %error, event = %packet.t, "Publish failed");
                }
            },
        }
    }

    tracing::info!(shard_id, "Shard event stream ended");
}

/// Route consumer deliveries to the shard whose id matches the routing key.
///
/// Returns when the delivery stream stops. Unrecoverable broker errors exit
/// the process with code 1.
async fn route_deliveries(mut events: mpsc::Receiver<ConsumerEvent>, fleet: &HashMap<i32, Shard>) {
    while let Some(event) = events.recv().await {
        match event {
            ConsumerEvent::Delivery { routing_key, packet } => {
                let Some(shard) = routing_key.parse::<i32>().ok().and_then(|id| fleet.get(&id))
                else {
                    tracing::warn!(%routing_key, "Delivery for unknown shard");
                    continue;
                };

                if let Err(error) = shard.send_packet(&packet).await {
                    tracing::warn!(%routing_key, %error, "Failed to forward packet to shard");
                }
            },
            ConsumerEvent::Error(error) if error.is_socket_error() => {
                tracing::warn!(%error, "Consumer socket error");
                return;
            },
            ConsumerEvent::Error(error) => {
                tracing::error!(%error, "Unrecoverable consumer error");
                process::exit(1);
            },
            ConsumerEvent::Closed => {
                tracing::warn!("Consumer channel closed");
                return;
            },
        }
    }
}
