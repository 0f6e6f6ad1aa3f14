//! WebSocket shard driver.
//!
//! Production glue around the Sans-IO [`Session`]: one tokio task per shard
//! owns the socket, the heartbeat timer and the session, and executes the
//! actions the session returns. Commands and events cross task boundaries
//! over channels, so embedders never touch session state directly — that is
//! what serializes the mutations the protocol requires.
//!
//! The task survives reconnects: a close code runs the session's policy, and
//! a `Reconnect` verdict loops back into the dialer after the jittered
//! backoff. Only a terminal close code, a `destroy` command or a dropped
//! event receiver ends the task.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use rand::Rng;
use shardcast_etf::{Term, encode};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::AbortHandle,
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};

use crate::{
    error::GatewayError,
    packet::Packet,
    session::{CloseOutcome, Session, SessionAction, SessionOptions},
};

/// The gateway endpoint. Version and encoding are fixed; everything else in
/// this crate assumes `v=6` semantics and ETF frames.
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=6&encoding=etf";

/// Base reconnect delay; a 1–10 ms jitter is added per attempt.
const RECONNECT_DELAY_MS: u64 = 5500;

/// Depth of the command and event channels.
const CHANNEL_DEPTH: usize = 64;

/// Close code reported for connections that died without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Events surfaced by a shard task.
#[derive(Debug)]
pub enum ShardEvent {
    /// The socket connected (before identify/resume completes).
    Connected,
    /// The socket closed; the reconnect policy has already been applied.
    Disconnected {
        /// Close code (1006 when the peer vanished without one).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// A non-fatal error (transport failure, undecodable frame).
    Error(GatewayError),
    /// An inbound frame, whatever its opcode.
    Packet(Packet),
}

enum Command {
    Send(Vec<u8>),
    Disconnect { code: u16 },
    Destroy,
}

/// How a single connection ended.
enum ConnEnd {
    /// Peer sent a close frame.
    Peer { code: u16, reason: String },
    /// We are closing with `code` (reconnect action or disconnect command).
    Local { code: u16 },
    /// Stream died without a close frame.
    Dropped,
    /// Stop the task entirely.
    Destroy,
}

/// Handle to a running shard task.
///
/// Dropping every handle destroys the shard: the command channel closes and
/// the task winds down after its current await.
pub struct Shard {
    commands: mpsc::Sender<Command>,
    abort_handle: AbortHandle,
}

impl Shard {
    /// Spawn a shard task and begin connecting.
    ///
    /// Returns the command handle and the event stream. The receiver must be
    /// drained; if it is dropped the task shuts down.
    #[must_use]
    pub fn connect(options: SessionOptions) -> (Self, mpsc::Receiver<ShardEvent>) {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_DEPTH);

        let task = tokio::spawn(run(options, command_rx, event_tx));

        (Self { commands: command_tx, abort_handle: task.abort_handle() }, event_rx)
    }

    /// Send an already-encoded binary frame.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ShardClosed`] if the task has stopped
    pub async fn send_raw(&self, frame: Vec<u8>) -> Result<(), GatewayError> {
        self.commands.send(Command::Send(frame)).await.map_err(|_| GatewayError::ShardClosed)
    }

    /// Encode a term and send it.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Encode`] if the term cannot be serialized
    /// - [`GatewayError::ShardClosed`] if the task has stopped
    pub async fn send_term(&self, term: &Term) -> Result<(), GatewayError> {
        self.send_raw(encode(term)?).await
    }

    /// Re-send a packet's wire bytes unmodified.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ShardClosed`] if the task has stopped
    pub async fn send_packet(&self, packet: &Packet) -> Result<(), GatewayError> {
        self.send_raw(packet.raw.to_vec()).await
    }

    /// Close the current connection with `code`; the reconnect policy decides
    /// what happens next.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ShardClosed`] if the task has stopped
    pub async fn disconnect(&self, code: u16) -> Result<(), GatewayError> {
        self.commands
            .send(Command::Disconnect { code })
            .await
            .map_err(|_| GatewayError::ShardClosed)
    }

    /// Tear the shard down permanently.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ShardClosed`] if the task has already stopped
    pub async fn destroy(&self) -> Result<(), GatewayError> {
        self.commands.send(Command::Destroy).await.map_err(|_| GatewayError::ShardClosed)
    }

    /// Abort the task without a closing handshake.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

async fn run(
    options: SessionOptions,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ShardEvent>,
) {
    let shard_id = options.shard_id;
    let mut session = Session::new(options);
    let mut heartbeat: Option<Interval> = None;

    'connect: loop {
        let socket = match connect_async(GATEWAY_URL).await {
            Ok((socket, _response)) => socket,
            Err(error) => {
                tracing::warn!(shard_id, %error, "gateway connect failed");
                if !emit(&events, ShardEvent::Error(GatewayError::Transport(error.to_string())))
                    .await
                {
                    return;
                }

                // A failed dial behaves like an abnormal closure.
                match session.handle_close(ABNORMAL_CLOSE) {
                    CloseOutcome::Reconnect => {
                        backoff().await;
                        continue 'connect;
                    },
                    CloseOutcome::Destroy => return,
                }
            },
        };

        tracing::debug!(shard_id, "gateway socket open");
        session.handle_open();
        if !emit(&events, ShardEvent::Connected).await {
            return;
        }

        let (mut sink, mut stream) = socket.split();

        let end = 'frames: loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Binary(frame))) => {
                        match session.handle_frame(frame) {
                            Ok(actions) => {
                                if let Some(end) =
                                    execute(actions, &mut sink, &mut heartbeat, &events).await
                                {
                                    break 'frames end;
                                }
                            },
                            Err(error) => {
                                tracing::warn!(shard_id, %error, "dropping undecodable frame");
                                if !emit(&events, ShardEvent::Error(error)).await {
                                    return;
                                }
                            },
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|frame| (u16::from(frame.code), frame.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        break 'frames ConnEnd::Peer { code, reason };
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    },
                    Some(Ok(_)) => {},
                    Some(Err(error)) => {
                        if !emit(
                            &events,
                            ShardEvent::Error(GatewayError::Transport(error.to_string())),
                        )
                        .await
                        {
                            return;
                        }
                        break 'frames ConnEnd::Dropped;
                    },
                    None => break 'frames ConnEnd::Dropped,
                },
                () = heartbeat_due(&mut heartbeat) => {
                    match session.handle_heartbeat_tick() {
                        Ok(actions) => {
                            if let Some(end) =
                                execute(actions, &mut sink, &mut heartbeat, &events).await
                            {
                                break 'frames end;
                            }
                        },
                        Err(error) => {
                            if !emit(&events, ShardEvent::Error(error)).await {
                                return;
                            }
                        },
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Send(frame)) => {
                        if let Err(error) = sink.send(Message::Binary(frame.into())).await {
                            if !emit(
                                &events,
                                ShardEvent::Error(GatewayError::Transport(error.to_string())),
                            )
                            .await
                            {
                                return;
                            }
                            break 'frames ConnEnd::Dropped;
                        }
                    },
                    Some(Command::Disconnect { code }) => break 'frames ConnEnd::Local { code },
                    Some(Command::Destroy) | None => break 'frames ConnEnd::Destroy,
                },
            }
        };

        let (code, reason) = match end {
            ConnEnd::Peer { code, reason } => {
                // tungstenite has queued the close acknowledgement; flush it.
                let _ = sink.close().await;
                (code, reason)
            },
            ConnEnd::Local { code } => {
                let close = CloseFrame { code: CloseCode::from(code), reason: "".into() };
                let _ = sink.send(Message::Close(Some(close))).await;
                let _ = sink.close().await;
                (code, String::new())
            },
            ConnEnd::Dropped => (ABNORMAL_CLOSE, String::new()),
            ConnEnd::Destroy => {
                let close = CloseFrame { code: CloseCode::Normal, reason: "".into() };
                let _ = sink.send(Message::Close(Some(close))).await;
                let _ = sink.close().await;
                tracing::debug!(shard_id, "shard destroyed");
                return;
            },
        };

        tracing::debug!(shard_id, code, "gateway socket closed");
        if !emit(&events, ShardEvent::Disconnected { code, reason }).await {
            return;
        }

        match session.handle_close(code) {
            CloseOutcome::Reconnect => backoff().await,
            CloseOutcome::Destroy => {
                tracing::info!(shard_id, code, "close code is terminal, destroying shard");
                return;
            },
        }
    }
}

/// Execute session actions in order.
///
/// Returns the connection end verdict if any action asked for one; later
/// `Deliver`s are still processed so the embedder sees the frame that caused
/// the reconnect.
async fn execute(
    actions: Vec<SessionAction>,
    sink: &mut WsSink,
    heartbeat: &mut Option<Interval>,
    events: &mpsc::Sender<ShardEvent>,
) -> Option<ConnEnd> {
    let mut end = None;

    for action in actions {
        match action {
            SessionAction::Send(frame) => {
                if let Err(error) = sink.send(Message::Binary(frame.into())).await {
                    let _ = events
                        .send(ShardEvent::Error(GatewayError::Transport(error.to_string())))
                        .await;
                    end.get_or_insert(ConnEnd::Dropped);
                }
            },
            SessionAction::StartHeartbeat(period) => {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                *heartbeat = Some(interval);
            },
            SessionAction::Deliver(packet) => {
                if events.send(ShardEvent::Packet(packet)).await.is_err() {
                    end.get_or_insert(ConnEnd::Destroy);
                }
            },
            SessionAction::Reconnect { code } => {
                end.get_or_insert(ConnEnd::Local { code });
            },
        }
    }

    end
}

/// Resolve when the heartbeat timer fires; never, before HELLO arms it.
async fn heartbeat_due(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        },
        None => std::future::pending().await,
    }
}

async fn emit(events: &mpsc::Sender<ShardEvent>, event: ShardEvent) -> bool {
    events.send(event).await.is_ok()
}

async fn backoff() {
    let jitter = rand::rng().random_range(1..=10);
    tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_MS + jitter)).await;
}
