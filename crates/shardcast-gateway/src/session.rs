//! Session layer state machine.
//!
//! Manages the identify/resume handshake, heartbeat acknowledgement tracking
//! and close-code recovery policy for one shard. Uses the action pattern:
//! inputs (frames, timer ticks, close codes) go in, [`SessionAction`]s come
//! out for the driver to execute. This keeps the state machine pure (no I/O)
//! and makes the protocol scenarios directly testable.
//!
//! # State machine
//!
//! ```text
//! ┌────────┐ socket up ┌──────┐  HELLO   ┌─────────────────────────┐
//! │ Closed │──────────>│ Open │─────────>│ Identifying / Resuming  │
//! └────────┘           └──────┘          └───────────┬─────────────┘
//!      ^                                       READY │
//!      │ close code → reconnect policy   ┌───────────▼───┐
//!      └─────────────────────────────────│     Ready     │
//!                (resume token kept      └───────────────┘
//!                 unless the code clears it)
//! ```
//!
//! The resume token is `session_id` + `last_seq`; both are cleared by an
//! explicit identify, by close codes 4003/4007/4009, and by an invalid
//! session the peer marks non-resumable.

use std::time::Duration;

use bytes::Bytes;
use shardcast_etf::{Term, encode};

use crate::{error::GatewayError, packet::Packet};

/// Consecutive reconnect attempts tolerated before the session destroys
/// itself. Zeroed every time a READY dispatch lands.
pub const MAX_RECONNECT_TRIES: u32 = 5;

/// Close codes with protocol-defined recovery semantics.
pub mod close_code {
    /// Normal closure; used for locally initiated reconnects.
    pub const NORMAL: u16 = 1000;
    /// Not authenticated. Clears the resume token.
    pub const NOT_AUTHENTICATED: u16 = 4003;
    /// Authentication failed. Terminal.
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// Invalid resume sequence. Clears the resume token.
    pub const INVALID_SEQ: u16 = 4007;
    /// Session timed out. Clears the resume token; also the code this side
    /// closes with after a missed heartbeat ACK.
    pub const SESSION_TIMEOUT: u16 = 4009;
    /// Invalid shard. Terminal.
    pub const INVALID_SHARD: u16 = 4010;
    /// Sharding required. Terminal.
    pub const SHARDING_REQUIRED: u16 = 4011;
}

/// Gateway opcodes handled by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Event dispatch (sequence-numbered).
    Dispatch = 0,
    /// Heartbeat request from the peer.
    Heartbeat = 1,
    /// Identify (outbound only).
    Identify = 2,
    /// Resume (outbound only).
    Resume = 6,
    /// Peer asks us to reconnect.
    Reconnect = 7,
    /// Session invalidated; payload says whether a resume may be attempted.
    InvalidSession = 9,
    /// First frame after connecting; carries the heartbeat interval.
    Hello = 10,
    /// Heartbeat acknowledgement.
    HeartbeatAck = 11,
}

impl Opcode {
    /// Map a wire opcode onto the handled set. `None` for everything else —
    /// unhandled opcodes still reach the embedder as packets.
    #[must_use]
    pub fn from_i32(op: i32) -> Option<Self> {
        match op {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }
}

/// Connection parameters for one shard.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bot token.
    pub token: String,
    /// Index of this shard.
    pub shard_id: i32,
    /// Total shard count.
    pub shard_count: i32,
    /// Member count above which guilds arrive without offline members.
    pub large_threshold: i32,
    /// Initial presence payload sent with identify.
    pub presence: Term,
}

impl SessionOptions {
    /// Options for one shard of `shard_count` with default tuning.
    #[must_use]
    pub fn new(token: impl Into<String>, shard_id: i32, shard_count: i32) -> Self {
        Self {
            token: token.into(),
            shard_id,
            shard_count,
            large_threshold: 250,
            presence: Term::map([]),
        }
    }
}

/// Actions returned by the session state machine.
///
/// The driver executes these in order; none of them re-enter the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Write an already-encoded binary frame to the socket.
    Send(Vec<u8>),

    /// Arm the heartbeat timer. Emitted at most once per session object;
    /// the first tick is due one full interval after this action.
    StartHeartbeat(Duration),

    /// Hand the packet to the embedder.
    Deliver(Packet),

    /// Close the socket with `code` and re-enter the connect loop.
    Reconnect {
        /// Close code to send.
        code: u16,
    },
}

/// What the close policy decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Back off, then dial again. Whether the next handshake resumes or
    /// identifies depends on whether the resume token survived the code.
    Reconnect,
    /// Terminal close code (or the retry budget ran out); stop for good.
    Destroy,
}

/// Per-shard protocol state machine.
///
/// # Invariants
///
/// - `session_id` + `last_seq` form the resume token; cleared together.
/// - `acked` is false only between a heartbeat send and the matching ACK.
/// - `tries` counts consecutive reconnects; READY zeroes it.
///
/// All methods are synchronous and non-blocking. The driver must serialize
/// calls (one task owns the session); nothing here is `Sync`-dependent.
#[derive(Debug, Clone)]
pub struct Session {
    options: SessionOptions,
    session_id: Option<String>,
    last_seq: i32,
    heartbeat_interval: Option<Duration>,
    acked: bool,
    heartbeat_started: bool,
    open: bool,
    tries: u32,
}

impl Session {
    /// Fresh session with no resume token.
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            session_id: None,
            last_seq: -1,
            heartbeat_interval: None,
            acked: true,
            heartbeat_started: false,
            open: false,
            tries: 0,
        }
    }

    /// Session id from the last READY, while the resume token is live.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last dispatch sequence number; `-1` before the first dispatch.
    #[must_use]
    pub fn last_seq(&self) -> i32 {
        self.last_seq
    }

    /// Heartbeat interval announced by the last HELLO.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    /// Whether the last heartbeat has been acknowledged.
    #[must_use]
    pub fn acked(&self) -> bool {
        self.acked
    }

    /// Consecutive reconnect attempts since the last READY.
    #[must_use]
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Mark the socket as connected.
    pub fn handle_open(&mut self) {
        self.open = true;
    }

    /// Process one inbound binary frame.
    ///
    /// Every frame — handled opcode or not — produces a trailing
    /// [`SessionAction::Deliver`] carrying a byte-exact copy of the wire
    /// bytes.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Decode`] / [`GatewayError::MissingField`] if the
    ///   frame is malformed. The session state is unchanged; the caller logs
    ///   and drops the frame.
    /// - [`GatewayError::Encode`] if a response frame cannot be built.
    pub fn handle_frame(&mut self, raw: Bytes) -> Result<Vec<SessionAction>, GatewayError> {
        let packet = Packet::from_wire(raw)?;
        let mut actions = Vec::new();

        match Opcode::from_i32(packet.op) {
            Some(Opcode::Hello) => {
                let interval_ms = packet
                    .d
                    .get_str("heartbeat_interval")
                    .and_then(Term::as_i64)
                    .ok_or(GatewayError::MissingField { field: "heartbeat_interval" })?;
                let interval = Duration::from_millis(interval_ms.max(0) as u64);
                self.heartbeat_interval = Some(interval);

                if self.session_id.is_some() {
                    actions.push(SessionAction::Send(self.resume_frame()?));
                } else {
                    actions.push(SessionAction::Send(self.identify_frame()?));
                }

                self.acked = true;

                if self.heartbeat_started {
                    // Timer already running from a previous HELLO on this
                    // session object; just prove liveness immediately.
                    actions.push(SessionAction::Send(self.heartbeat_frame()?));
                } else {
                    self.heartbeat_started = true;
                    actions.push(SessionAction::StartHeartbeat(interval));
                }
            },
            Some(Opcode::Dispatch) => {
                self.last_seq = packet.s;

                if packet.t == "READY" {
                    if let Some(id) = packet.d.get_str("session_id").and_then(Term::as_str) {
                        self.session_id = Some(id.to_owned());
                    }
                    self.tries = 0;
                }
            },
            Some(Opcode::HeartbeatAck) => {
                self.acked = true;
            },
            Some(Opcode::Reconnect) => {
                actions.push(SessionAction::Reconnect { code: close_code::NORMAL });
            },
            Some(Opcode::InvalidSession) => {
                if packet.d.as_bool() == Some(true) {
                    actions.push(SessionAction::Send(self.resume_frame()?));
                } else {
                    // Non-resumable: drop the token so the next HELLO
                    // identifies fresh.
                    self.clear_session();
                    actions.push(SessionAction::Reconnect { code: close_code::NORMAL });
                }
            },
            Some(Opcode::Heartbeat) => {
                actions.push(SessionAction::Send(self.heartbeat_frame()?));
            },
            Some(Opcode::Identify | Opcode::Resume) | None => {},
        }

        actions.push(SessionAction::Deliver(packet));
        Ok(actions)
    }

    /// Process one heartbeat timer tick.
    ///
    /// A tick that lands with the previous heartbeat unacknowledged abandons
    /// the connection with close code 4009. `acked` is reset on that path so
    /// the timer — which keeps running across reconnects — cannot fire the
    /// same verdict again before the next HELLO.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Encode`] if the heartbeat frame cannot be built.
    pub fn handle_heartbeat_tick(&mut self) -> Result<Vec<SessionAction>, GatewayError> {
        if !self.acked {
            self.acked = true;
            return Ok(vec![SessionAction::Reconnect { code: close_code::SESSION_TIMEOUT }]);
        }

        if self.open {
            self.acked = false;
            return Ok(vec![SessionAction::Send(self.heartbeat_frame()?)]);
        }

        Ok(Vec::new())
    }

    /// Apply the reconnect policy to a close code.
    pub fn handle_close(&mut self, code: u16) -> CloseOutcome {
        self.open = false;

        if self.tries == MAX_RECONNECT_TRIES {
            return CloseOutcome::Destroy;
        }

        match code {
            close_code::AUTHENTICATION_FAILED
            | close_code::INVALID_SHARD
            | close_code::SHARDING_REQUIRED => CloseOutcome::Destroy,
            close_code::NOT_AUTHENTICATED
            | close_code::INVALID_SEQ
            | close_code::SESSION_TIMEOUT => {
                self.clear_session();
                self.tries += 1;
                CloseOutcome::Reconnect
            },
            _ => {
                self.tries += 1;
                CloseOutcome::Reconnect
            },
        }
    }

    fn clear_session(&mut self) {
        self.last_seq = -1;
        self.session_id = None;
    }

    /// Build the identify frame. Clears the resume token first: identifying
    /// and resuming are mutually exclusive.
    fn identify_frame(&mut self) -> Result<Vec<u8>, GatewayError> {
        self.clear_session();

        let properties = Term::map([
            (Term::from("$os"), Term::from("linux")),
            (Term::from("$browser"), Term::from("spectacles")),
            (Term::from("$device"), Term::from("spectacles")),
        ]);

        let d = Term::map([
            (Term::from("token"), Term::from(self.options.token.clone())),
            (Term::from("compress"), Term::Bool(true)),
            (Term::from("large_threshold"), Term::Int32(self.options.large_threshold)),
            (Term::from("properties"), properties),
            (
                Term::from("shard"),
                Term::Array(vec![
                    Term::Int32(self.options.shard_id),
                    Term::Int32(self.options.shard_count),
                ]),
            ),
            (Term::from("presence"), self.options.presence.clone()),
        ]);

        let frame = Term::map([
            (Term::from("op"), Term::Int32(Opcode::Identify as i32)),
            (Term::from("d"), d),
        ]);
        Ok(encode(&frame)?)
    }

    fn resume_frame(&self) -> Result<Vec<u8>, GatewayError> {
        let session_id = self.session_id.clone().unwrap_or_default();

        let d = Term::map([
            (Term::from("token"), Term::from(self.options.token.clone())),
            (Term::from("session_id"), Term::from(session_id)),
            (Term::from("seq"), Term::Int32(self.last_seq)),
        ]);

        let frame = Term::map([
            (Term::from("op"), Term::Int32(Opcode::Resume as i32)),
            (Term::from("d"), d),
        ]);
        Ok(encode(&frame)?)
    }

    fn heartbeat_frame(&self) -> Result<Vec<u8>, GatewayError> {
        let d = if self.last_seq == -1 { Term::Null } else { Term::Int32(self.last_seq) };

        let frame = Term::map([
            (Term::from("op"), Term::Int32(Opcode::Heartbeat as i32)),
            (Term::from("d"), d),
        ]);
        Ok(encode(&frame)?)
    }
}

#[cfg(test)]
mod tests {
    use shardcast_etf::decode;

    use super::*;

    fn frame(term: &Term) -> Bytes {
        Bytes::from(encode(term).unwrap())
    }

    fn hello(interval_ms: i32) -> Bytes {
        frame(&Term::map([
            (Term::from("op"), Term::Int32(10)),
            (
                Term::from("d"),
                Term::map([(Term::from("heartbeat_interval"), Term::Int32(interval_ms))]),
            ),
        ]))
    }

    fn sent_op(action: &SessionAction) -> i32 {
        match action {
            SessionAction::Send(bytes) => decode(bytes)
                .unwrap()
                .get_str("op")
                .and_then(Term::as_i64)
                .map(|op| op as i32)
                .unwrap(),
            other => panic!("expected Send action, got {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_leaves_state_untouched() {
        let mut session = Session::new(SessionOptions::new("t", 0, 1));
        session.handle_open();

        let result = session.handle_frame(Bytes::from_static(&[0xFF, 0x00]));
        assert!(result.is_err());
        assert_eq!(session.last_seq(), -1);
        assert!(session.acked());
    }

    #[test]
    fn hello_without_interval_is_a_protocol_error() {
        let mut session = Session::new(SessionOptions::new("t", 0, 1));
        let bad_hello = frame(&Term::map([
            (Term::from("op"), Term::Int32(10)),
            (Term::from("d"), Term::map([])),
        ]));

        assert!(matches!(
            session.handle_frame(bad_hello),
            Err(GatewayError::MissingField { field: "heartbeat_interval" })
        ));
    }

    #[test]
    fn unknown_opcode_still_delivers() {
        let mut session = Session::new(SessionOptions::new("t", 0, 1));
        let actions = session
            .handle_frame(frame(&Term::map([(Term::from("op"), Term::Int32(4))])))
            .unwrap();

        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], SessionAction::Deliver(packet) if packet.op == 4));
    }

    #[test]
    fn second_hello_reuses_the_running_timer() {
        let mut session = Session::new(SessionOptions::new("t", 0, 1));
        session.handle_open();

        let first = session.handle_frame(hello(1000)).unwrap();
        assert!(first.iter().any(|a| matches!(a, SessionAction::StartHeartbeat(_))));

        let second = session.handle_frame(hello(1000)).unwrap();
        assert!(!second.iter().any(|a| matches!(a, SessionAction::StartHeartbeat(_))));
        // Identify (token was cleared by the first identify) then an
        // immediate heartbeat.
        assert_eq!(sent_op(&second[0]), 2);
        assert_eq!(sent_op(&second[1]), 1);
    }

    #[test]
    fn heartbeat_request_is_answered_inline() {
        let mut session = Session::new(SessionOptions::new("t", 0, 1));
        let actions = session
            .handle_frame(frame(&Term::map([(Term::from("op"), Term::Int32(1))])))
            .unwrap();

        assert_eq!(sent_op(&actions[0]), 1);
    }

    #[test]
    fn heartbeat_payload_is_null_before_any_dispatch() {
        let session = Session::new(SessionOptions::new("t", 0, 1));
        let bytes = session.heartbeat_frame().unwrap();
        let term = decode(&bytes).unwrap();
        assert_eq!(term.get_str("d"), Some(&Term::Null));
    }

    #[test]
    fn reconnect_budget_exhaustion_destroys() {
        let mut session = Session::new(SessionOptions::new("t", 0, 1));

        for _ in 0..MAX_RECONNECT_TRIES {
            assert_eq!(session.handle_close(1006), CloseOutcome::Reconnect);
        }
        assert_eq!(session.handle_close(1006), CloseOutcome::Destroy);
    }

    #[test]
    fn ready_resets_the_reconnect_budget() {
        let mut session = Session::new(SessionOptions::new("t", 0, 1));
        assert_eq!(session.handle_close(1006), CloseOutcome::Reconnect);
        assert_eq!(session.tries(), 1);

        let ready = frame(&Term::map([
            (Term::from("op"), Term::Int32(0)),
            (Term::from("s"), Term::Int32(1)),
            (Term::from("t"), Term::from("READY")),
            (
                Term::from("d"),
                Term::map([(Term::from("session_id"), Term::from("abc"))]),
            ),
        ]));
        session.handle_frame(ready).unwrap();
        assert_eq!(session.tries(), 0);
    }
}
