//! Outbound GATT session state machine
//!
//! Exactly one outbound connection attempt exists process-wide. The machine
//! is a tagged-union state plus a single transition function consuming
//! `(state, event)` and producing effects; the driver layer owns the timers
//! and the actual BLE stack and feeds results back as events.
//!
//! The single most important property here: every failure path converges on
//! `fail_and_reset`, which leaves the session in `Idle` with the busy flag
//! cleared. A path that skips it deadlocks all future sends.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::scheduler::OutgoingChannel;
use crate::types::{MessageKind, PeerHash};
use crate::wire::gatt::{self, DEFAULT_MTU};
use crate::SessionError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Platform status code for a clean disconnect
pub const GATT_STATUS_SUCCESS: u8 = 0;

/// Vendor-specific failure seen on common hardware during connection setup
pub const GATT_STATUS_VENDOR_FAILURE: u8 = 133;

// ----------------------------------------------------------------------------
// State, Events, Effects
// ----------------------------------------------------------------------------

/// Lifecycle of one outbound send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Discovering,
    Ready,
    Writing,
    Done,
}

/// Timers owned by the driver on the machine's behalf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    Connect,
    Mtu,
    Discovery,
    Retry,
}

/// GATT write mode; the preferred acknowledged mode falls back to
/// without-response when the stack rejects the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Transport callbacks and timer firings, translated by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Link came up
    LinkEstablished,
    /// Platform reported the negotiated MTU
    MtuChanged { mtu: u16 },
    /// Service discovery finished
    ServicesResolved {
        service_found: bool,
        characteristics_complete: bool,
    },
    /// The in-flight chunk write was confirmed
    WriteConfirmed,
    /// The stack rejected the write request
    WriteRejected,
    /// Link dropped with a platform status code
    Disconnected { status: u8 },
    /// A timer armed by an earlier transition fired
    TimerFired { kind: TimerKind, generation: u64 },
}

/// Instructions for the driver layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Open the link to the pending target
    Connect { target: PeerHash },
    /// Invoke the optional vendor stack-refresh hook before reconnecting
    RefreshStack,
    /// Request a larger MTU
    RequestMtu { mtu: u16 },
    /// Start service discovery
    DiscoverServices,
    /// Write one chunk to the selected characteristic
    WriteChunk {
        channel: OutgoingChannel,
        bytes: Vec<u8>,
        mode: WriteMode,
    },
    /// Tear the link down
    Disconnect,
    /// Arm a timer; fires back as `TimerFired` with the same generation
    StartTimer {
        kind: TimerKind,
        generation: u64,
        delay: Duration,
    },
    /// Abort every outstanding timer
    CancelTimers,
    /// Purge in-flight GATT reassembly state
    PurgeReassembly,
    /// The queued message was fully written
    ReportDone { target: PeerHash },
    /// The attempt failed terminally with a human-readable message
    ReportError {
        target: Option<PeerHash>,
        message: String,
    },
}

// ----------------------------------------------------------------------------
// Connection Session
// ----------------------------------------------------------------------------

/// The single outbound GATT exchange, reused across attempts.
pub struct ConnectionSession {
    config: EngineConfig,
    state: ClientState,
    busy: bool,
    retry_count: u8,
    pending_target: Option<PeerHash>,
    pending_kind: Option<MessageKind>,
    pending_body: Vec<u8>,
    pending_chunks: VecDeque<Vec<u8>>,
    channel: Option<OutgoingChannel>,
    mtu: u16,
    next_msg_id: u16,
    /// Bumped whenever the live timer set changes; a `TimerFired` carrying
    /// an older generation is stale and ignored.
    generation: u64,
    write_mode: WriteMode,
    saw_discovery_failure: bool,
}

impl ConnectionSession {
    /// Create an idle session
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: ClientState::Idle,
            busy: false,
            retry_count: 0,
            pending_target: None,
            pending_kind: None,
            pending_body: Vec::new(),
            pending_chunks: VecDeque::new(),
            channel: None,
            mtu: DEFAULT_MTU,
            next_msg_id: rand::random(),
            generation: 0,
            write_mode: WriteMode::WithResponse,
            saw_discovery_failure: false,
        }
    }

    /// Current state
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Whether an attempt is in flight
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Negotiated MTU (default 23 before/without negotiation)
    pub fn negotiated_mtu(&self) -> u16 {
        self.mtu
    }

    /// Retries consumed by the current attempt
    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    /// Chunks not yet confirmed written
    pub fn pending_chunk_count(&self) -> usize {
        self.pending_chunks.len()
    }

    /// Start a new send attempt.
    ///
    /// Rejected while an attempt is in flight; only one outbound exchange
    /// may exist at a time. A finished attempt (`Done`) is force-reset
    /// first: link caches, pending chunks and the busy flag all go back to
    /// their idle values before the new attempt begins.
    pub fn begin_send(
        &mut self,
        target: PeerHash,
        channel: OutgoingChannel,
        kind: MessageKind,
        body: Vec<u8>,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        if self.busy {
            debug!(state = ?self.state, %target, "send rejected: session busy");
            return Err(SessionError::Busy { state: self.state });
        }
        self.reset_bookkeeping();

        self.busy = true;
        self.pending_target = Some(target);
        self.channel = Some(channel);
        self.pending_kind = Some(kind);
        self.pending_body = body;
        self.state = ClientState::Connecting;
        self.generation += 1;

        Ok(vec![
            SessionEffect::Connect { target },
            self.arm(TimerKind::Connect, self.config.connect_timeout),
        ])
    }

    /// Feed one event through the transition function.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionEffect> {
        if let SessionEvent::TimerFired { kind, generation } = event {
            if generation != self.generation {
                debug!(?kind, generation, current = self.generation, "stale timer ignored");
                return Vec::new();
            }
            return self.handle_timer(kind);
        }

        match (self.state, event) {
            (ClientState::Connecting, SessionEvent::LinkEstablished) => {
                self.state = ClientState::Connected;
                vec![
                    self.invalidate_timers(),
                    SessionEffect::RequestMtu {
                        mtu: self.config.target_mtu,
                    },
                    self.arm(TimerKind::Mtu, self.config.mtu_fallback_timeout),
                ]
            }

            (ClientState::Connected, SessionEvent::MtuChanged { mtu }) => {
                self.mtu = mtu;
                self.start_discovery()
            }

            (ClientState::Discovering, SessionEvent::ServicesResolved {
                service_found,
                characteristics_complete,
            }) => {
                if service_found && characteristics_complete {
                    // A working discovery supersedes earlier failed ones;
                    // later failures report their own reason.
                    self.saw_discovery_failure = false;
                    self.state = ClientState::Ready;
                    self.start_writing()
                } else {
                    self.saw_discovery_failure = true;
                    let reason = if service_found {
                        "missing characteristics"
                    } else {
                        "service not found"
                    };
                    self.transient_failure(reason)
                }
            }

            (ClientState::Writing, SessionEvent::WriteConfirmed) => {
                self.pending_chunks.pop_front();
                self.write_mode = WriteMode::WithResponse;
                if self.pending_chunks.is_empty() {
                    self.complete()
                } else {
                    self.state = ClientState::Ready;
                    self.start_writing()
                }
            }

            (ClientState::Writing, SessionEvent::WriteRejected) => {
                if self.write_mode == WriteMode::WithResponse {
                    // Acknowledged write refused by the stack; retry the
                    // same chunk without acknowledgment before giving up.
                    self.write_mode = WriteMode::WithoutResponse;
                    match self.write_front() {
                        Some(effect) => vec![effect],
                        None => self.fail_and_reset("write queue empty during fallback"),
                    }
                } else {
                    self.fail_and_reset("write rejected by stack")
                }
            }

            (_, SessionEvent::Disconnected { status }) => self.handle_disconnect(status),

            (state, event) => {
                debug!(?state, ?event, "event ignored in current state");
                Vec::new()
            }
        }
    }

    /// Abort the attempt and force the session back to Idle.
    ///
    /// The one convergence point for every failure path: timers cancelled,
    /// link closed, reassembly purged, caches cleared, busy flag cleared,
    /// exactly one terminal error reported.
    pub fn fail_and_reset(&mut self, message: &str) -> Vec<SessionEffect> {
        warn!(target = ?self.pending_target, message, "session attempt failed");
        let effects = vec![
            self.invalidate_timers(),
            SessionEffect::Disconnect,
            SessionEffect::PurgeReassembly,
            SessionEffect::ReportError {
                target: self.pending_target,
                message: message.to_string(),
            },
        ];
        self.reset_bookkeeping();
        effects
    }

    // ------------------------------------------------------------------
    // Internal transitions
    // ------------------------------------------------------------------

    fn handle_timer(&mut self, kind: TimerKind) -> Vec<SessionEffect> {
        match (self.state, kind) {
            (ClientState::Connecting, TimerKind::Connect) => {
                self.transient_failure("connection timeout")
            }
            (ClientState::Connecting, TimerKind::Retry) => {
                let target = match self.pending_target {
                    Some(target) => target,
                    None => return self.fail_and_reset("retry with no pending target"),
                };
                let mut effects = Vec::new();
                if self.retry_count > 0 {
                    effects.push(SessionEffect::RefreshStack);
                }
                effects.push(SessionEffect::Connect { target });
                effects.push(self.arm(TimerKind::Connect, self.config.connect_timeout));
                effects
            }
            // Platform never signalled MTU completion; keep the 23-byte
            // default and move on.
            (ClientState::Connected, TimerKind::Mtu) => self.start_discovery(),
            (ClientState::Discovering, TimerKind::Discovery) => {
                self.transient_failure("service discovery timeout")
            }
            (state, kind) => {
                if self.busy {
                    warn!(?state, ?kind, "unexpected timeout");
                    self.transient_failure("unexpected timeout")
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn handle_disconnect(&mut self, status: u8) -> Vec<SessionEffect> {
        if !self.busy {
            // Teardown echo from a finished attempt
            return Vec::new();
        }
        if status != GATT_STATUS_SUCCESS {
            self.transient_failure(&format!("link failed (status {})", status))
        } else {
            self.fail_and_reset("link closed before the message was written")
        }
    }

    fn start_discovery(&mut self) -> Vec<SessionEffect> {
        self.state = ClientState::Discovering;
        vec![
            self.invalidate_timers(),
            SessionEffect::DiscoverServices,
            self.arm(TimerKind::Discovery, self.config.discovery_timeout),
        ]
    }

    /// Chunk the pending body for the negotiated MTU and write the first
    /// chunk. Chunking happens here, not at enqueue, because the usable
    /// chunk size is only known after MTU negotiation.
    fn start_writing(&mut self) -> Vec<SessionEffect> {
        if self.pending_chunks.is_empty() {
            let kind = match self.pending_kind {
                Some(kind) => kind,
                None => return self.fail_and_reset("no message staged for writing"),
            };
            let msg_id = self.next_msg_id;
            self.next_msg_id = self.next_msg_id.wrapping_add(1);

            match gatt::encode_chunks(kind, msg_id, &self.pending_body, self.mtu) {
                Ok(frames) => {
                    self.pending_chunks = frames.iter().map(|f| f.to_bytes()).collect();
                }
                Err(err) => {
                    return self.fail_and_reset(&format!("message cannot be framed: {}", err));
                }
            }
        }

        self.state = ClientState::Writing;
        let mut effects = vec![self.invalidate_timers()];
        match self.write_front() {
            Some(effect) => effects.push(effect),
            None => return self.fail_and_reset("message framed to zero chunks"),
        }
        effects
    }

    fn write_front(&self) -> Option<SessionEffect> {
        let bytes = self.pending_chunks.front()?.clone();
        let channel = self.channel?;
        Some(SessionEffect::WriteChunk {
            channel,
            bytes,
            mode: self.write_mode,
        })
    }

    fn complete(&mut self) -> Vec<SessionEffect> {
        let target = self.pending_target.take().unwrap_or(PeerHash::BROADCAST);
        debug!(%target, "send attempt complete");
        self.state = ClientState::Done;
        self.busy = false;
        self.retry_count = 0;
        self.channel = None;
        self.pending_kind = None;
        self.pending_body.clear();
        vec![
            self.invalidate_timers(),
            SessionEffect::Disconnect,
            SessionEffect::ReportDone { target },
        ]
    }

    fn transient_failure(&mut self, reason: &str) -> Vec<SessionEffect> {
        if self.retry_count < self.config.max_retries && self.pending_target.is_some() {
            self.retry_count += 1;
            warn!(
                target = ?self.pending_target,
                retry = self.retry_count,
                max = self.config.max_retries,
                reason,
                "transient failure, scheduling retry"
            );
            self.state = ClientState::Connecting;
            vec![
                self.invalidate_timers(),
                SessionEffect::Disconnect,
                self.arm(TimerKind::Retry, self.config.retry_delay),
            ]
        } else if self.saw_discovery_failure {
            self.fail_and_reset("device not compatible")
        } else {
            self.fail_and_reset(reason)
        }
    }

    fn invalidate_timers(&mut self) -> SessionEffect {
        self.generation += 1;
        SessionEffect::CancelTimers
    }

    fn arm(&self, kind: TimerKind, delay: Duration) -> SessionEffect {
        SessionEffect::StartTimer {
            kind,
            generation: self.generation,
            delay,
        }
    }

    fn reset_bookkeeping(&mut self) {
        self.state = ClientState::Idle;
        self.busy = false;
        self.retry_count = 0;
        self.pending_target = None;
        self.pending_kind = None;
        self.pending_body.clear();
        self.pending_chunks.clear();
        self.channel = None;
        self.mtu = DEFAULT_MTU;
        self.write_mode = WriteMode::WithResponse;
        self.saw_discovery_failure = false;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
