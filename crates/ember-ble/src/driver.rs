//! Session effect executor
//!
//! `ConnectionSession` decides, this module does. One `SessionDriver` owns
//! the state machine, a `GattClient` and the timer tasks; `send_message`
//! runs a single queued message through the full connect → discover →
//! write lifecycle and resolves when the machine reports done or failed.
//!
//! Command results are translated straight back into session events, so the
//! machine alone decides what a stack error means. Timers are tokio tasks
//! that fire a `TimerFired` carrying the generation stamped at arm time;
//! cancellation is best-effort because the machine ignores stale
//! generations anyway.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ember_core::scheduler::QueuedMessage;
use ember_core::session::{
    ConnectionSession, SessionEffect, SessionEvent, WriteMode, GATT_STATUS_VENDOR_FAILURE,
};
use ember_core::types::{PeerHash, SystemTimeSource};
use ember_core::{EngineConfig, PassiveReceiver};

use crate::client::{GattClient, LinkEvent};
use crate::error::BleLinkError;
use crate::uuids::characteristic_for;

// ----------------------------------------------------------------------------
// Session Driver
// ----------------------------------------------------------------------------

/// Terminal outcome of one send attempt
enum Terminal {
    Done,
    Failed(String),
}

/// Drives the connection state machine against a platform `GattClient`.
pub struct SessionDriver<C: GattClient> {
    session: ConnectionSession,
    client: C,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    timer_tx: mpsc::UnboundedSender<SessionEvent>,
    timer_rx: mpsc::UnboundedReceiver<SessionEvent>,
    timer_handles: Vec<JoinHandle<()>>,
    receiver: Option<Arc<Mutex<PassiveReceiver<SystemTimeSource>>>>,
}

impl<C: GattClient> SessionDriver<C> {
    /// Create a driver. `link_rx` carries the adapter's spontaneous stack
    /// notifications.
    pub fn new(
        config: EngineConfig,
        client: C,
        link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            session: ConnectionSession::new(config),
            client,
            link_rx,
            timer_tx,
            timer_rx,
            timer_handles: Vec::new(),
            receiver: None,
        }
    }

    /// Attach the inbound pipeline so terminal failures purge its
    /// partially reassembled messages.
    pub fn with_receiver(
        mut self,
        receiver: Arc<Mutex<PassiveReceiver<SystemTimeSource>>>,
    ) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Whether a send attempt is currently in flight
    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    /// Run one queued message to completion over GATT.
    ///
    /// The chunk payloads carry `local` as a 4-byte sender prefix ahead of
    /// the canonical body, since the GATT chunk header has no sender field.
    pub async fn send_message(
        &mut self,
        local: PeerHash,
        queued: &QueuedMessage,
    ) -> Result<(), BleLinkError> {
        let mut body = local.as_bytes().to_vec();
        body.extend_from_slice(&queued.message.body_bytes());

        let effects = self
            .session
            .begin_send(queued.target, queued.channel(), queued.message.kind(), body)
            .map_err(ember_core::EmberError::from)?;

        let mut pending: VecDeque<SessionEvent> = VecDeque::new();
        if let Some(terminal) = self.apply(effects, &mut pending).await {
            return Self::finish(terminal);
        }

        loop {
            let event = match pending.pop_front() {
                Some(event) => event,
                None => self.next_event().await,
            };
            let effects = self.session.handle(event);
            if let Some(terminal) = self.apply(effects, &mut pending).await {
                return Self::finish(terminal);
            }
        }
    }

    async fn next_event(&mut self) -> SessionEvent {
        tokio::select! {
            Some(event) = self.timer_rx.recv() => event,
            link = self.link_rx.recv() => match link {
                Some(LinkEvent::MtuChanged { mtu }) => SessionEvent::MtuChanged { mtu },
                Some(LinkEvent::Disconnected { status }) => {
                    SessionEvent::Disconnected { status }
                }
                // Adapter dropped its end; surface as a failed link
                None => SessionEvent::Disconnected {
                    status: GATT_STATUS_VENDOR_FAILURE,
                },
            },
        }
    }

    fn finish(terminal: Terminal) -> Result<(), BleLinkError> {
        match terminal {
            Terminal::Done => Ok(()),
            Terminal::Failed(message) => Err(BleLinkError::SendFailed { message }),
        }
    }

    /// Execute effects in order. Client command results are folded back
    /// into the pending event queue rather than bubbling as errors.
    async fn apply(
        &mut self,
        effects: Vec<SessionEffect>,
        pending: &mut VecDeque<SessionEvent>,
    ) -> Option<Terminal> {
        let mut terminal = None;
        for effect in effects {
            match effect {
                SessionEffect::Connect { target } => match self.client.connect(target).await {
                    Ok(()) => pending.push_back(SessionEvent::LinkEstablished),
                    Err(err) => {
                        warn!(%target, %err, "connect failed");
                        pending.push_back(SessionEvent::Disconnected {
                            status: GATT_STATUS_VENDOR_FAILURE,
                        });
                    }
                },
                SessionEffect::RefreshStack => self.client.refresh_stack().await,
                SessionEffect::RequestMtu { mtu } => match self.client.request_mtu(mtu).await {
                    Ok(Some(negotiated)) => {
                        pending.push_back(SessionEvent::MtuChanged { mtu: negotiated })
                    }
                    // Result arrives as a LinkEvent, or the fallback timer fires
                    Ok(None) => {}
                    Err(err) => debug!(%err, "mtu request failed, fallback timer covers it"),
                },
                SessionEffect::DiscoverServices => match self.client.discover_services().await {
                    Ok(inventory) => pending.push_back(SessionEvent::ServicesResolved {
                        service_found: inventory.service_found,
                        characteristics_complete: inventory.characteristics_complete(),
                    }),
                    Err(err) => {
                        warn!(%err, "service discovery failed");
                        pending.push_back(SessionEvent::ServicesResolved {
                            service_found: false,
                            characteristics_complete: false,
                        });
                    }
                },
                SessionEffect::WriteChunk {
                    channel,
                    bytes,
                    mode,
                } => {
                    let characteristic = characteristic_for(channel);
                    let with_response = mode == WriteMode::WithResponse;
                    match self.client.write(characteristic, bytes, with_response).await {
                        Ok(()) => pending.push_back(SessionEvent::WriteConfirmed),
                        Err(err) => {
                            warn!(%err, ?mode, "chunk write rejected");
                            pending.push_back(SessionEvent::WriteRejected);
                        }
                    }
                }
                SessionEffect::Disconnect => self.client.disconnect().await,
                SessionEffect::StartTimer {
                    kind,
                    generation,
                    delay,
                } => {
                    let timer_tx = self.timer_tx.clone();
                    self.timer_handles.push(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = timer_tx.send(SessionEvent::TimerFired { kind, generation });
                    }));
                }
                SessionEffect::CancelTimers => {
                    for handle in self.timer_handles.drain(..) {
                        handle.abort();
                    }
                }
                SessionEffect::PurgeReassembly => {
                    if let Some(receiver) = &self.receiver {
                        if let Ok(mut receiver) = receiver.lock() {
                            receiver.purge_reassembly();
                        }
                    }
                }
                SessionEffect::ReportDone { target } => {
                    info!(%target, "message delivered");
                    terminal = Some(Terminal::Done);
                }
                SessionEffect::ReportError { target, message } => {
                    warn!(?target, message, "message delivery failed");
                    terminal = Some(Terminal::Failed(message));
                }
            }
        }
        terminal
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
