//! Connection manager: owns the gateway socket and its lifecycle state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::RealtimeConfig;
use crate::dispatcher::EventDispatcher;
use crate::events::{ClientEvent, DomainEvent, WireEnvelope};
use crate::transport::Transport;

/// Connection lifecycle. Exactly one state holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Client-to-server sink. Implemented by [`ConnectionManager`] and by
/// recording doubles in component tests.
pub trait GatewaySender: Send + Sync {
    /// Queue an event on the live connection. Returns `false` immediately,
    /// without blocking, when the connection is not `Connected`.
    fn send(&self, event: ClientEvent) -> bool;
    fn state(&self) -> ConnectionState;
}

enum PumpEnd {
    Shutdown,
    TransportClosed,
}

/// Owns the single logical gateway connection for one session: dials through
/// the [`Transport`], translates inbound frames into domain events, and runs
/// the reconnect state machine. Every transition into `Connected` broadcasts
/// a resync epoch so components re-declare their interest; the server replays
/// nothing on its own.
pub struct ConnectionManager {
    config: Arc<RealtimeConfig>,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<EventDispatcher>,
    state_tx: watch::Sender<ConnectionState>,
    resync_tx: broadcast::Sender<u64>,
    resync_epoch: AtomicU64,
    outbound: RwLock<Option<mpsc::Sender<WireEnvelope>>>,
    shutdown_tx: watch::Sender<bool>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<RealtimeConfig>,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (resync_tx, _) = broadcast::channel(16);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            transport,
            dispatcher,
            state_tx,
            resync_tx,
            resync_epoch: AtomicU64::new(0),
            outbound: RwLock::new(None),
            shutdown_tx,
            run_handle: Mutex::new(None),
        })
    }

    /// Start dialing with the given bearer credential. A no-op while a
    /// connection attempt or live connection already exists.
    pub fn connect(self: &Arc<Self>, credential: impl Into<String>) {
        if *self.state_tx.borrow() != ConnectionState::Disconnected {
            tracing::debug!("connect ignored; connection already active");
            return;
        }
        self.shutdown_tx.send_replace(false);
        self.set_state(ConnectionState::Connecting);
        let manager = self.clone();
        let credential = credential.into();
        let handle = tokio::spawn(async move { manager.run(credential).await });
        *self.run_handle.lock() = Some(handle);
    }

    /// Tear the connection down and wait for the run loop to stop.
    pub async fn disconnect(&self) {
        self.shutdown_tx.send_replace(true);
        *self.outbound.write() = None;
        let handle = self.run_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Watch the connection state; the receiver always holds the current
    /// value.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Receive the resync epoch broadcast on every transition into
    /// `Connected`, including the first.
    pub fn subscribe_resync(&self) -> broadcast::Receiver<u64> {
        self.resync_tx.subscribe()
    }

    /// Handle for components that need to subscribe later (or, in tests,
    /// to inject resync signals).
    pub fn resync_sender(&self) -> broadcast::Sender<u64> {
        self.resync_tx.clone()
    }

    async fn run(self: Arc<Self>, credential: String) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut attempts: u32 = 0;
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            match self.transport.open(&credential).await {
                Ok(link) => {
                    attempts = 0;
                    // The sender must be in place before the state flips, or
                    // an early `send` could see `Connected` with no wire.
                    *self.outbound.write() = Some(link.outbound);
                    self.set_state(ConnectionState::Connected);
                    let epoch = self.resync_epoch.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::info!(epoch, "gateway connected");
                    let _ = self.resync_tx.send(epoch);

                    let ended = self.pump(link.inbound, &mut shutdown_rx).await;
                    *self.outbound.write() = None;
                    match ended {
                        PumpEnd::Shutdown => break,
                        PumpEnd::TransportClosed => {
                            tracing::warn!("gateway connection lost");
                            self.set_state(ConnectionState::Reconnecting);
                        }
                    }
                }
                Err(error) => {
                    attempts += 1;
                    if attempts >= self.config.reconnect_max_attempts {
                        tracing::error!(attempts, %error, "gateway unreachable; giving up");
                        break;
                    }
                    let delay = self.backoff_delay(attempts);
                    tracing::debug!(attempts, ?delay, %error, "gateway dial failed; backing off");
                    self.set_state(ConnectionState::Reconnecting);
                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drain inbound frames into the dispatcher until the link dies or
    /// shutdown is requested.
    async fn pump(
        &self,
        mut inbound: mpsc::Receiver<WireEnvelope>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> PumpEnd {
        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(envelope) => {
                        if let Some(event) = DomainEvent::from_wire(&envelope) {
                            self.dispatcher.dispatch(&event);
                        }
                    }
                    None => return PumpEnd::TransportClosed,
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return PumpEnd::Shutdown;
                    }
                }
            }
        }
    }

    /// Exponential backoff for the given 1-based failed-attempt count.
    /// Jitter subtracts from the capped delay so it never exceeds the cap.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self
            .config
            .reconnect_base_delay
            .saturating_mul(1u32 << exponent);
        let capped = raw.min(self.config.reconnect_max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
        capped.saturating_sub(Duration::from_millis(jitter_ms))
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            tracing::debug!(?prev, ?next, "connection state changed");
        }
    }
}

impl GatewaySender for ConnectionManager {
    fn send(&self, event: ClientEvent) -> bool {
        if *self.state_tx.borrow() != ConnectionState::Connected {
            return false;
        }
        let Some(tx) = self.outbound.read().clone() else {
            return false;
        };
        let name = event.name();
        match tx.try_send(event.into_envelope()) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(event = name, %error, "outbound queue refused event");
                false
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }
}
