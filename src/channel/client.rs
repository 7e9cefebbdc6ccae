//! Reconnecting task channel
//!
//! Provides a self-healing WebSocket channel with:
//! - Automatic reconnection with capped exponential backoff
//! - Heartbeat keep-alives while connected
//! - Connection state notifications
//!
//! [`TaskChannel`] is the consumer handle. It spawns one driver task that
//! owns the transport handle and both timers, and feeds every input through
//! a [`ChannelMachine`].

use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use super::machine::{ChannelMachine, Effect, Input};
use super::state::{ConnectionState, ReadyState};
use super::transport::{Connector, LinkEvents, Outbound, TransportEvent, WsConnector};
use crate::log_store::{LogSink, TracingSink};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for a task channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket URL of the endpoint
    pub endpoint: String,

    /// Backoff and attempt budget
    pub reconnect: ReconnectPolicy,

    /// Keep-alive interval while connected
    pub heartbeat_interval: Duration,

    /// Handshake timeout for the default WebSocket transport
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_millis(30_000),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────────

/// Callback for parsed inbound messages
pub type MessageHandler = Box<dyn FnMut(Value) + Send>;

/// Callback for connection state transitions
pub type StateHandler = Box<dyn FnMut(ConnectionState) + Send>;

/// Point-in-time view of the channel, readable from any thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub state: ConnectionState,
    pub ready_state: ReadyState,
    pub reconnect_attempts: u32,
    /// Budget spent with nothing scheduled; see [`TaskChannel::is_exhausted`]
    pub exhausted: bool,
    pub closed: bool,
}

/// Commands sent from the handle to the driver
#[derive(Debug)]
enum ChannelCommand {
    Connect,
    Send(String),
    Close,
}

/// Builder for [`TaskChannel`]
pub struct TaskChannelBuilder {
    config: ChannelConfig,
    on_message: MessageHandler,
    on_state_change: Option<StateHandler>,
    log: Option<Arc<dyn LogSink>>,
    connector: Option<Arc<dyn Connector>>,
}

impl TaskChannelBuilder {
    /// Observe every connection state transition
    pub fn on_state_change(mut self, handler: impl FnMut(ConnectionState) + Send + 'static) -> Self {
        self.on_state_change = Some(Box::new(handler));
        self
    }

    /// Route channel diagnostics to `sink` instead of `tracing`
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log = Some(sink);
        self
    }

    /// Replace the WebSocket transport
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Spawn the driver task and return the handle
    ///
    /// Must be called within a tokio runtime. The channel starts idle; no
    /// I/O happens until [`TaskChannel::connect`].
    pub fn build(self) -> TaskChannel {
        let log = self.log.unwrap_or_else(|| Arc::new(TracingSink));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new(self.config.connect_timeout)));

        let machine = ChannelMachine::new(
            self.config.endpoint.clone(),
            self.config.reconnect,
            self.config.heartbeat_interval,
            log,
        );

        let shared = Arc::new(RwLock::new(ChannelSnapshot::default()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = ChannelDriver {
            endpoint: self.config.endpoint.clone(),
            machine,
            connector,
            events_tx,
            link: None,
            reconnect_timer: None,
            heartbeat: None,
            on_message: self.on_message,
            on_state_change: self.on_state_change,
            shared: shared.clone(),
        };

        tokio::spawn(run_channel_loop(driver, command_rx, events_rx));

        TaskChannel {
            endpoint: self.config.endpoint,
            shared,
            command_tx,
        }
    }
}

/// Long-lived duplex channel to a task endpoint
///
/// Dropping the handle closes the channel.
pub struct TaskChannel {
    endpoint: String,
    shared: Arc<RwLock<ChannelSnapshot>>,
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
}

impl TaskChannel {
    /// Start building a channel; `on_message` receives every parsed frame
    pub fn builder(
        config: ChannelConfig,
        on_message: impl FnMut(Value) + Send + 'static,
    ) -> TaskChannelBuilder {
        TaskChannelBuilder {
            config,
            on_message: Box::new(on_message),
            on_state_change: None,
            log: None,
            connector: None,
        }
    }

    /// Open (or re-open) the connection
    ///
    /// Safe to call in any state; a live transport handle is torn down and
    /// replaced. After [`close`](Self::close) this does nothing.
    pub fn connect(&self) {
        self.command(ChannelCommand::Connect);
    }

    /// Write `payload` as a JSON text frame if the transport is open
    ///
    /// Never queued and never retried: while not connected the payload is
    /// dropped with a warning.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(frame) => self.command(ChannelCommand::Send(frame)),
            Err(e) => warn!(error = %e, "Failed to serialize outbound message; dropping"),
        }
    }

    /// Retire the channel: no further reconnects, timers or I/O
    ///
    /// Idempotent.
    pub fn close(&self) {
        self.shared.write().closed = true;
        self.command(ChannelCommand::Close);
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.read().state
    }

    /// Readiness of the current transport handle
    pub fn ready_state(&self) -> ReadyState {
        self.shared.read().ready_state
    }

    /// Consecutive failed attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.read().reconnect_attempts
    }

    pub fn is_closed(&self) -> bool {
        self.shared.read().closed
    }

    /// True once automatic reconnection has given up. Stays true until a
    /// manual [`connect`](Self::connect), unlike a transient `error`
    /// notification from a failed handshake that still has retries left.
    pub fn is_exhausted(&self) -> bool {
        self.shared.read().exhausted
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        *self.shared.read()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn command(&self, command: ChannelCommand) {
        // The driver only exits once closed, so a failed send has nothing to do
        if self.command_tx.send(command).is_err() {
            debug!("Channel driver already stopped");
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────

/// Owns the transport handle and timers; executes machine effects
struct ChannelDriver {
    endpoint: String,
    machine: ChannelMachine,
    connector: Arc<dyn Connector>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    link: Option<mpsc::UnboundedSender<Outbound>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    on_message: MessageHandler,
    on_state_change: Option<StateHandler>,
    shared: Arc<RwLock<ChannelSnapshot>>,
}

/// Main driver loop: one input at a time until the channel is closed
async fn run_channel_loop(
    mut driver: ChannelDriver,
    mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    mut events_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
) {
    info!(endpoint = %driver.endpoint, "Channel driver started");

    loop {
        let input = tokio::select! {
            command = command_rx.recv() => match command {
                Some(ChannelCommand::Connect) => Input::Connect,
                Some(ChannelCommand::Send(frame)) => Input::Send(frame),
                // A dropped handle counts as close()
                Some(ChannelCommand::Close) | None => Input::Close,
            },

            Some((generation, event)) = events_rx.recv() => Input::Transport { generation, event },

            _ = wait_for_reconnect(&mut driver.reconnect_timer) => Input::ReconnectTimerFired,

            _ = wait_for_heartbeat(&mut driver.heartbeat) => Input::HeartbeatTick,
        };

        driver.dispatch(input);

        if driver.machine.is_closed() {
            break;
        }
    }

    info!(endpoint = %driver.endpoint, "Channel driver terminated");
}

async fn wait_for_reconnect(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn wait_for_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

impl ChannelDriver {
    /// Run an input and every input its effects produce
    fn dispatch(&mut self, input: Input) {
        let mut inputs = VecDeque::from([input]);

        while let Some(input) = inputs.pop_front() {
            if matches!(input, Input::ReconnectTimerFired) {
                self.reconnect_timer = None;
            }
            for effect in self.machine.handle(input) {
                if let Some(follow_up) = self.apply(effect) {
                    inputs.push_back(follow_up);
                }
            }
        }

        self.publish();
    }

    fn apply(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::OpenTransport { generation } => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let events = LinkEvents::new(generation, self.events_tx.clone());

                match self.connector.open(&self.endpoint, events, outbound_rx) {
                    Ok(()) => self.link = Some(outbound_tx),
                    Err(e) => {
                        return Some(Input::OpenFailed {
                            generation,
                            reason: e.to_string(),
                        })
                    }
                }
            }

            Effect::CloseTransport => {
                if let Some(link) = self.link.take() {
                    let _ = link.send(Outbound::Close);
                }
            }

            Effect::Write(frame) => match &self.link {
                Some(link) => {
                    if link.send(Outbound::Text(frame)).is_err() {
                        debug!("Transport handle gone; frame dropped");
                    }
                }
                None => debug!("No transport handle; frame dropped"),
            },

            Effect::ScheduleReconnect { delay, attempt } => {
                debug!(delay_ms = delay.as_millis() as u64, attempt, "Arming reconnect timer");
                self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }

            Effect::CancelReconnect => {
                self.reconnect_timer = None;
            }

            Effect::StartHeartbeat { interval } => {
                let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);
            }

            Effect::StopHeartbeat => {
                self.heartbeat = None;
            }

            Effect::StateChanged(state) => {
                self.publish();
                self.shared.write().state = state;
                if let Some(handler) = self.on_state_change.as_mut() {
                    handler(state);
                }
            }

            Effect::Deliver(value) => (self.on_message)(value),
        }

        None
    }

    /// Copy the machine's view into the shared snapshot
    fn publish(&self) {
        let mut snapshot = self.shared.write();
        snapshot.state = self.machine.state();
        snapshot.ready_state = self.machine.ready_state();
        snapshot.reconnect_attempts = self.machine.reconnect_attempts();
        snapshot.exhausted = self.machine.is_exhausted();
        snapshot.closed |= self.machine.is_closed();
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
