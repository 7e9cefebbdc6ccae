//! Connection lifecycle state machine
//!
//! [`ChannelMachine`] holds every decision the channel makes and performs
//! no I/O. It consumes one [`Input`] at a time and answers with the
//! [`Effect`]s the driver must carry out (open or close a transport handle,
//! arm or cancel a timer, write a frame, notify the consumer). Keeping it
//! free of sockets and clocks is what makes the reconnection and heartbeat
//! rules testable step by step.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use serde_json::{json, Value};

use super::backoff::{ChannelBackoff, ReconnectPolicy};
use super::state::{ConnectionState, ReadyState};
use super::transport::TransportEvent;
use crate::log_store::{LogLevel, LogSink};
use crate::protocol::ControlFrame;

const LOG_SOURCE: &str = "TaskChannel";

/// Longest slice of a malformed frame kept in the parse failure log
const MAX_LOGGED_FRAME: usize = 256;

/// Everything that can drive the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Consumer asked to (re)open the channel
    Connect,
    /// The transport handle for `generation` could not be constructed
    OpenFailed { generation: u64, reason: String },
    /// The transport handle for `generation` reported an event
    Transport { generation: u64, event: TransportEvent },
    /// The pending reconnect timer elapsed
    ReconnectTimerFired,
    /// The heartbeat interval elapsed
    HeartbeatTick,
    /// Consumer wants this serialized frame written
    Send(String),
    /// Consumer retired the channel
    Close,
}

/// Work the driver must perform, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Construct a new transport handle tagged with `generation`
    OpenTransport { generation: u64 },
    /// Close and drop the current transport handle
    CloseTransport,
    /// Write a text frame to the current transport handle
    Write(String),
    /// Arm the single-shot reconnect timer
    ScheduleReconnect { delay: Duration, attempt: u32 },
    /// Disarm the reconnect timer
    CancelReconnect,
    /// Arm the recurring heartbeat timer
    StartHeartbeat { interval: Duration },
    /// Disarm the heartbeat timer
    StopHeartbeat,
    /// Tell the consumer about a state transition
    StateChanged(ConnectionState),
    /// Hand a parsed inbound message to the consumer
    Deliver(Value),
}

/// Connection lifecycle for one logical channel
pub struct ChannelMachine {
    endpoint: String,
    heartbeat_interval: Duration,
    backoff: ChannelBackoff,
    state: ConnectionState,
    ready_state: ReadyState,
    generation: u64,
    has_link: bool,
    should_reconnect: bool,
    closed: bool,
    reconnect_pending: bool,
    heartbeat_running: bool,
    log: Arc<dyn LogSink>,
}

impl ChannelMachine {
    pub fn new(
        endpoint: impl Into<String>,
        policy: ReconnectPolicy,
        heartbeat_interval: Duration,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            heartbeat_interval,
            backoff: ChannelBackoff::new(policy),
            state: ConnectionState::Disconnected,
            ready_state: ReadyState::Closed,
            generation: 0,
            has_link: false,
            should_reconnect: true,
            closed: false,
            reconnect_pending: false,
            heartbeat_running: false,
            log,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Delay the next scheduled reconnect would use
    pub fn current_delay(&self) -> Duration {
        self.backoff.current_delay()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat_running
    }

    /// In `error` with the budget spent and nothing scheduled; only a
    /// manual `connect()` leaves this
    pub fn is_exhausted(&self) -> bool {
        !self.closed
            && self.state == ConnectionState::Error
            && self.ready_state != ReadyState::Connecting
            && !self.reconnect_pending
            && !self.backoff.has_budget()
    }

    /// Apply one input and return the effects it requires
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();

        match input {
            Input::Connect => self.connect(&mut effects),
            Input::OpenFailed { generation, reason } => {
                if self.is_current(generation) && self.ready_state == ReadyState::Connecting {
                    self.on_open_failed(reason, &mut effects);
                }
            }
            Input::Transport { generation, event } => {
                if self.is_current(generation) {
                    self.on_transport_event(event, &mut effects);
                } else {
                    self.log.debug(
                        LOG_SOURCE,
                        &format!("Ignoring event from stale transport generation {}", generation),
                    );
                }
            }
            Input::ReconnectTimerFired => self.on_reconnect_timer(&mut effects),
            Input::HeartbeatTick => self.on_heartbeat(&mut effects),
            Input::Send(frame) => self.send(frame, &mut effects),
            Input::Close => self.close(&mut effects),
        }

        effects
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.closed && self.has_link && generation == self.generation
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    fn connect(&mut self, effects: &mut Vec<Effect>) {
        if self.closed {
            self.log.warn(LOG_SOURCE, "connect() called on a closed channel; ignoring");
            return;
        }

        // A manual connect supersedes any reconnect still waiting
        self.cancel_reconnect(effects);
        self.stop_heartbeat(effects);
        if self.has_link {
            effects.push(Effect::CloseTransport);
            self.has_link = false;
        }

        self.generation += 1;
        self.has_link = true;
        self.ready_state = ReadyState::Connecting;
        self.log.info(LOG_SOURCE, &format!("Connecting to {}", self.endpoint));
        self.set_state(ConnectionState::Connecting, effects);
        effects.push(Effect::OpenTransport {
            generation: self.generation,
        });
    }

    fn on_open_failed(&mut self, reason: String, effects: &mut Vec<Effect>) {
        self.has_link = false;
        self.ready_state = ReadyState::Closed;
        self.log.error(
            LOG_SOURCE,
            "Could not create transport",
            Some(json!({ "endpoint": self.endpoint, "reason": reason })),
        );
        if self.state != ConnectionState::Error {
            self.set_state(ConnectionState::Error, effects);
        }

        if self.should_reconnect && self.backoff.has_budget() {
            self.schedule_reconnect(effects);
        } else {
            self.log_exhausted();
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent, effects: &mut Vec<Effect>) {
        match event {
            TransportEvent::Open if self.state != ConnectionState::Connecting => {
                self.log.debug(
                    LOG_SOURCE,
                    &format!("Ignoring open event while {}", self.state),
                );
            }

            TransportEvent::Open => {
                self.ready_state = ReadyState::Open;
                self.backoff.reset();
                self.log.info(LOG_SOURCE, "Connection established");
                self.set_state(ConnectionState::Connected, effects);
                self.start_heartbeat(effects);
            }

            TransportEvent::Message(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => effects.push(Effect::Deliver(value)),
                Err(e) => {
                    let frame: String = text.chars().take(MAX_LOGGED_FRAME).collect();
                    self.log.error(
                        LOG_SOURCE,
                        "Failed to parse inbound message",
                        Some(json!({ "error": e.to_string(), "frame": frame })),
                    );
                }
            },

            TransportEvent::Error(reason) => {
                self.log.error(
                    LOG_SOURCE,
                    "Transport error",
                    Some(json!({ "reason": reason, "state": self.state })),
                );
                // While open, the close that follows takes the state edge
                if self.state == ConnectionState::Connecting {
                    self.set_state(ConnectionState::Error, effects);
                }
            }

            TransportEvent::Closed { code, reason } => {
                self.has_link = false;
                self.ready_state = ReadyState::Closed;
                self.stop_heartbeat(effects);
                self.log.log(
                    LogLevel::Info,
                    LOG_SOURCE,
                    &format!("Connection closed (code {})", code),
                    (!reason.is_empty()).then(|| json!({ "reason": reason })),
                );
                self.set_state(ConnectionState::Disconnected, effects);

                if self.should_reconnect && self.backoff.has_budget() {
                    self.schedule_reconnect(effects);
                } else if !self.backoff.has_budget() {
                    self.log_exhausted();
                    self.set_state(ConnectionState::Error, effects);
                }
            }
        }
    }

    fn close(&mut self, effects: &mut Vec<Effect>) {
        if self.closed {
            self.log.debug(LOG_SOURCE, "close() called again; already closed");
            return;
        }

        self.closed = true;
        self.should_reconnect = false;
        self.stop_heartbeat(effects);
        self.cancel_reconnect(effects);
        if self.has_link {
            effects.push(Effect::CloseTransport);
            self.has_link = false;
        }
        self.ready_state = ReadyState::Closed;
        self.log.info(LOG_SOURCE, "Channel closed by consumer");
    }

    // ─────────────────────────────────────────────────────────────
    // Reconnection
    // ─────────────────────────────────────────────────────────────

    fn schedule_reconnect(&mut self, effects: &mut Vec<Effect>) {
        self.cancel_reconnect(effects);

        let Some(delay) = self.backoff.next_backoff() else {
            return;
        };
        let attempt = self.backoff.attempts();
        self.log.info(
            LOG_SOURCE,
            &format!(
                "Reconnect attempt {}/{} in {}ms",
                attempt,
                self.backoff.policy().max_attempts,
                delay.as_millis()
            ),
        );
        self.reconnect_pending = true;
        effects.push(Effect::ScheduleReconnect { delay, attempt });
    }

    fn cancel_reconnect(&mut self, effects: &mut Vec<Effect>) {
        if self.reconnect_pending {
            effects.push(Effect::CancelReconnect);
            self.reconnect_pending = false;
        }
    }

    fn on_reconnect_timer(&mut self, effects: &mut Vec<Effect>) {
        if self.closed || !self.reconnect_pending {
            return;
        }
        self.reconnect_pending = false;
        self.log.info(
            LOG_SOURCE,
            &format!(
                "Reconnecting ({}/{})",
                self.backoff.attempts(),
                self.backoff.policy().max_attempts
            ),
        );
        self.connect(effects);
    }

    fn log_exhausted(&self) {
        self.log.log(
            LogLevel::Error,
            LOG_SOURCE,
            "Reconnect budget exhausted; call connect() to resume",
            Some(json!({
                "endpoint": self.endpoint,
                "attempts": self.backoff.attempts(),
            })),
        );
    }

    // ─────────────────────────────────────────────────────────────
    // Heartbeat and outbound frames
    // ─────────────────────────────────────────────────────────────

    fn start_heartbeat(&mut self, effects: &mut Vec<Effect>) {
        self.stop_heartbeat(effects);
        self.heartbeat_running = true;
        effects.push(Effect::StartHeartbeat {
            interval: self.heartbeat_interval,
        });
    }

    fn stop_heartbeat(&mut self, effects: &mut Vec<Effect>) {
        if self.heartbeat_running {
            effects.push(Effect::StopHeartbeat);
            self.heartbeat_running = false;
        }
    }

    fn on_heartbeat(&mut self, effects: &mut Vec<Effect>) {
        if self.closed || !self.heartbeat_running || self.ready_state != ReadyState::Open {
            return;
        }
        effects.push(Effect::Write(ControlFrame::Ping.to_json()));
    }

    fn send(&mut self, frame: String, effects: &mut Vec<Effect>) {
        if self.closed || self.ready_state != ReadyState::Open {
            self.log.warn(LOG_SOURCE, "Channel not connected; dropping outbound message");
            return;
        }
        effects.push(Effect::Write(frame));
    }

    fn set_state(&mut self, next: ConnectionState, effects: &mut Vec<Effect>) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.log.debug(LOG_SOURCE, &format!("State {} -> {}", self.state, next));
        self.state = next;
        effects.push(Effect::StateChanged(next));
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
