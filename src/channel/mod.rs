//! Reconnecting event channel
//!
//! A long-lived duplex JSON channel to a task endpoint that survives
//! transport drops: it retries with capped exponential backoff, keeps the
//! connection warm with heartbeats, and reports every state transition to
//! the consumer.
//!
//! Layout:
//! - [`state`]: connection and transport readiness states
//! - [`backoff`]: reconnect policy and attempt counter
//! - [`transport`]: transport abstraction and the WebSocket connector
//! - [`machine`]: the I/O-free lifecycle state machine
//! - [`client`]: the consumer handle and the driver task

pub mod backoff;
pub mod client;
pub mod machine;
pub mod state;
pub mod transport;

pub use backoff::{ChannelBackoff, ReconnectPolicy};
pub use client::{
    ChannelConfig, ChannelSnapshot, MessageHandler, StateHandler, TaskChannel, TaskChannelBuilder,
};
pub use machine::{ChannelMachine, Effect, Input};
pub use state::{ConnectionState, ReadyState};
pub use transport::{
    parse_endpoint, task_endpoint, Connector, LinkEvents, Outbound, TransportEvent, WsConnector,
};
