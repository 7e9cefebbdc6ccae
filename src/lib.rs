//! taskwire - reconnecting event channel for task progress streams
//!
//! The library half of the `taskwire` binary. [`channel::TaskChannel`] keeps
//! a JSON channel to a task endpoint alive across transport failures;
//! [`protocol`] gives a typed view of the messages that flow over it.

pub mod channel;
pub mod config;
pub mod error;
pub mod log_store;
pub mod logging;
pub mod protocol;
pub mod version;

pub use channel::{task_endpoint, ChannelConfig, ConnectionState, ReadyState, TaskChannel};
pub use error::{Error, ErrorCode, Result};
pub use log_store::{LogLevel, LogSink, LogStore, TracingSink};
