//! Wire formats carried over the task channel
//!
//! The channel itself only knows two things about frames: they are JSON
//! text, and the keep-alive frame is `{"type":"ping"}`. The task message
//! schema published by the backend lives here as well, for consumers that
//! want typed access to what the channel delivers.

mod messages;

pub use messages::*;
