//! Data models shared by plugins and the simulator core.
//!
//! Message types travel over the stream; manifest types describe what a
//! plugin offers and are queried before any component exists; registration
//! types are exchanged with the allocator at startup.

mod manifest;
mod message;
mod registration;

pub use manifest::*;
pub use message::*;
pub use registration::*;
