//! Transport plugin building blocks.
//!
//! Concrete transports implement [`TransportSender`] or [`TransportReceiver`];
//! [`SenderPlugin`] and [`ReceiverPlugin`] turn a factory for either into a
//! full [`Plugin`](crate::Plugin) with component lifecycle management.

mod create_gate;
mod forwarder;
mod receiver_plugin;
mod sender_plugin;
mod traits;

pub use forwarder::{Forwarder, Transform};
pub use receiver_plugin::ReceiverPlugin;
pub use sender_plugin::SenderPlugin;
pub use traits::{
    ReceiverFactory, SenderFactory, StreamHandlerFactory, TransportReceiver, TransportSender,
};
