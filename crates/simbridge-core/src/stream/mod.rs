//! Message stream protocol.
//!
//! - `envelope`: the tagged wire unit and its codec
//! - `io`: sink/source halves over framed byte streams
//! - `sender`: component-bound outbound capability
//! - `handler`: handler contracts and stock handlers
//! - `session`: the receive-loop driver

mod envelope;
mod handler;
mod io;
mod sender;
mod session;

pub use envelope::{decode_envelope, encode_envelope, Envelope};
pub use handler::{DefaultStreamHandler, NoOpStreamHandler, StreamHandler, StreamHandlerBinding};
pub use io::{EnvelopeSink, EnvelopeSource, FramedSink, FramedSource};
pub use sender::{ComponentStreamSender, StreamSender, StreamSenderSetter};
pub use session::StreamSession;
