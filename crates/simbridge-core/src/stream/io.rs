//! Inbound and outbound halves of a message stream.
//!
//! The outbound half is shared: replies from the session driver and
//! unsolicited sends from any number of [`StreamSender`](super::StreamSender)s
//! go through the same sink, one envelope at a time. The inbound half is owned
//! exclusively by the session's receive loop.

use super::envelope::{decode_envelope, encode_envelope, Envelope};
use crate::rpc::protocol::{read_frame, write_frame};
use crate::{Result, SimError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Outbound half of a stream.
#[async_trait::async_trait]
pub trait EnvelopeSink: Send + Sync + 'static {
    /// Write one envelope. Concurrent callers are serialized.
    async fn send(&self, envelope: Envelope) -> Result<()>;
}

/// Inbound half of a stream.
#[async_trait::async_trait]
pub trait EnvelopeSource: Send {
    /// Next envelope, `Ok(None)` when the peer closed the stream cleanly.
    async fn recv(&mut self) -> Result<Option<Envelope>>;
}

/// Frame-encoding sink over any async writer (a TCP write half in practice).
pub struct FramedSink<W> {
    writer: Mutex<W>,
}

impl<W> FramedSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: AsyncWrite + Unpin> FramedSink<W> {
    /// Half-close the writer so the peer reads a clean end of stream.
    pub async fn shutdown(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<W> EnvelopeSink for FramedSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, envelope: Envelope) -> Result<()> {
        let bytes = encode_envelope(&envelope)?;
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &bytes)
            .await
            .map_err(|e| match e {
                SimError::Io { .. } => SimError::StreamClosed,
                other => other,
            })
    }
}

/// Frame-decoding source over any async reader.
pub struct FramedSource<R> {
    reader: R,
}

impl<R> FramedSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait::async_trait]
impl<R> EnvelopeSource for FramedSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Envelope>> {
        match read_frame(&mut self.reader).await? {
            Some(frame) => decode_envelope(&frame).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SimMessage;

    #[tokio::test]
    async fn test_framed_sink_and_source_roundtrip() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, client_write) = tokio::io::split(client);

        let sink = FramedSink::new(client_write);
        let mut source = FramedSource::new(server_read);

        sink.send(Envelope::init("c1")).await.unwrap();
        sink.send(Envelope::sim(SimMessage::new("t", "m1", "c1")))
            .await
            .unwrap();

        assert_eq!(source.recv().await.unwrap(), Some(Envelope::init("c1")));
        match source.recv().await.unwrap() {
            Some(Envelope::SimMessage(msg)) => assert_eq!(msg.message_id, "m1"),
            other => panic!("expected sim_message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sink_shutdown_is_clean_close_for_peer() {
        let (client, server) = tokio::io::duplex(256);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, client_write) = tokio::io::split(client);

        let sink = FramedSink::new(client_write);
        let mut source = FramedSource::new(server_read);

        sink.send(Envelope::shutdown("bye")).await.unwrap();
        sink.shutdown().await.unwrap();

        assert_eq!(source.recv().await.unwrap(), Some(Envelope::shutdown("bye")));
        assert_eq!(source.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_framed_source_clean_close_returns_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let mut source = FramedSource::new(server);
        assert_eq!(source.recv().await.unwrap(), None);
    }
}
