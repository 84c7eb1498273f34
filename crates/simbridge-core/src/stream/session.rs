//! Stream session driver.
//!
//! Runs the receive loop of one message stream and reacts per envelope tag:
//!
//! | Inbound      | Action                                                       |
//! |--------------|--------------------------------------------------------------|
//! | `init`       | install a sender (if supported), `on_init`; error ends loop  |
//! | `sim_message`| replies in order then `ack`, or a single `nak` on error      |
//! | `shutdown`   | `on_shutdown`, loop ends with success                        |
//! | end of stream| loop ends with success                                       |
//! | read error   | loop ends, error propagated                                  |
//! | other        | logged, ignored                                              |
//!
//! Envelopes are handled strictly in arrival order: every reply and the
//! matching `ack`/`nak` is written before the next envelope is read.

use super::envelope::Envelope;
use super::handler::StreamHandlerBinding;
use super::io::{EnvelopeSink, EnvelopeSource};
use super::sender::ComponentStreamSender;
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives one stream to completion.
pub struct StreamSession {
    binding: StreamHandlerBinding,
    sink: Arc<dyn EnvelopeSink>,
    bound_components: HashSet<String>,
}

impl StreamSession {
    pub fn new(binding: StreamHandlerBinding, sink: Arc<dyn EnvelopeSink>) -> Self {
        Self {
            binding,
            sink,
            bound_components: HashSet::new(),
        }
    }

    /// Convenience for `StreamSession::new(..).serve(source)`.
    pub async fn run<S: EnvelopeSource>(
        binding: StreamHandlerBinding,
        source: S,
        sink: Arc<dyn EnvelopeSink>,
    ) -> Result<()> {
        Self::new(binding, sink).serve(source).await
    }

    /// Pump envelopes from `source` until the stream ends.
    pub async fn serve<S: EnvelopeSource>(mut self, mut source: S) -> Result<()> {
        loop {
            let envelope = match source.recv().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    info!("Message stream closed by peer");
                    return Ok(());
                }
                Err(e) => {
                    error!("Message stream read failed: {}", e);
                    return Err(e);
                }
            };

            match envelope {
                Envelope::Init(init) => {
                    self.install_sender(&init.component_id);
                    if let Err(e) = self.binding.handler.on_init(&init).await {
                        error!("[{}] init failed: {}", init.component_id, e);
                        return Err(e);
                    }
                    info!("[{}] stream initialized", init.component_id);
                }
                Envelope::SimMessage(message) => {
                    let message_id = message.message_id.clone();
                    let component_id = message.component_id.clone();
                    match self.binding.handler.on_sim_message(message).await {
                        Ok(replies) => {
                            for reply in replies {
                                self.sink.send(Envelope::sim(reply)).await?;
                            }
                            self.sink.send(Envelope::ack(message_id)).await?;
                        }
                        Err(e) => {
                            warn!("[{}] message {} rejected: {}", component_id, message_id, e);
                            self.sink
                                .send(Envelope::nak(message_id, e.to_string()))
                                .await?;
                        }
                    }
                }
                Envelope::Shutdown(shutdown) => {
                    info!("Shutdown requested: {}", shutdown.reason);
                    self.binding.handler.on_shutdown(&shutdown.reason).await;
                    return Ok(());
                }
                other @ (Envelope::Ack(_) | Envelope::Nak(_)) => {
                    debug!("Ignoring inbound {} envelope", other.kind());
                }
                Envelope::Unknown => {
                    warn!("Ignoring envelope with unrecognized type");
                }
            }
        }
    }

    /// Hand a sender for `component_id` to the handler, once per stream.
    fn install_sender(&mut self, component_id: &str) {
        let Some(setter) = &self.binding.sender_setter else {
            return;
        };
        if !self.bound_components.insert(component_id.to_string()) {
            return;
        }
        let sender = ComponentStreamSender::new(component_id, self.sink.clone());
        setter.set_stream_sender(Arc::new(sender));
        debug!("[{}] stream sender installed", component_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PluginInit, SimMessage};
    use crate::stream::{DefaultStreamHandler, StreamHandler, StreamSender, StreamSenderSetter};
    use crate::testing::memory_stream;
    use crate::SimError;
    use std::sync::Mutex;

    /// Echoes each message back twice, rejects type "bad", fails init for "broken".
    #[derive(Default)]
    struct EchoHandler {
        events: Mutex<Vec<String>>,
        senders: Mutex<Vec<Arc<dyn StreamSender>>>,
    }

    impl EchoHandler {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl StreamHandler for EchoHandler {
        async fn on_init(&self, init: &PluginInit) -> Result<()> {
            self.events.lock().unwrap().push(format!("init:{}", init.component_id));
            if init.component_id == "broken" {
                return Err(SimError::handler("cannot init"));
            }
            Ok(())
        }

        async fn on_sim_message(&self, message: SimMessage) -> Result<Vec<SimMessage>> {
            self.events.lock().unwrap().push(format!("msg:{}", message.message_id));
            if message.message_type == "bad" {
                return Err(SimError::handler("boom"));
            }
            let first = SimMessage::new("echo", format!("{}-r1", message.message_id), &message.component_id);
            let second = SimMessage::new("echo", format!("{}-r2", message.message_id), &message.component_id);
            Ok(vec![first, second])
        }

        async fn on_shutdown(&self, reason: &str) {
            self.events.lock().unwrap().push(format!("shutdown:{}", reason));
        }
    }

    impl StreamSenderSetter for EchoHandler {
        fn set_stream_sender(&self, sender: Arc<dyn StreamSender>) {
            self.senders.lock().unwrap().push(sender);
        }
    }

    fn ids(envelopes: &[Envelope]) -> Vec<String> {
        envelopes
            .iter()
            .map(|e| match e {
                Envelope::SimMessage(m) => format!("sim:{}", m.message_id),
                Envelope::Ack(a) => format!("ack:{}", a.message_id),
                Envelope::Nak(n) => format!("nak:{}", n.message_id),
                other => other.kind().to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_replies_precede_ack_in_arrival_order() {
        let handler = Arc::new(EchoHandler::default());
        let (end, mut peer) = memory_stream();

        peer.send(Envelope::init("c1"));
        peer.send(Envelope::sim(SimMessage::new("t", "m1", "c1")));
        peer.send(Envelope::sim(SimMessage::new("bad", "m2", "c1")));
        peer.send(Envelope::sim(SimMessage::new("t", "m3", "c1")));
        peer.send(Envelope::shutdown("done"));

        let result = StreamSession::run(
            StreamHandlerBinding::with_sender(handler.clone()),
            end.source,
            end.sink,
        )
        .await;
        assert!(result.is_ok());

        let written = peer.drain();
        assert_eq!(
            ids(&written),
            vec![
                "sim:m1-r1", "sim:m1-r2", "ack:m1", "nak:m2", "sim:m3-r1", "sim:m3-r2", "ack:m3",
            ]
        );
        assert_eq!(
            handler.events(),
            vec!["init:c1", "msg:m1", "msg:m2", "msg:m3", "shutdown:done"]
        );
    }

    #[tokio::test]
    async fn test_nak_carries_stringified_error() {
        let handler = Arc::new(EchoHandler::default());
        let (end, mut peer) = memory_stream();

        peer.send(Envelope::sim(SimMessage::new("bad", "m9", "c1")));
        peer.close();

        StreamSession::run(StreamHandlerBinding::new(handler), end.source, end.sink)
            .await
            .unwrap();

        assert_eq!(
            peer.drain(),
            vec![Envelope::nak("m9", SimError::handler("boom").to_string())]
        );
    }

    #[tokio::test]
    async fn test_ack_sent_for_empty_reply_list() {
        let (end, mut peer) = memory_stream();
        peer.send(Envelope::sim(SimMessage::new("t", "m1", "ghost")));
        peer.close();

        let binding = StreamHandlerBinding::with_sender(Arc::new(DefaultStreamHandler::new()));
        StreamSession::run(binding, end.source, end.sink).await.unwrap();

        assert_eq!(peer.drain(), vec![Envelope::ack("m1")]);
    }

    #[tokio::test]
    async fn test_init_failure_aborts_session() {
        let handler = Arc::new(EchoHandler::default());
        let (end, mut peer) = memory_stream();

        peer.send(Envelope::init("broken"));
        peer.send(Envelope::sim(SimMessage::new("t", "m1", "broken")));

        let result =
            StreamSession::run(StreamHandlerBinding::new(handler.clone()), end.source, end.sink).await;

        assert!(matches!(result, Err(SimError::Handler(_))));
        assert_eq!(handler.events(), vec!["init:broken"]);
        assert!(peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let (end, peer) = memory_stream();
        peer.inject_error(SimError::Protocol {
            message: "bad frame".to_string(),
        });

        let binding = StreamHandlerBinding::new(Arc::new(DefaultStreamHandler::new()));
        let result = StreamSession::run(binding, end.source, end.sink).await;

        assert!(matches!(result, Err(SimError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_unknown_and_control_envelopes_are_skipped() {
        let handler = Arc::new(EchoHandler::default());
        let (end, mut peer) = memory_stream();

        peer.send(Envelope::Unknown);
        peer.send(Envelope::ack("stray"));
        peer.send(Envelope::sim(SimMessage::new("t", "m1", "c1")));
        peer.close();

        StreamSession::run(StreamHandlerBinding::new(handler.clone()), end.source, end.sink)
            .await
            .unwrap();

        assert_eq!(ids(&peer.drain()), vec!["sim:m1-r1", "sim:m1-r2", "ack:m1"]);
        assert_eq!(handler.events(), vec!["msg:m1"]);
    }

    #[tokio::test]
    async fn test_sender_installed_once_per_component() {
        let handler = Arc::new(EchoHandler::default());
        let (end, mut peer) = memory_stream();

        peer.send(Envelope::init("a"));
        peer.send(Envelope::init("b"));
        peer.send(Envelope::init("a"));
        peer.close();

        StreamSession::run(
            StreamHandlerBinding::with_sender(handler.clone()),
            end.source,
            end.sink,
        )
        .await
        .unwrap();

        let senders = handler.senders.lock().unwrap().clone();
        let bound: Vec<&str> = senders.iter().map(|s| s.component_id()).collect();
        assert_eq!(bound, vec!["a", "b"]);

        // The installed sender writes onto the same stream.
        senders[0].send(SimMessage::new("t", "push-1", "a")).await.unwrap();
        assert_eq!(ids(&peer.drain()), vec!["sim:push-1"]);
    }

    #[tokio::test]
    async fn test_plain_binding_never_receives_sender() {
        let handler = Arc::new(EchoHandler::default());
        let (end, mut peer) = memory_stream();
        peer.send(Envelope::init("a"));
        peer.close();

        StreamSession::run(StreamHandlerBinding::new(handler.clone()), end.source, end.sink)
            .await
            .unwrap();

        assert!(handler.senders.lock().unwrap().is_empty());
    }
}
