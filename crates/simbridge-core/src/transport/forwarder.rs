//! Receiver-to-core relay.
//!
//! A forwarder drains one receiver's inbound queue and pushes each message
//! upstream through a [`StreamSender`], optionally transforming it first. It
//! runs as its own task and stops as soon as the queue closes or the
//! cancellation token fires, whichever comes first.

use crate::models::SimMessage;
use crate::stream::StreamSender;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-message transform applied before sending.
///
/// The message may be mutated in place. Returning `Some` substitutes a
/// different message; returning `None` sends the (possibly mutated) original.
pub type Transform = Arc<dyn Fn(&mut SimMessage) -> Option<SimMessage> + Send + Sync>;

pub struct Forwarder;

impl Forwarder {
    /// Relay `inbound` to a fixed `sender`.
    ///
    /// The task resolves to the number of messages sent successfully.
    pub fn start(
        cancel: CancellationToken,
        inbound: mpsc::Receiver<SimMessage>,
        sender: Arc<dyn StreamSender>,
        transform: Option<Transform>,
    ) -> JoinHandle<usize> {
        let label = sender.component_id().to_string();
        Self::start_resolving(label, cancel, inbound, move || Some(sender.clone()), transform)
    }

    /// Relay `inbound` to whichever sender `resolve` yields at the time each
    /// message arrives. Messages arriving while no sender is bound are skipped.
    pub fn start_resolving<F>(
        component_id: String,
        cancel: CancellationToken,
        mut inbound: mpsc::Receiver<SimMessage>,
        resolve: F,
        transform: Option<Transform>,
    ) -> JoinHandle<usize>
    where
        F: Fn() -> Option<Arc<dyn StreamSender>> + Send + 'static,
    {
        tokio::spawn(async move {
            info!("[{}] starting message forward loop", component_id);
            let mut relayed = 0usize;

            loop {
                let mut message = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("[{}] forwarder cancelled", component_id);
                        break;
                    }
                    next = inbound.recv() => match next {
                        Some(message) => message,
                        None => {
                            info!("[{}] inbound queue closed", component_id);
                            break;
                        }
                    },
                };
                debug!("[{}] received {} from transport", component_id, message.message_id);

                if let Some(transform) = &transform {
                    if let Some(replacement) = transform(&mut message) {
                        message = replacement;
                    }
                }

                let Some(sender) = resolve() else {
                    warn!(
                        "[{}] no stream bound; dropping message {}",
                        component_id, message.message_id
                    );
                    continue;
                };

                let message_id = message.message_id.clone();
                match sender.send(message).await {
                    Ok(()) => relayed += 1,
                    Err(e) => warn!(
                        "[{}] failed to stream {} to core: {}",
                        component_id, message_id, e
                    ),
                }
            }

            relayed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSender;
    use std::time::Duration;

    fn msg(id: &str) -> SimMessage {
        SimMessage::new("t", id, "rx-1")
    }

    #[tokio::test]
    async fn test_relays_all_queued_messages_in_order() {
        let (tx, rx) = mpsc::channel(16);
        let sender = RecordingSender::new("rx-1");

        for i in 0..5 {
            tx.send(msg(&format!("m{}", i))).await.unwrap();
        }
        drop(tx);

        let relayed = Forwarder::start(CancellationToken::new(), rx, sender.clone(), None)
            .await
            .unwrap();

        assert_eq!(relayed, 5);
        assert_eq!(sender.sent_ids(), vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_transform_mutation_is_visible() {
        let (tx, rx) = mpsc::channel(4);
        let sender = RecordingSender::new("rx-1");
        let transform: Transform = Arc::new(|m: &mut SimMessage| -> Option<SimMessage> {
            m.metadata.insert("via".to_string(), "forwarder".to_string());
            None
        });

        tx.send(msg("m1")).await.unwrap();
        drop(tx);

        Forwarder::start(CancellationToken::new(), rx, sender.clone(), Some(transform))
            .await
            .unwrap();

        let sent = sender.sent();
        assert_eq!(sent[0].message_id, "m1");
        assert_eq!(sent[0].metadata.get("via").map(String::as_str), Some("forwarder"));
    }

    #[tokio::test]
    async fn test_transform_substitution_replaces_message() {
        let (tx, rx) = mpsc::channel(4);
        let sender = RecordingSender::new("rx-1");
        let transform: Transform =
            Arc::new(|m: &mut SimMessage| Some(SimMessage::new("wrapped", &m.message_id, "rx-1")));

        tx.send(msg("m1")).await.unwrap();
        drop(tx);

        Forwarder::start(CancellationToken::new(), rx, sender.clone(), Some(transform))
            .await
            .unwrap();

        let sent = sender.sent();
        assert_eq!(sent[0].message_type, "wrapped");
        assert_eq!(sent[0].message_id, "m1");
    }

    #[tokio::test]
    async fn test_no_sends_after_cancellation() {
        let (tx, rx) = mpsc::channel(16);
        let sender = RecordingSender::new("rx-1");
        let cancel = CancellationToken::new();

        let handle = Forwarder::start(cancel.clone(), rx, sender.clone(), None);
        for i in 0..3 {
            tx.send(msg(&format!("m{}", i))).await.unwrap();
        }
        assert!(sender.wait_for(3, Duration::from_secs(2)).await);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 3);

        // The queue outlives the task; nothing more is relayed.
        let _ = tx.send(msg("late")).await;
        tokio::task::yield_now().await;
        assert_eq!(sender.sent_ids(), vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_send_failures_are_logged_and_skipped() {
        let (tx, rx) = mpsc::channel(4);
        let sender = RecordingSender::new("rx-1");
        sender.fail_sends(true);

        tx.send(msg("m1")).await.unwrap();
        tx.send(msg("m2")).await.unwrap();
        drop(tx);

        let relayed = Forwarder::start(CancellationToken::new(), rx, sender.clone(), None)
            .await
            .unwrap();

        assert_eq!(relayed, 0);
        assert_eq!(sender.sent_ids(), vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_resolving_forwarder_skips_until_bound() {
        let (tx, rx) = mpsc::channel(4);
        let sender = RecordingSender::new("rx-1");
        let slot: Arc<std::sync::Mutex<Option<Arc<dyn StreamSender>>>> = Default::default();

        let resolver_slot = slot.clone();
        let handle = Forwarder::start_resolving(
            "rx-1".to_string(),
            CancellationToken::new(),
            rx,
            move || resolver_slot.lock().unwrap().clone(),
            None,
        );

        tx.send(msg("early")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        *slot.lock().unwrap() = Some(sender.clone() as Arc<dyn StreamSender>);
        tx.send(msg("late")).await.unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 1);
        assert_eq!(sender.sent_ids(), vec!["late"]);
    }
}
