//! Lifecycle signals and the workers that consume them.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::event::MailboxEvent;

/// What the supervisor tells its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A session for the identity is registered and idling.
    Connected(String),
    /// The session for the identity is gone.
    Disconnected(String),
    /// A new message arrived.
    Event(MailboxEvent),
}

/// Sending half of the signal queue. Unbounded, so the idle loop never
/// waits on a slow consumer.
pub type SignalSender = mpsc::UnboundedSender<Signal>;

/// Receiving half of the signal queue.
pub type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

/// Creates a signal queue.
#[must_use]
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}

/// Consumer of lifecycle signals.
pub trait SignalHandler: Send + Sync + 'static {
    /// Called when a session connects.
    fn on_connect(&self, identity: &str) {
        tracing::info!(%identity, "session connected");
    }

    /// Called when a session disconnects.
    fn on_disconnect(&self, identity: &str) {
        tracing::info!(%identity, "session disconnected");
    }

    /// Called once per event, on its own task.
    fn on_event(&self, event: MailboxEvent) -> impl Future<Output = ()> + Send;
}

/// Drains `signals` until every sender is gone.
///
/// Lifecycle callbacks run inline, in order. Each event is handed to its own
/// task, so one slow handler never delays the next.
pub async fn run_signal_worker<H: SignalHandler>(mut signals: SignalReceiver, handler: Arc<H>) {
    while let Some(signal) = signals.recv().await {
        match signal {
            Signal::Connected(identity) => handler.on_connect(&identity),
            Signal::Disconnected(identity) => handler.on_disconnect(&identity),
            Signal::Event(event) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    handler.on_event(event).await;
                });
            }
        }
    }
    tracing::debug!("signal queue closed");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::header::ParsedHeader;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl SignalHandler for Recorder {
        fn on_connect(&self, identity: &str) {
            self.seen.lock().unwrap().push(format!("connect {identity}"));
        }

        fn on_disconnect(&self, identity: &str) {
            self.seen.lock().unwrap().push(format!("disconnect {identity}"));
        }

        async fn on_event(&self, event: MailboxEvent) {
            if event.mail_id == "1" {
                // A slow handler must not hold up the next event.
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.seen.lock().unwrap().push(format!("event {}", event.mail_id));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_order_and_concurrency() {
        let (tx, rx) = signal_channel();
        let handler = Arc::new(Recorder::default());
        let worker = tokio::spawn(run_signal_worker(rx, Arc::clone(&handler)));

        let event = |id: &str| MailboxEvent::new("a@b.org", id, ParsedHeader::default());
        tx.send(Signal::Connected("a@b.org".to_string())).unwrap();
        tx.send(Signal::Event(event("1"))).unwrap();
        tx.send(Signal::Event(event("2"))).unwrap();
        tx.send(Signal::Disconnected("a@b.org".to_string())).unwrap();
        drop(tx);
        worker.await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        {
            let seen = handler.seen.lock().unwrap();
            assert_eq!(seen[0], "connect a@b.org");
            assert!(seen.contains(&"event 2".to_string()));
            assert!(!seen.contains(&"event 1".to_string()));
        }

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(handler.seen.lock().unwrap().contains(&"event 1".to_string()));
    }
}
