use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use parley_core::domain::chat::ChatId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredStatus {
    Sent,
    Cancelled,
}

/// An unprompted message that goes out after a randomized delay. The pipeline
/// only builds it; whoever owns the connection spawns it.
#[derive(Clone, Debug)]
pub struct DeferredMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub delay: Duration,
    cancel: CancellationToken,
}

impl DeferredMessage {
    pub fn new(chat_id: ChatId, text: String, delay: Duration, cancel: CancellationToken) -> Self {
        Self { chat_id, text, delay, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleeps for `delay` off the caller's task, then calls `send` unless
    /// cancelled first.
    pub fn spawn<F, Fut>(self, send: F) -> JoinHandle<DeferredStatus>
    where
        F: FnOnce(ChatId, String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(
                        event_name = "engine.autonomous.cancelled",
                        chat_id = self.chat_id.0,
                        "autonomous message cancelled before sending"
                    );
                    DeferredStatus::Cancelled
                }
                _ = tokio::time::sleep(self.delay) => {
                    send(self.chat_id, self.text).await;
                    DeferredStatus::Sent
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use parley_core::domain::chat::ChatId;

    use super::{DeferredMessage, DeferredStatus};

    fn recorder() -> Arc<Mutex<Vec<(ChatId, String)>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn message_is_sent_only_after_the_delay() {
        let sent = recorder();
        let sink = Arc::clone(&sent);
        let message = DeferredMessage::new(
            ChatId(100),
            "quiet in here".to_string(),
            Duration::from_secs(12),
            CancellationToken::new(),
        );

        let handle = message.spawn(move |chat, text| async move {
            sink.lock().expect("sent lock").push((chat, text));
        });

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(sent.lock().expect("sent lock").is_empty());

        assert_eq!(handle.await.expect("join"), DeferredStatus::Sent);
        assert_eq!(sent.lock().expect("sent lock").as_slice(), [(ChatId(100), "quiet in here".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_parent_token_drops_the_message() {
        let sent = recorder();
        let sink = Arc::clone(&sent);
        let shutdown = CancellationToken::new();
        let message = DeferredMessage::new(
            ChatId(100),
            "never".to_string(),
            Duration::from_secs(30),
            shutdown.child_token(),
        );

        let handle = message.spawn(move |chat, text| async move {
            sink.lock().expect("sent lock").push((chat, text));
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();

        assert_eq!(handle.await.expect("join"), DeferredStatus::Cancelled);
        assert!(sent.lock().expect("sent lock").is_empty());
    }
}
