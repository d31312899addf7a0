use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::domain::chat::ChatId;
use parley_core::domain::trigger::TriggerResponse;

use crate::events::{InboundEnvelope, InboundEvent};
use crate::workers::ChatWorkers;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Text(String),
    /// A stored trigger response, forwarded as-is.
    Response(TriggerResponse),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMessage {
    pub chat_id: ChatId,
    pub reply_to_message_id: Option<i64>,
    pub payload: Payload,
}

impl OutgoingMessage {
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self { chat_id, reply_to_message_id: None, payload: Payload::Text(text.into()) }
    }

    pub fn reply(chat_id: ChatId, message_id: i64, text: impl Into<String>) -> Self {
        Self { chat_id, reply_to_message_id: Some(message_id), payload: Payload::Text(text.into()) }
    }

    pub fn text_body(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::Response(response) => response.as_text(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Connection to the chat platform. Implementations live outside this
/// workspace.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the platform closed the stream.
    async fn next_envelope(&self) -> Result<Option<InboundEnvelope>, TransportError>;
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl ChatTransport for NoopTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<InboundEnvelope>, TransportError> {
        Ok(None)
    }

    async fn send(&self, _message: &OutgoingMessage) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Pulls updates off the transport and fans messages out to per-chat workers.
///
/// Transport failures are retried with exponential backoff. The retry budget
/// resets once a connection has delivered at least one update.
pub struct GatewayRunner {
    transport: Arc<dyn ChatTransport>,
    workers: Arc<ChatWorkers>,
    reconnect_policy: ReconnectPolicy,
}

impl GatewayRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        workers: Arc<ChatWorkers>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, workers, reconnect_policy }
    }

    /// Returns when the stream closes, `shutdown` fires, or retries run out.
    pub async fn start(&self, shutdown: &CancellationToken) {
        let mut attempt = 0;
        loop {
            let mut received = 0_u64;
            let Err(transport_error) = self.connect_and_pump(attempt, shutdown, &mut received).await
            else {
                return;
            };
            if received > 0 {
                attempt = 0;
            }

            warn!(
                event_name = "ingress.gateway.transport_failed",
                attempt,
                max_retries = self.reconnect_policy.max_retries,
                error = %transport_error,
                "gateway transport failed"
            );

            if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    event_name = "ingress.gateway.retries_exhausted",
                    max_retries = self.reconnect_policy.max_retries,
                    "gateway retries exhausted; continuing process without crash"
                );
                return;
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            attempt += 1;
        }
    }

    async fn connect_and_pump(
        &self,
        attempt: u32,
        shutdown: &CancellationToken,
        received: &mut u64,
    ) -> Result<(), TransportError> {
        info!(attempt, "opening gateway transport connection");
        self.transport.connect().await?;
        info!(attempt, "gateway transport connected");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(event_name = "ingress.gateway.shutdown", "shutdown requested; closing transport");
                    self.transport.disconnect().await?;
                    return Ok(());
                }
                next = self.transport.next_envelope() => next?,
            };
            let Some(envelope) = next else {
                info!(attempt, "gateway transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            *received += 1;

            debug!(
                event_name = "ingress.gateway.update_received",
                update_id = %envelope.update_id,
                event_type = envelope.event.event_type(),
                chat_id = envelope.event.chat_id().map(|chat| chat.0),
                correlation_id = %envelope.update_id,
                "received gateway update"
            );

            match envelope.event {
                InboundEvent::Message(message) => self.workers.dispatch(message.into_context()),
                InboundEvent::Unsupported { event_type } => debug!(
                    event_name = "ingress.gateway.update_ignored",
                    update_id = %envelope.update_id,
                    event_type = %event_type,
                    "unsupported update ignored"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{GatewayRunner, ReconnectPolicy, TransportError};
    use crate::testing::{envelope, group_message, ScriptedTransport, TestEngine};

    fn no_delay(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy { max_retries: 10, base_delay_ms: 250, max_delay_ms: 1_500 };

        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(1_500));
        assert_eq!(policy.backoff(40), Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(envelope("u-1", group_message(1, "ping!!")))), Ok(None)],
        ));
        let engine = TestEngine::build(transport.clone()).await;
        engine.add_trigger("ping").await;

        let runner = GatewayRunner::new(transport.clone(), engine.workers.clone(), no_delay(2));
        runner.start(&CancellationToken::new()).await;
        engine.workers.drain().await;

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.disconnect_calls().await, 1);
        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text_body(), Some("ping response"));
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));
        let engine = TestEngine::build(transport.clone()).await;

        let runner = GatewayRunner::new(transport.clone(), engine.workers.clone(), no_delay(2));
        runner.start(&CancellationToken::new()).await;

        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn delivered_updates_reset_the_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(()), Ok(())],
            vec![
                Ok(Some(envelope("u-1", group_message(1, "hello")))),
                Err(TransportError::Receive("reset by peer".to_owned())),
                Ok(Some(envelope("u-2", group_message(2, "hello again")))),
                Err(TransportError::Receive("reset by peer".to_owned())),
                Ok(None),
            ],
        ));
        let engine = TestEngine::build(transport.clone()).await;

        let runner = GatewayRunner::new(transport.clone(), engine.workers.clone(), no_delay(1));
        runner.start(&CancellationToken::new()).await;

        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn shutdown_closes_the_transport() {
        let transport = Arc::new(ScriptedTransport::default());
        let engine = TestEngine::build(transport.clone()).await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let runner = GatewayRunner::new(transport.clone(), engine.workers.clone(), no_delay(0));
        runner.start(&shutdown).await;

        assert_eq!(transport.connect_attempts().await, 1);
        assert_eq!(transport.disconnect_calls().await, 1);
    }
}
