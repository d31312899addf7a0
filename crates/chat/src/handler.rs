use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use parley_agent::pipeline::{DecisionPipeline, Outcome};
use parley_core::domain::message::DecisionContext;

use crate::commands::CommandRouter;
use crate::gateway::{ChatTransport, OutgoingMessage, Payload};

/// Runs one message through the pipeline and carries out the outcome on the
/// transport.
pub struct MessageHandler {
    pipeline: Arc<DecisionPipeline>,
    commands: Arc<CommandRouter>,
    transport: Arc<dyn ChatTransport>,
    shutdown: CancellationToken,
}

impl MessageHandler {
    pub fn new(
        pipeline: Arc<DecisionPipeline>,
        commands: Arc<CommandRouter>,
        transport: Arc<dyn ChatTransport>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { pipeline, commands, transport, shutdown }
    }

    pub async fn handle(&self, ctx: DecisionContext) -> Outcome {
        let span = info_span!(
            "message",
            correlation_id = %Uuid::new_v4(),
            chat_id = ctx.chat_id.0,
            message_id = ctx.message_id
        );
        self.handle_inner(ctx).instrument(span).await
    }

    async fn handle_inner(&self, ctx: DecisionContext) -> Outcome {
        let outcome = self.pipeline.evaluate(&ctx, &self.shutdown).await;

        match &outcome {
            // A notice on every message in an unlisted group would flood it.
            Outcome::Denied { notice: Some(notice) } if ctx.is_private() => {
                self.send(OutgoingMessage::text(ctx.chat_id, notice.clone())).await;
            }
            Outcome::Command(command) => {
                if let Some(reply) = self.commands.route(&ctx, command).await {
                    self.send(OutgoingMessage::reply(ctx.chat_id, ctx.message_id, reply)).await;
                }
            }
            Outcome::RespondWithContext(reply) | Outcome::RespondViaGeneration(reply) => {
                if let Some(text) = reply.text() {
                    self.send(OutgoingMessage::reply(ctx.chat_id, ctx.message_id, text)).await;
                }
            }
            Outcome::RespondWithTrigger { response, .. } => {
                self.send(OutgoingMessage {
                    chat_id: ctx.chat_id,
                    reply_to_message_id: Some(ctx.message_id),
                    payload: Payload::Response(response.clone()),
                })
                .await;
            }
            Outcome::AutonomousMessage(deferred) => {
                let transport = Arc::clone(&self.transport);
                deferred.clone().spawn(move |chat_id, text| async move {
                    if let Err(error) = transport.send(&OutgoingMessage::text(chat_id, text)).await {
                        warn!(
                            event_name = "egress.autonomous.send_failed",
                            chat_id = chat_id.0,
                            error = %error,
                            "autonomous message not delivered"
                        );
                    }
                });
            }
            Outcome::Denied { .. } | Outcome::Suppressed { .. } | Outcome::Silence => {}
        }

        outcome
    }

    async fn send(&self, message: OutgoingMessage) {
        if let Err(error) = self.transport.send(&message).await {
            warn!(
                event_name = "egress.send_failed",
                chat_id = message.chat_id.0,
                error = %error,
                "outgoing message not delivered"
            );
        }
    }
}
