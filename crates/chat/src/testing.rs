//! Shared fixtures for this crate's tests: a scripted transport and a fully
//! wired in-memory engine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use parley_agent::collaborators::{NoopAnalyticsSink, NoopModerationEffector, StaticIdentityProvider};
use parley_agent::identity::BotIdentityCache;
use parley_agent::ledger::RestrictionLedger;
use parley_agent::moderator::Moderator;
use parley_agent::pipeline::{DecisionPipeline, PipelineSettings};
use parley_agent::registry::TriggerRegistry;
use parley_core::access::AccessGate;
use parley_core::domain::chat::{ChatId, ChatKind};
use parley_core::domain::message::{DecisionContext, Sender};
use parley_core::domain::restriction::RestrictionKind;
use parley_core::domain::trigger::{MatchKind, NewTrigger, TriggerResponse};
use parley_core::domain::user::UserId;
use parley_core::mention::{BotIdentity, MentionDetector};
use parley_core::throttle::{ActivityThrottle, DrawSource};
use parley_db::repositories::{
    InMemoryModerationLogRepository, InMemoryModuleRepository, InMemoryRestrictionRepository,
    InMemoryTriggerRepository, RepositoryModuleToggles,
};

use crate::commands::{CommandRouter, EngineCommandService};
use crate::events::{InboundEnvelope, InboundEvent, IncomingMessage};
use crate::gateway::{ChatTransport, OutgoingMessage, TransportError};
use crate::handler::MessageHandler;
use crate::workers::ChatWorkers;

pub(crate) const ADMIN: UserId = UserId(1);
pub(crate) const USER: UserId = UserId(7);
pub(crate) const CHAT: ChatId = ChatId(100);

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    state: Mutex<ScriptedState>,
}

#[derive(Default)]
struct ScriptedState {
    connect_results: VecDeque<Result<(), TransportError>>,
    envelopes: VecDeque<Result<Option<InboundEnvelope>, TransportError>>,
    connect_attempts: usize,
    sent: Vec<OutgoingMessage>,
    disconnect_calls: usize,
}

impl ScriptedTransport {
    pub(crate) fn with_script(
        connect_results: Vec<Result<(), TransportError>>,
        envelopes: Vec<Result<Option<InboundEnvelope>, TransportError>>,
    ) -> Self {
        Self {
            state: Mutex::new(ScriptedState {
                connect_results: connect_results.into(),
                envelopes: envelopes.into(),
                ..ScriptedState::default()
            }),
        }
    }

    pub(crate) async fn connect_attempts(&self) -> usize {
        self.state.lock().await.connect_attempts
    }

    pub(crate) async fn disconnect_calls(&self) -> usize {
        self.state.lock().await.disconnect_calls
    }

    pub(crate) async fn sent(&self) -> Vec<OutgoingMessage> {
        self.state.lock().await.sent.clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.connect_attempts += 1;
        state.connect_results.pop_front().unwrap_or(Ok(()))
    }

    async fn next_envelope(&self) -> Result<Option<InboundEnvelope>, TransportError> {
        self.state.lock().await.envelopes.pop_front().unwrap_or(Ok(None))
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        self.state.lock().await.sent.push(message.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.lock().await.disconnect_calls += 1;
        Ok(())
    }
}

struct AlwaysDraw;

impl DrawSource for AlwaysDraw {
    fn draw(&self) -> f64 {
        0.0
    }
}

pub(crate) struct TestEngine {
    pub(crate) gate: Arc<AccessGate>,
    pub(crate) ledger: Arc<RestrictionLedger>,
    pub(crate) registry: Arc<TriggerRegistry>,
    pub(crate) router: Arc<CommandRouter>,
    pub(crate) handler: Arc<MessageHandler>,
    pub(crate) workers: Arc<ChatWorkers>,
}

impl TestEngine {
    /// Admin 1, allow-list [100], bot 42 `@parley_bot`, no generator and no
    /// autonomous activity.
    pub(crate) async fn build(transport: Arc<ScriptedTransport>) -> Self {
        Self::wire(transport, 0.0).await
    }

    pub(crate) async fn build_autonomous(transport: Arc<ScriptedTransport>) -> Self {
        Self::wire(transport, 1.0).await
    }

    async fn wire(transport: Arc<ScriptedTransport>, probability: f64) -> Self {
        let shutdown = CancellationToken::new();
        let modules = Arc::new(InMemoryModuleRepository::default());
        let gate = Arc::new(AccessGate::new(
            [ADMIN],
            [CHAT],
            Arc::new(RepositoryModuleToggles::new(modules.clone())),
        ));
        let ledger =
            Arc::new(RestrictionLedger::new(Arc::new(InMemoryRestrictionRepository::default())));
        let registry = Arc::new(
            TriggerRegistry::load(Arc::new(InMemoryTriggerRepository::default()))
                .await
                .expect("registry"),
        );
        let identity = Arc::new(
            BotIdentityCache::resolve(Arc::new(StaticIdentityProvider(BotIdentity {
                user_id: UserId(42),
                handle: "parley_bot".to_owned(),
                display_name: "Parley".to_owned(),
            })))
            .await
            .expect("identity"),
        );
        let throttle = Arc::new(ActivityThrottle::new(
            probability,
            chrono::Duration::hours(2),
            Arc::new(AlwaysDraw),
        ));
        let settings = PipelineSettings {
            command_prefixes: vec!["/".to_owned()],
            deny_notice: Some("no access here".to_owned()),
            fallback_reply: None,
            unavailable_replies: vec!["offline".to_owned()],
            filler_messages: vec!["so quiet".to_owned()],
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            generation_timeout: Duration::from_secs(10),
        };

        let pipeline = Arc::new(DecisionPipeline::new(
            gate.clone(),
            ledger.clone(),
            registry.clone(),
            Arc::new(MentionDetector::new(["bot".to_owned()], 20)),
            throttle,
            identity.clone(),
            settings,
        ));
        let moderator = Arc::new(Moderator::new(
            ledger.clone(),
            Arc::new(InMemoryModerationLogRepository::default()),
            Arc::new(NoopModerationEffector),
            Arc::new(NoopAnalyticsSink),
        ));
        let service = Arc::new(EngineCommandService::new(moderator, registry.clone(), modules));
        let router = Arc::new(CommandRouter::new(
            service,
            gate.clone(),
            identity,
            Arc::new(NoopAnalyticsSink),
        ));
        let handler = Arc::new(MessageHandler::new(pipeline, router.clone(), transport, shutdown.clone()));
        let workers = Arc::new(ChatWorkers::new(handler.clone(), 16, shutdown));

        Self { gate, ledger, registry, router, handler, workers }
    }

    pub(crate) async fn add_trigger(&self, name: &str) {
        self.registry
            .save_trigger(NewTrigger {
                owner_id: USER,
                chat_id: Some(CHAT),
                name: name.to_owned(),
                match_kind: MatchKind::Contains,
                pattern: name.to_owned(),
                response: TriggerResponse::text(format!("{name} response")),
                is_global: false,
            })
            .await
            .expect("save trigger");
    }

    pub(crate) async fn is_muted(&self, user_id: UserId) -> bool {
        self.ledger
            .active_restriction(user_id, CHAT, RestrictionKind::Mute, Utc::now())
            .await
            .expect("ledger read")
            .is_some()
    }
}

pub(crate) fn group_message(message_id: i64, text: &str) -> DecisionContext {
    DecisionContext {
        message_id,
        chat_id: CHAT,
        chat_kind: ChatKind::Group,
        chat_title: Some("regulars".to_owned()),
        sender: Sender { id: USER, display_name: "Ann".to_owned(), username: None },
        text: text.to_owned(),
        reply_to: None,
        received_at: Utc::now(),
    }
}

pub(crate) fn envelope(update_id: &str, ctx: DecisionContext) -> InboundEnvelope {
    InboundEnvelope {
        update_id: update_id.to_owned(),
        event: InboundEvent::Message(IncomingMessage {
            message_id: ctx.message_id,
            chat_id: ctx.chat_id,
            chat_kind: ctx.chat_kind,
            chat_title: ctx.chat_title,
            from: ctx.sender,
            text: Some(ctx.text),
            reply_to: ctx.reply_to,
            date: ctx.received_at,
        }),
    }
}
