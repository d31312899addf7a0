use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::access::AccessGate;
use parley_core::config::AppConfig;
use parley_core::domain::analytics::AnalyticsEvent;
use parley_core::domain::message::{Command, DecisionContext};
use parley_core::domain::module;
use parley_core::domain::restriction::{RestrictionId, RestrictionKind};
use parley_core::domain::trigger::{TriggerId, TriggerResponse};
use parley_core::errors::CollaboratorError;
use parley_core::mention::MentionDetector;
use parley_core::throttle::ActivityThrottle;

use crate::collaborators::{
    AnalyticsSink, GenerationRequest, ModerationEffector, NoopAnalyticsSink, NoopModerationEffector,
    TextGenerator,
};
use crate::deferred::DeferredMessage;
use crate::identity::BotIdentityCache;
use crate::ledger::RestrictionLedger;
use crate::registry::TriggerRegistry;

/// Per-chat module names checked through the access gate.
pub const MODULE_TRIGGERS: &str = module::TRIGGERS;
pub const MODULE_AI: &str = module::AI;
pub const MODULE_AUTONOMOUS: &str = module::AUTONOMOUS;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub command_prefixes: Vec<String>,
    pub deny_notice: Option<String>,
    pub fallback_reply: Option<String>,
    pub unavailable_replies: Vec<String>,
    pub filler_messages: Vec<String>,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub generation_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            command_prefixes: config.bot.command_prefixes.clone(),
            deny_notice: config.bot.deny_notice.clone(),
            fallback_reply: config.generation.fallback_reply.clone(),
            unavailable_replies: config.generation.unavailable_replies.clone(),
            filler_messages: config.activity.filler_messages.clone(),
            min_delay: Duration::from_secs(config.activity.min_delay_secs),
            max_delay: Duration::from_secs(config.activity.max_delay_secs),
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
        }
    }

    fn autonomous_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What the bot sends back for a generation outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Generated(String),
    /// Static text after the generator failed.
    Fallback(String),
    /// No generator is configured.
    Unavailable(String),
    /// Nothing to send; `reason` is the failure kind.
    Dropped { reason: &'static str },
}

impl Reply {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Generated(text) | Self::Fallback(text) | Self::Unavailable(text) => Some(text),
            Self::Dropped { .. } => None,
        }
    }
}

/// The single resolved action for one inbound message.
#[derive(Clone, Debug)]
pub enum Outcome {
    Denied { notice: Option<String> },
    Command(Command),
    Suppressed { kind: RestrictionKind, restriction_id: RestrictionId, enforced: bool },
    RespondWithContext(Reply),
    RespondWithTrigger { trigger_id: TriggerId, name: String, response: TriggerResponse },
    RespondViaGeneration(Reply),
    AutonomousMessage(DeferredMessage),
    Silence,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Denied { .. } => "denied",
            Self::Command(_) => "command",
            Self::Suppressed { .. } => "suppressed",
            Self::RespondWithContext(_) => "respond_with_context",
            Self::RespondWithTrigger { .. } => "respond_with_trigger",
            Self::RespondViaGeneration(_) => "respond_via_generation",
            Self::AutonomousMessage(_) => "autonomous_message",
            Self::Silence => "silence",
        }
    }

    /// Whether the bot speaks in the chat as a result.
    pub fn is_response(&self) -> bool {
        match self {
            Self::RespondWithContext(reply) | Self::RespondViaGeneration(reply) => reply.text().is_some(),
            Self::RespondWithTrigger { .. } | Self::AutonomousMessage(_) => true,
            Self::Denied { .. } | Self::Command(_) | Self::Suppressed { .. } | Self::Silence => false,
        }
    }
}

/// Resolves each inbound message to exactly one [`Outcome`].
///
/// Steps run in fixed order and the first one that resolves wins:
/// access, commands, restrictions, replies to the bot, triggers, mentions,
/// autonomous activity. No ledger or registry lock is held across the
/// generation call, and step failures degrade to a fallback or silence.
pub struct DecisionPipeline {
    gate: Arc<AccessGate>,
    ledger: Arc<RestrictionLedger>,
    registry: Arc<TriggerRegistry>,
    mentions: Arc<MentionDetector>,
    throttle: Arc<ActivityThrottle>,
    identity: Arc<BotIdentityCache>,
    generator: Option<Arc<dyn TextGenerator>>,
    effector: Arc<dyn ModerationEffector>,
    analytics: Arc<dyn AnalyticsSink>,
    settings: PipelineSettings,
}

impl DecisionPipeline {
    pub fn new(
        gate: Arc<AccessGate>,
        ledger: Arc<RestrictionLedger>,
        registry: Arc<TriggerRegistry>,
        mentions: Arc<MentionDetector>,
        throttle: Arc<ActivityThrottle>,
        identity: Arc<BotIdentityCache>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            gate,
            ledger,
            registry,
            mentions,
            throttle,
            identity,
            generator: None,
            effector: Arc::new(NoopModerationEffector),
            analytics: Arc::new(NoopAnalyticsSink),
            settings,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_effector(mut self, effector: Arc<dyn ModerationEffector>) -> Self {
        self.effector = effector;
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// `cancel` aborts an in-flight generation call and is the parent of any
    /// deferred autonomous message.
    pub async fn evaluate(&self, ctx: &DecisionContext, cancel: &CancellationToken) -> Outcome {
        self.analytics.record(AnalyticsEvent::message(ctx));

        let outcome = self.decide(ctx, cancel, Utc::now()).await;
        if outcome.is_response() {
            self.analytics.record(AnalyticsEvent::outcome(ctx, outcome.label()));
        }

        debug!(
            event_name = "engine.pipeline.outcome",
            chat_id = ctx.chat_id.0,
            user_id = ctx.sender.id.0,
            message_id = ctx.message_id,
            outcome = outcome.label(),
            "message resolved"
        );
        outcome
    }

    async fn decide(&self, ctx: &DecisionContext, cancel: &CancellationToken, now: DateTime<Utc>) -> Outcome {
        let chat_id = ctx.chat_id;
        let user_id = ctx.sender.id;

        if !self.gate.allow(chat_id, user_id, None).await {
            return Outcome::Denied { notice: self.settings.deny_notice.clone() };
        }

        if let Some(command) = ctx.command(&self.settings.command_prefixes) {
            return Outcome::Command(command);
        }

        if let Some(outcome) = self.check_restrictions(ctx, now).await {
            return outcome;
        }

        let bot = self.identity.current().await;
        if ctx.is_reply_to(bot.user_id) && self.module_enabled(ctx, MODULE_AI).await {
            let context = ctx.reply_to.as_ref().and_then(|reply| reply.text.clone());
            return Outcome::RespondWithContext(self.generate(ctx, context, cancel).await);
        }

        if self.module_enabled(ctx, MODULE_TRIGGERS).await {
            if let Some(trigger) = self.registry.find_match(&ctx.text, chat_id) {
                if let Err(error) = self.registry.record_use(trigger.id, true).await {
                    warn!(
                        event_name = "engine.pipeline.trigger_use_failed",
                        trigger_id = trigger.id.0,
                        error = %error,
                        "trigger usage not persisted"
                    );
                }
                return Outcome::RespondWithTrigger {
                    trigger_id: trigger.id,
                    name: trigger.name,
                    response: trigger.response,
                };
            }
        }

        if self.mentions.is_addressed(ctx, &bot) && self.module_enabled(ctx, MODULE_AI).await {
            return Outcome::RespondViaGeneration(self.generate(ctx, None, cancel).await);
        }

        if self.module_enabled(ctx, MODULE_AUTONOMOUS).await
            && self.throttle.should_act_autonomously(chat_id, now)
        {
            if let Some(text) = self.settings.filler_messages.choose(&mut rand::thread_rng()).cloned() {
                let delay = self.settings.autonomous_delay();
                info!(
                    event_name = "engine.autonomous.scheduled",
                    chat_id = chat_id.0,
                    delay_secs = delay.as_secs(),
                    "autonomous message scheduled"
                );
                return Outcome::AutonomousMessage(DeferredMessage::new(
                    chat_id,
                    text,
                    delay,
                    cancel.child_token(),
                ));
            }
        }

        Outcome::Silence
    }

    async fn module_enabled(&self, ctx: &DecisionContext, module: &str) -> bool {
        self.gate.allow(ctx.chat_id, ctx.sender.id, Some(module)).await
    }

    /// Bans win over mutes. A lookup failure skips that check.
    async fn check_restrictions(&self, ctx: &DecisionContext, now: DateTime<Utc>) -> Option<Outcome> {
        for kind in [RestrictionKind::Ban, RestrictionKind::Mute] {
            match self.ledger.active_restriction(ctx.sender.id, ctx.chat_id, kind, now).await {
                Ok(Some(restriction)) => {
                    let enforced = kind == RestrictionKind::Ban && !ctx.is_private() && self.enforce_ban(ctx).await;
                    info!(
                        event_name = "engine.pipeline.suppressed",
                        chat_id = ctx.chat_id.0,
                        user_id = ctx.sender.id.0,
                        message_id = ctx.message_id,
                        kind = kind.as_str(),
                        restriction_id = restriction.id.0,
                        "message from restricted user suppressed"
                    );
                    return Some(Outcome::Suppressed { kind, restriction_id: restriction.id, enforced });
                }
                Ok(None) => {}
                Err(error) => warn!(
                    event_name = "engine.pipeline.restriction_lookup_failed",
                    chat_id = ctx.chat_id.0,
                    user_id = ctx.sender.id.0,
                    kind = kind.as_str(),
                    error = %error,
                    "restriction lookup failed; check skipped"
                ),
            }
        }
        None
    }

    async fn enforce_ban(&self, ctx: &DecisionContext) -> bool {
        match self.effector.enforce_ban(ctx.sender.id, ctx.chat_id).await {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    event_name = "engine.pipeline.enforce_failed",
                    chat_id = ctx.chat_id.0,
                    user_id = ctx.sender.id.0,
                    error_kind = error.kind(),
                    error = %error,
                    "ban enforcement failed"
                );
                false
            }
        }
    }

    async fn generate(
        &self,
        ctx: &DecisionContext,
        context: Option<String>,
        cancel: &CancellationToken,
    ) -> Reply {
        let Some(generator) = &self.generator else {
            return match self.settings.unavailable_replies.choose(&mut rand::thread_rng()) {
                Some(text) => Reply::Unavailable(text.clone()),
                None => Reply::Dropped { reason: "unavailable" },
            };
        };

        let request = GenerationRequest {
            prompt: ctx.text.clone(),
            user_id: ctx.sender.id,
            chat_id: ctx.chat_id,
            context,
        };
        let timeout = self.settings.generation_timeout;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
            result = tokio::time::timeout(timeout, generator.generate(request)) => match result {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout { after_secs: timeout.as_secs() }),
            },
        };

        match result {
            Ok(text) => Reply::Generated(text),
            Err(CollaboratorError::Cancelled) => {
                debug!(
                    event_name = "engine.pipeline.generation_cancelled",
                    chat_id = ctx.chat_id.0,
                    message_id = ctx.message_id,
                    "generation cancelled"
                );
                Reply::Dropped { reason: CollaboratorError::Cancelled.kind() }
            }
            Err(error) => {
                warn!(
                    event_name = "engine.pipeline.generation_failed",
                    chat_id = ctx.chat_id.0,
                    message_id = ctx.message_id,
                    error_kind = error.kind(),
                    error = %error,
                    "generation failed"
                );
                match &self.settings.fallback_reply {
                    Some(text) if error.wants_fallback() => Reply::Fallback(text.clone()),
                    _ => Reply::Dropped { reason: error.kind() },
                }
            }
        }
    }
}
