use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parley_core::domain::analytics::AnalyticsEvent;
use parley_core::domain::chat::ChatId;
use parley_core::domain::user::UserId;
use parley_core::errors::CollaboratorError;
use parley_core::mention::BotIdentity;

/// What the pipeline hands to text generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub user_id: UserId,
    pub chat_id: ChatId,
    /// Text of the bot's earlier message when the user replied to it.
    pub context: Option<String>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CollaboratorError>;
}

/// Platform-side enforcement of restrictions already recorded in the ledger.
#[async_trait]
pub trait ModerationEffector: Send + Sync {
    async fn enforce_ban(&self, user_id: UserId, chat_id: ChatId) -> Result<(), CollaboratorError>;

    async fn enforce_mute(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), CollaboratorError>;

    async fn lift(&self, user_id: UserId, chat_id: ChatId) -> Result<(), CollaboratorError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopModerationEffector;

#[async_trait]
impl ModerationEffector for NoopModerationEffector {
    async fn enforce_ban(&self, _user_id: UserId, _chat_id: ChatId) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn enforce_mute(
        &self,
        _user_id: UserId,
        _chat_id: ChatId,
        _until: Option<DateTime<Utc>>,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn lift(&self, _user_id: UserId, _chat_id: ChatId) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Fire-and-forget event recording. Implementations swallow their own failures.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AnalyticsEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAnalyticsSink;

impl AnalyticsSink for NoopAnalyticsSink {
    fn record(&self, _event: AnalyticsEvent) {}
}

#[async_trait]
pub trait BotIdentityProvider: Send + Sync {
    async fn resolve(&self) -> Result<BotIdentity, CollaboratorError>;
}

/// Identity known up front, e.g. from configuration or tests.
#[derive(Clone, Debug)]
pub struct StaticIdentityProvider(pub BotIdentity);

#[async_trait]
impl BotIdentityProvider for StaticIdentityProvider {
    async fn resolve(&self) -> Result<BotIdentity, CollaboratorError> {
        Ok(self.0.clone())
    }
}
