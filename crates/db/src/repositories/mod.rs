use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};
use thiserror::Error;

use parley_core::domain::analytics::AnalyticsEvent;
use parley_core::domain::chat::{Chat, ChatId};
use parley_core::domain::message::DecisionContext;
use parley_core::domain::moderation::ModerationLogEntry;
use parley_core::domain::restriction::{
    DeactivationReason, NewRestriction, Restriction, RestrictionId, RestrictionKind,
};
use parley_core::domain::trigger::{NewTrigger, Trigger, TriggerId};
use parley_core::domain::user::{User, UserId};
use parley_core::errors::ApplicationError;

pub mod activity;
pub mod memory;
pub mod moderation_log;
pub mod restriction;
pub mod settings;
pub mod toggles;
pub mod trigger;

pub use activity::SqlActivityRepository;
pub use memory::{
    InMemoryActivityRepository, InMemoryAddressWordRepository, InMemoryModerationLogRepository,
    InMemoryModuleRepository, InMemoryRestrictionRepository, InMemoryTriggerRepository,
};
pub use moderation_log::SqlModerationLogRepository;
pub use restriction::SqlRestrictionRepository;
pub use settings::{SqlAddressWordRepository, SqlModuleRepository};
pub use toggles::RepositoryModuleToggles;
pub use trigger::SqlTriggerRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

#[async_trait]
pub trait TriggerRepository: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Trigger>, RepositoryError>;

    async fn find_by_id(&self, id: TriggerId) -> Result<Option<Trigger>, RepositoryError>;

    /// Inserts, or replaces the definition of the trigger with the same
    /// (owner, chat, name). Counters and creation time survive a replace.
    async fn upsert(
        &self,
        trigger: NewTrigger,
        at: DateTime<Utc>,
    ) -> Result<Trigger, RepositoryError>;

    async fn set_active(&self, id: TriggerId, is_active: bool) -> Result<bool, RepositoryError>;

    /// Atomic in-store increment; never a read-modify-write.
    async fn record_use(
        &self,
        id: TriggerId,
        was_successful: bool,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RestrictionRepository: Send + Sync {
    /// Active rows of `kind` for the user that apply in `chat_id`: scoped to
    /// that chat or platform-wide.
    async fn active_for(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        kind: RestrictionKind,
    ) -> Result<Vec<Restriction>, RepositoryError>;

    /// Active rows of `kind` with exactly this scope.
    async fn active_in_scope(
        &self,
        user_id: UserId,
        chat_id: Option<ChatId>,
        kind: RestrictionKind,
    ) -> Result<Vec<Restriction>, RepositoryError>;

    async fn insert(&self, restriction: NewRestriction) -> Result<Restriction, RepositoryError>;

    /// Flips still-active rows to inactive. Returns how many changed.
    async fn deactivate(
        &self,
        ids: &[RestrictionId],
        reason: DeactivationReason,
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    /// Upserts the sender and chat profiles and appends the message row.
    async fn record_message(&self, ctx: &DecisionContext) -> Result<(), RepositoryError>;

    async fn record_action(&self, event: &AnalyticsEvent) -> Result<(), RepositoryError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn find_chat(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError>;
}

#[async_trait]
pub trait ModuleRepository: Send + Sync {
    /// Modules without a stored row are enabled.
    async fn is_enabled(&self, chat_id: ChatId, module: &str) -> Result<bool, RepositoryError>;

    async fn set_enabled(
        &self,
        chat_id: ChatId,
        module: &str,
        is_enabled: bool,
        updated_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AddressWordRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, RepositoryError>;

    /// Returns `false` when the word was already present.
    async fn add(
        &self,
        word: &str,
        added_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn remove(&self, word: &str) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ModerationLogRepository: Send + Sync {
    async fn append(&self, entry: &ModerationLogEntry) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ModerationLogEntry>, RepositoryError>;
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{value}`: {e}")))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn count_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}
