use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use parley_core::domain::analytics::AnalyticsEvent;
use parley_core::domain::chat::{Chat, ChatId};
use parley_core::domain::message::DecisionContext;
use parley_core::domain::moderation::ModerationLogEntry;
use parley_core::domain::restriction::{
    DeactivationReason, NewRestriction, Restriction, RestrictionId, RestrictionKind,
};
use parley_core::domain::trigger::{NewTrigger, Trigger, TriggerId};
use parley_core::domain::user::{User, UserId};

use super::{
    ActivityRepository, AddressWordRepository, ModerationLogRepository, ModuleRepository,
    RepositoryError, RestrictionRepository, TriggerRepository,
};

#[derive(Default)]
pub struct InMemoryTriggerRepository {
    triggers: RwLock<BTreeMap<i64, Trigger>>,
}

#[async_trait::async_trait]
impl TriggerRepository for InMemoryTriggerRepository {
    async fn list_active(&self) -> Result<Vec<Trigger>, RepositoryError> {
        let triggers = self.triggers.read().await;
        Ok(triggers.values().filter(|trigger| trigger.is_active).cloned().collect())
    }

    async fn find_by_id(&self, id: TriggerId) -> Result<Option<Trigger>, RepositoryError> {
        let triggers = self.triggers.read().await;
        Ok(triggers.get(&id.0).cloned())
    }

    async fn upsert(
        &self,
        trigger: NewTrigger,
        at: DateTime<Utc>,
    ) -> Result<Trigger, RepositoryError> {
        let mut triggers = self.triggers.write().await;
        let existing = triggers.values_mut().find(|stored| {
            stored.owner_id == trigger.owner_id
                && stored.chat_id == trigger.chat_id
                && stored.name == trigger.name
        });

        if let Some(stored) = existing {
            stored.match_kind = trigger.match_kind;
            stored.pattern = trigger.pattern;
            stored.response = trigger.response;
            stored.is_global = trigger.is_global;
            stored.is_active = true;
            return Ok(stored.clone());
        }

        let id = triggers.keys().next_back().copied().unwrap_or(0) + 1;
        let stored = Trigger {
            id: TriggerId(id),
            owner_id: trigger.owner_id,
            chat_id: trigger.chat_id,
            name: trigger.name,
            match_kind: trigger.match_kind,
            pattern: trigger.pattern,
            response: trigger.response,
            is_active: true,
            is_global: trigger.is_global,
            usage_count: 0,
            success_count: 0,
            last_used: None,
            created_at: at,
        };
        triggers.insert(id, stored.clone());
        Ok(stored)
    }

    async fn set_active(&self, id: TriggerId, is_active: bool) -> Result<bool, RepositoryError> {
        let mut triggers = self.triggers.write().await;
        match triggers.get_mut(&id.0) {
            Some(trigger) => {
                trigger.is_active = is_active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_use(
        &self,
        id: TriggerId,
        was_successful: bool,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut triggers = self.triggers.write().await;
        if let Some(trigger) = triggers.get_mut(&id.0) {
            trigger.usage_count += 1;
            if was_successful {
                trigger.success_count += 1;
            }
            trigger.last_used = Some(at);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRestrictionRepository {
    rows: RwLock<BTreeMap<i64, (Restriction, Option<DeactivationReason>)>>,
}

impl InMemoryRestrictionRepository {
    /// Every stored row, active or not, in insertion order.
    pub async fn all(&self) -> Vec<Restriction> {
        let rows = self.rows.read().await;
        rows.values().map(|(restriction, _)| restriction.clone()).collect()
    }

    pub async fn deactivation_reason(&self, id: RestrictionId) -> Option<DeactivationReason> {
        let rows = self.rows.read().await;
        rows.get(&id.0).and_then(|(_, reason)| *reason)
    }

    /// Stores a row as-is, bypassing the write-side checks. Lets tests
    /// reproduce states that should never occur, such as two active mutes.
    pub async fn insert_raw(&self, restriction: Restriction) {
        let mut rows = self.rows.write().await;
        rows.insert(restriction.id.0, (restriction, None));
    }
}

#[async_trait::async_trait]
impl RestrictionRepository for InMemoryRestrictionRepository {
    async fn active_for(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        kind: RestrictionKind,
    ) -> Result<Vec<Restriction>, RepositoryError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .map(|(restriction, _)| restriction)
            .filter(|restriction| {
                restriction.is_active && restriction.applies_to(user_id, chat_id, kind)
            })
            .cloned()
            .collect())
    }

    async fn active_in_scope(
        &self,
        user_id: UserId,
        chat_id: Option<ChatId>,
        kind: RestrictionKind,
    ) -> Result<Vec<Restriction>, RepositoryError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .map(|(restriction, _)| restriction)
            .filter(|restriction| {
                restriction.is_active
                    && restriction.user_id == user_id
                    && restriction.kind == kind
                    && restriction.chat_id == chat_id
            })
            .cloned()
            .collect())
    }

    async fn insert(&self, restriction: NewRestriction) -> Result<Restriction, RepositoryError> {
        let mut rows = self.rows.write().await;
        let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
        let stored = Restriction {
            id: RestrictionId(id),
            user_id: restriction.user_id,
            chat_id: restriction.chat_id,
            issued_by: restriction.issued_by,
            kind: restriction.kind,
            reason: restriction.reason,
            issued_at: restriction.issued_at,
            expires_at: restriction.expires_at,
            is_active: true,
        };
        rows.insert(id, (stored.clone(), None));
        Ok(stored)
    }

    async fn deactivate(
        &self,
        ids: &[RestrictionId],
        reason: DeactivationReason,
        _at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut rows = self.rows.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some((restriction, stored_reason)) = rows.get_mut(&id.0) {
                if restriction.is_active {
                    restriction.is_active = false;
                    *stored_reason = Some(reason);
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

#[derive(Default)]
pub struct InMemoryActivityRepository {
    users: RwLock<HashMap<UserId, User>>,
    chats: RwLock<HashMap<ChatId, Chat>>,
    messages: RwLock<Vec<DecisionContext>>,
    actions: RwLock<Vec<AnalyticsEvent>>,
}

impl InMemoryActivityRepository {
    pub async fn messages(&self) -> Vec<DecisionContext> {
        self.messages.read().await.clone()
    }

    pub async fn actions(&self) -> Vec<AnalyticsEvent> {
        self.actions.read().await.clone()
    }
}

#[async_trait::async_trait]
impl ActivityRepository for InMemoryActivityRepository {
    async fn record_message(&self, ctx: &DecisionContext) -> Result<(), RepositoryError> {
        {
            let mut users = self.users.write().await;
            users
                .entry(ctx.sender.id)
                .and_modify(|user| {
                    user.observe(
                        &ctx.sender.display_name,
                        ctx.sender.username.as_deref(),
                        ctx.received_at,
                    )
                })
                .or_insert_with(|| {
                    User::first_observed(
                        ctx.sender.id,
                        ctx.sender.display_name.clone(),
                        ctx.sender.username.clone(),
                        ctx.received_at,
                    )
                });
        }
        {
            let mut chats = self.chats.write().await;
            chats
                .entry(ctx.chat_id)
                .and_modify(|chat| {
                    chat.kind = ctx.chat_kind;
                    chat.observe(ctx.chat_title.as_deref(), ctx.received_at);
                })
                .or_insert_with(|| {
                    Chat::first_observed(
                        ctx.chat_id,
                        ctx.chat_kind,
                        ctx.chat_title.clone(),
                        ctx.received_at,
                    )
                });
        }
        self.messages.write().await.push(ctx.clone());
        Ok(())
    }

    async fn record_action(&self, event: &AnalyticsEvent) -> Result<(), RepositoryError> {
        self.actions.write().await.push(event.clone());
        Ok(())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_chat(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        Ok(self.chats.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryModuleRepository {
    modules: RwLock<HashMap<(ChatId, String), bool>>,
}

#[async_trait::async_trait]
impl ModuleRepository for InMemoryModuleRepository {
    async fn is_enabled(&self, chat_id: ChatId, module: &str) -> Result<bool, RepositoryError> {
        let modules = self.modules.read().await;
        Ok(modules.get(&(chat_id, module.to_string())).copied().unwrap_or(true))
    }

    async fn set_enabled(
        &self,
        chat_id: ChatId,
        module: &str,
        is_enabled: bool,
        _updated_by: UserId,
        _at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut modules = self.modules.write().await;
        modules.insert((chat_id, module.to_string()), is_enabled);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAddressWordRepository {
    words: RwLock<Vec<String>>,
}

#[async_trait::async_trait]
impl AddressWordRepository for InMemoryAddressWordRepository {
    async fn list(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.words.read().await.clone())
    }

    async fn add(
        &self,
        word: &str,
        _added_by: UserId,
        _at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let word = word.trim().to_lowercase();
        let mut words = self.words.write().await;
        if words.contains(&word) {
            return Ok(false);
        }
        words.push(word);
        Ok(true)
    }

    async fn remove(&self, word: &str) -> Result<bool, RepositoryError> {
        let word = word.trim().to_lowercase();
        let mut words = self.words.write().await;
        let before = words.len();
        words.retain(|stored| *stored != word);
        Ok(words.len() != before)
    }
}

#[derive(Default)]
pub struct InMemoryModerationLogRepository {
    entries: RwLock<Vec<ModerationLogEntry>>,
}

#[async_trait::async_trait]
impl ModerationLogRepository for InMemoryModerationLogRepository {
    async fn append(&self, entry: &ModerationLogEntry) -> Result<(), RepositoryError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ModerationLogEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|entry| entry.target_user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use parley_core::domain::chat::{ChatId, ChatKind};
    use parley_core::domain::message::{DecisionContext, Sender};
    use parley_core::domain::trigger::{MatchKind, NewTrigger, TriggerResponse};
    use parley_core::domain::user::UserId;

    use crate::repositories::{
        ActivityRepository, InMemoryActivityRepository, InMemoryTriggerRepository,
        TriggerRepository,
    };

    #[tokio::test]
    async fn in_memory_trigger_upsert_matches_sql_semantics() {
        let repo = InMemoryTriggerRepository::default();
        let trigger = NewTrigger {
            owner_id: UserId(7),
            chat_id: Some(ChatId(100)),
            name: "ping".to_string(),
            match_kind: MatchKind::Contains,
            pattern: "ping".to_string(),
            response: TriggerResponse::text("pong"),
            is_global: false,
        };

        let first = repo.upsert(trigger.clone(), Utc::now()).await.expect("insert");
        repo.record_use(first.id, false, Utc::now()).await.expect("record");
        let second = repo.upsert(trigger, Utc::now()).await.expect("replace");

        assert_eq!(first.id, second.id);
        assert_eq!(second.usage_count, 1);
        assert_eq!(second.success_count, 0);
    }

    #[tokio::test]
    async fn in_memory_activity_tracks_profiles() {
        let repo = InMemoryActivityRepository::default();
        let ctx = DecisionContext {
            message_id: 1,
            chat_id: ChatId(100),
            chat_kind: ChatKind::Group,
            chat_title: None,
            sender: Sender { id: UserId(7), display_name: "Ann".to_string(), username: None },
            text: "hello".to_string(),
            reply_to: None,
            received_at: Utc::now(),
        };

        repo.record_message(&ctx).await.expect("first");
        repo.record_message(&ctx).await.expect("second");

        let user = repo.find_user(UserId(7)).await.expect("query").expect("user");
        assert_eq!(user.message_count, 2);
        assert_eq!(repo.messages().await.len(), 2);
    }
}
