use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use parley_core::domain::chat::ChatId;
use parley_core::domain::restriction::{
    DeactivationReason, NewRestriction, Restriction, RestrictionKind, RestrictionResolution,
};
use parley_core::domain::user::UserId;
use parley_core::errors::ApplicationError;
use parley_db::repositories::RestrictionRepository;

/// Lock scope. `None` chat is the platform-wide scope.
type ScopeKey = (UserId, Option<ChatId>);

/// Holds one scope's lock. The scope's map entry goes away with its last holder.
struct ScopeGuard<'a> {
    scopes: &'a DashMap<ScopeKey, Arc<Mutex<()>>>,
    key: ScopeKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.guard = None;
        self.scopes.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Time-bound bans, mutes and warnings.
///
/// Expiry is resolved lazily: a read that finds an expired active row
/// deactivates it before answering, so correctness never depends on a
/// background sweep. Reads and writes for one (user, chat) scope are
/// serialized; different scopes never wait on each other.
pub struct RestrictionLedger {
    store: Arc<dyn RestrictionRepository>,
    scopes: DashMap<ScopeKey, Arc<Mutex<()>>>,
}

impl RestrictionLedger {
    pub fn new(store: Arc<dyn RestrictionRepository>) -> Self {
        Self { store, scopes: DashMap::new() }
    }

    async fn lock_scope(&self, user_id: UserId, chat_id: Option<ChatId>) -> ScopeGuard<'_> {
        let key = (user_id, chat_id);
        let lock = Arc::clone(self.scopes.entry(key).or_default().value());
        ScopeGuard { scopes: &self.scopes, key, guard: Some(lock.lock_owned().await) }
    }

    /// Scopes currently locked or waited on.
    pub fn tracked_scopes(&self) -> usize {
        self.scopes.len()
    }

    /// The restriction of `kind` currently in force for the user in this chat,
    /// chat-scoped or platform-wide.
    pub async fn active_restriction(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        kind: RestrictionKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Restriction>, ApplicationError> {
        let _scope = self.lock_scope(user_id, Some(chat_id)).await;

        let resolution = self.resolve(user_id, chat_id, kind, now).await?;
        Ok(resolution.active)
    }

    /// Live (unexpired) active rows of `kind`; used for stacking warnings.
    pub async fn active_count(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        kind: RestrictionKind,
        now: DateTime<Utc>,
    ) -> Result<usize, ApplicationError> {
        let _scope = self.lock_scope(user_id, Some(chat_id)).await;

        let candidates = self.store.active_for(user_id, chat_id, kind).await?;
        self.expire(&RestrictionResolution::resolve(&candidates, now), user_id, now).await?;
        Ok(candidates.iter().filter(|row| !row.is_expired_at(now)).count())
    }

    /// Records a restriction. A new ban or mute supersedes the active one in
    /// the same scope, keeping at most one of each active.
    pub async fn add(&self, restriction: NewRestriction) -> Result<Restriction, ApplicationError> {
        restriction.validate()?;

        let _scope = self.lock_scope(restriction.user_id, restriction.chat_id).await;

        if restriction.kind.is_exclusive() {
            let previous: Vec<_> = self
                .store
                .active_in_scope(restriction.user_id, restriction.chat_id, restriction.kind)
                .await?
                .into_iter()
                .map(|row| row.id)
                .collect();
            if !previous.is_empty() {
                self.store
                    .deactivate(&previous, DeactivationReason::Superseded, restriction.issued_at)
                    .await?;
            }
        }

        let stored = self.store.insert(restriction).await?;
        info!(
            event_name = "engine.ledger.added",
            restriction_id = stored.id.0,
            user_id = stored.user_id.0,
            chat_id = stored.chat_id.map(|chat| chat.0),
            kind = stored.kind.as_str(),
            expires_at = ?stored.expires_at,
            "restriction recorded"
        );
        Ok(stored)
    }

    /// Explicit unban/unmute for exactly this scope. Returns how many rows were lifted.
    pub async fn deactivate(
        &self,
        user_id: UserId,
        chat_id: Option<ChatId>,
        kind: RestrictionKind,
        now: DateTime<Utc>,
    ) -> Result<u64, ApplicationError> {
        let _scope = self.lock_scope(user_id, chat_id).await;

        let ids: Vec<_> = self
            .store
            .active_in_scope(user_id, chat_id, kind)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        let lifted = self.store.deactivate(&ids, DeactivationReason::Lifted, now).await?;

        info!(
            event_name = "engine.ledger.lifted",
            user_id = user_id.0,
            chat_id = chat_id.map(|chat| chat.0),
            kind = kind.as_str(),
            lifted,
            "restriction lifted"
        );
        Ok(lifted)
    }

    async fn resolve(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        kind: RestrictionKind,
        now: DateTime<Utc>,
    ) -> Result<RestrictionResolution, ApplicationError> {
        let candidates = self.store.active_for(user_id, chat_id, kind).await?;
        let resolution = RestrictionResolution::resolve(&candidates, now);

        self.expire(&resolution, user_id, now).await?;
        if resolution.conflicting > 0 {
            if let Some(active) = &resolution.active {
                warn!(
                    event_name = "engine.ledger.inconsistent",
                    user_id = user_id.0,
                    chat_id = chat_id.0,
                    kind = kind.as_str(),
                    chosen_restriction_id = active.id.0,
                    conflicting = resolution.conflicting,
                    "several active restrictions share one scope; using the most recent"
                );
            }
        }

        Ok(resolution)
    }

    async fn expire(
        &self,
        resolution: &RestrictionResolution,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        if resolution.expired.is_empty() {
            return Ok(());
        }

        let expired =
            self.store.deactivate(&resolution.expired, DeactivationReason::Expired, now).await?;
        info!(
            event_name = "engine.ledger.expired",
            user_id = user_id.0,
            expired,
            "expired restrictions deactivated on read"
        );
        Ok(())
    }
}
