use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tracing::{info, warn};

use parley_core::domain::chat::ChatId;
use parley_core::domain::trigger::{MatchRank, NewTrigger, Trigger, TriggerId, TriggerMatcher};
use parley_core::errors::ApplicationError;
use parley_db::repositories::TriggerRepository;

struct LoadedTrigger {
    trigger: Trigger,
    matcher: TriggerMatcher,
    usage_count: AtomicU64,
    success_count: AtomicU64,
}

impl LoadedTrigger {
    fn compile(trigger: Trigger) -> Self {
        let matcher = TriggerMatcher::compile(trigger.match_kind, &trigger.pattern);
        Self {
            usage_count: AtomicU64::new(trigger.usage_count),
            success_count: AtomicU64::new(trigger.success_count),
            matcher,
            trigger,
        }
    }

    fn rank(&self) -> MatchRank {
        MatchRank { usage_count: self.usage_count.load(Ordering::Relaxed), ..self.trigger.rank() }
    }

    fn current(&self) -> Trigger {
        Trigger {
            usage_count: self.usage_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            ..self.trigger.clone()
        }
    }
}

type Snapshot = Arc<Vec<Arc<LoadedTrigger>>>;

/// User-defined pattern triggers, compiled once per load.
///
/// Matching works on an immutable snapshot, so concurrent matches never
/// block each other. Usage counters are atomics per trigger in memory and
/// atomic increments in the store.
pub struct TriggerRegistry {
    store: Arc<dyn TriggerRepository>,
    snapshot: RwLock<Snapshot>,
}

impl TriggerRegistry {
    pub fn new(store: Arc<dyn TriggerRepository>) -> Self {
        Self { store, snapshot: RwLock::new(Arc::new(Vec::new())) }
    }

    /// Builds a registry with the store's active triggers already loaded.
    pub async fn load(store: Arc<dyn TriggerRepository>) -> Result<Self, ApplicationError> {
        let registry = Self::new(store);
        registry.reload().await?;
        Ok(registry)
    }

    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the in-memory snapshot with the store's active triggers.
    pub async fn reload(&self) -> Result<usize, ApplicationError> {
        let triggers = self.store.list_active().await?;
        let loaded: Vec<_> =
            triggers.into_iter().map(|trigger| Arc::new(LoadedTrigger::compile(trigger))).collect();
        let count = loaded.len();

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(loaded);
        info!(event_name = "engine.triggers.reloaded", count, "trigger registry reloaded");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Best active trigger for `text` in `chat_id`: global before chat-scoped,
    /// then most used, then oldest.
    pub fn find_match(&self, text: &str, chat_id: ChatId) -> Option<Trigger> {
        self.snapshot()
            .iter()
            .filter(|loaded| loaded.trigger.applies_to(chat_id) && loaded.matcher.is_match(text))
            .min_by_key(|loaded| loaded.rank())
            .map(|loaded| loaded.current())
    }

    /// Counts one use of the trigger. The in-memory counters are updated even
    /// when persisting fails; the error is returned for the caller to log.
    pub async fn record_use(
        &self,
        trigger_id: TriggerId,
        was_successful: bool,
    ) -> Result<(), ApplicationError> {
        if let Some(loaded) = self.snapshot().iter().find(|loaded| loaded.trigger.id == trigger_id) {
            loaded.usage_count.fetch_add(1, Ordering::Relaxed);
            if was_successful {
                loaded.success_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.store.record_use(trigger_id, was_successful, Utc::now()).await?;
        Ok(())
    }

    /// Validates and upserts a trigger on (owner, chat, name), then reloads.
    pub async fn save_trigger(&self, trigger: NewTrigger) -> Result<Trigger, ApplicationError> {
        trigger.validate()?;
        let saved = self.store.upsert(trigger, Utc::now()).await?;
        self.reload().await?;

        info!(
            event_name = "engine.triggers.saved",
            trigger_id = saved.id.0,
            owner_id = saved.owner_id.0,
            name = %saved.name,
            is_global = saved.is_global,
            "trigger saved"
        );
        Ok(saved)
    }

    pub async fn deactivate_trigger(&self, trigger_id: TriggerId) -> Result<bool, ApplicationError> {
        let changed = self.store.set_active(trigger_id, false).await?;
        if changed {
            self.reload().await?;
        } else {
            warn!(
                event_name = "engine.triggers.deactivate_missing",
                trigger_id = trigger_id.0,
                "no trigger with that id"
            );
        }
        Ok(changed)
    }
}
