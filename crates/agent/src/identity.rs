use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use parley_core::errors::CollaboratorError;
use parley_core::mention::BotIdentity;

use crate::collaborators::BotIdentityProvider;

/// Bot identity resolved once at startup. `refresh` re-resolves on demand,
/// e.g. after the bot was renamed on the platform; nothing refreshes it
/// automatically.
pub struct BotIdentityCache {
    provider: Arc<dyn BotIdentityProvider>,
    current: RwLock<Arc<BotIdentity>>,
}

impl BotIdentityCache {
    pub async fn resolve(provider: Arc<dyn BotIdentityProvider>) -> Result<Self, CollaboratorError> {
        let identity = provider.resolve().await?;
        info!(
            event_name = "engine.identity.resolved",
            bot_user_id = identity.user_id.0,
            handle = %identity.handle,
            "bot identity resolved"
        );
        Ok(Self { provider, current: RwLock::new(Arc::new(identity)) })
    }

    pub async fn current(&self) -> Arc<BotIdentity> {
        Arc::clone(&*self.current.read().await)
    }

    /// Keeps the previous identity when the provider fails.
    pub async fn refresh(&self) -> Result<Arc<BotIdentity>, CollaboratorError> {
        let identity = Arc::new(self.provider.resolve().await?);
        let mut current = self.current.write().await;
        if **current != *identity {
            info!(
                event_name = "engine.identity.changed",
                previous_handle = %current.handle,
                handle = %identity.handle,
                "bot identity changed"
            );
        }
        *current = Arc::clone(&identity);
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use parley_core::domain::user::UserId;
    use parley_core::errors::CollaboratorError;
    use parley_core::mention::BotIdentity;

    use super::BotIdentityCache;
    use crate::collaborators::BotIdentityProvider;

    /// First call succeeds as `parley_bot`, second renames, later calls fail.
    struct RenamingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BotIdentityProvider for RenamingProvider {
        async fn resolve(&self) -> Result<BotIdentity, CollaboratorError> {
            let handle = match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => "parley_bot",
                1 => "parley_renamed_bot",
                _ => return Err(CollaboratorError::Unavailable("platform down".to_string())),
            };
            Ok(BotIdentity {
                user_id: UserId(500),
                handle: handle.to_string(),
                display_name: "Parley".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn refresh_replaces_identity_and_survives_provider_failure() {
        let cache =
            BotIdentityCache::resolve(Arc::new(RenamingProvider { calls: AtomicUsize::new(0) }))
                .await
                .expect("resolve");
        assert_eq!(cache.current().await.handle, "parley_bot");

        cache.refresh().await.expect("refresh");
        assert_eq!(cache.current().await.handle, "parley_renamed_bot");

        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.current().await.handle, "parley_renamed_bot");
    }
}
