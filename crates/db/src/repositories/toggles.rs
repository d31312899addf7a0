use std::sync::Arc;

use async_trait::async_trait;

use parley_core::access::ModuleToggles;
use parley_core::domain::chat::ChatId;
use parley_core::errors::ApplicationError;

use super::ModuleRepository;

/// Serves the access gate's module switches from the `chat_modules` table.
pub struct RepositoryModuleToggles {
    modules: Arc<dyn ModuleRepository>,
}

impl RepositoryModuleToggles {
    pub fn new(modules: Arc<dyn ModuleRepository>) -> Self {
        Self { modules }
    }
}

#[async_trait]
impl ModuleToggles for RepositoryModuleToggles {
    async fn is_module_enabled(
        &self,
        chat_id: ChatId,
        module: &str,
    ) -> Result<bool, ApplicationError> {
        Ok(self.modules.is_enabled(chat_id, module).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use parley_core::access::AccessGate;
    use parley_core::domain::chat::ChatId;
    use parley_core::domain::user::UserId;

    use super::RepositoryModuleToggles;
    use crate::repositories::{InMemoryModuleRepository, ModuleRepository};

    #[tokio::test]
    async fn gate_reads_stored_module_switches() {
        let modules = Arc::new(InMemoryModuleRepository::default());
        modules
            .set_enabled(ChatId(100), "ai", false, UserId(1), Utc::now())
            .await
            .expect("disable ai");

        let gate = AccessGate::new(
            [UserId(1)],
            [ChatId(100)],
            Arc::new(RepositoryModuleToggles::new(modules)),
        );

        assert!(!gate.allow(ChatId(100), UserId(7), Some("ai")).await);
        assert!(gate.allow(ChatId(100), UserId(7), Some("triggers")).await);
    }
}
