use std::sync::Arc;

use parley_agent::collaborators::{
    BotIdentityProvider, ModerationEffector, NoopModerationEffector, StaticIdentityProvider,
    TextGenerator,
};
use parley_agent::{
    BotIdentityCache, DecisionPipeline, Moderator, PipelineSettings, RestrictionLedger,
    StoreAnalyticsSink, TriggerRegistry,
};
use parley_chat::{
    ChatTransport, ChatWorkers, CommandRouter, EngineCommandService, GatewayRunner,
    MessageHandler, NoopTransport, ReconnectPolicy,
};
use parley_core::access::AccessGate;
use parley_core::config::{AppConfig, ConfigError};
use parley_core::errors::{ApplicationError, CollaboratorError};
use parley_core::mention::MentionDetector;
use parley_core::throttle::ActivityThrottle;
use parley_db::repositories::{
    AddressWordRepository, ModuleRepository, RepositoryModuleToggles, SqlActivityRepository,
    SqlAddressWordRepository, SqlModerationLogRepository, SqlModuleRepository,
    SqlRestrictionRepository, SqlTriggerRepository,
};
use parley_db::{connect_from_config, migrations, DbPool};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const ANALYTICS_QUEUE_CAPACITY: usize = 1_024;
const CHAT_QUEUE_CAPACITY: usize = 64;

/// Platform-specific parts supplied by whoever embeds the engine.
pub struct Platform {
    pub transport: Arc<dyn ChatTransport>,
    pub identity: Arc<dyn BotIdentityProvider>,
    pub effector: Arc<dyn ModerationEffector>,
    pub generator: Option<Arc<dyn TextGenerator>>,
}

impl Platform {
    /// No platform connection: updates never arrive and sends go nowhere.
    pub fn offline(config: &AppConfig) -> Self {
        Self {
            transport: Arc::new(NoopTransport),
            identity: Arc::new(StaticIdentityProvider(config.bot.static_identity())),
            effector: Arc::new(NoopModerationEffector),
            generator: None,
        }
    }
}

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<TriggerRegistry>,
    pub workers: Arc<ChatWorkers>,
    pub runner: GatewayRunner,
    pub shutdown: CancellationToken,
    analytics_writer: JoinHandle<()>,
}

impl Application {
    /// Lets the chat workers finish what is already queued, then cancels
    /// pending autonomous messages and waits for the analytics writer.
    pub async fn stop(self) {
        self.workers.drain().await;
        self.shutdown.cancel();
        if let Err(error) = self.analytics_writer.await {
            warn!(
                event_name = "system.shutdown.analytics_join_failed",
                error = %error,
                "analytics writer did not stop cleanly"
            );
        }
        self.db_pool.close().await;
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("trigger registry failed to load: {0}")]
    Registry(#[source] ApplicationError),
    #[error("bot identity could not be resolved: {0}")]
    Identity(#[source] CollaboratorError),
}

pub async fn bootstrap_with_config(
    config: AppConfig,
    platform: Platform,
) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");
    config.validate()?;

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let shutdown = CancellationToken::new();
    let modules: Arc<dyn ModuleRepository> = Arc::new(SqlModuleRepository::new(db_pool.clone()));
    let (analytics, analytics_writer) = StoreAnalyticsSink::spawn(
        Arc::new(SqlActivityRepository::new(db_pool.clone())),
        ANALYTICS_QUEUE_CAPACITY,
        shutdown.child_token(),
    );
    let analytics = Arc::new(analytics);

    let gate = Arc::new(AccessGate::from_config(
        &config.bot,
        Arc::new(RepositoryModuleToggles::new(modules.clone())),
    ));
    let ledger =
        Arc::new(RestrictionLedger::new(Arc::new(SqlRestrictionRepository::new(db_pool.clone()))));
    let registry = Arc::new(
        TriggerRegistry::load(Arc::new(SqlTriggerRepository::new(db_pool.clone())))
            .await
            .map_err(BootstrapError::Registry)?,
    );
    let identity = Arc::new(
        BotIdentityCache::resolve(platform.identity).await.map_err(BootstrapError::Identity)?,
    );

    let mut mentions = MentionDetector::from_config(&config.mention);
    match SqlAddressWordRepository::new(db_pool.clone()).list().await {
        Ok(words) => mentions.extend_keywords(words),
        Err(error) => warn!(
            event_name = "system.bootstrap.address_words_unavailable",
            error = %error,
            "custom address words not loaded; using configured keywords only"
        ),
    }

    let generation_enabled = platform.generator.is_some();
    let mut pipeline = DecisionPipeline::new(
        gate.clone(),
        ledger.clone(),
        registry.clone(),
        Arc::new(mentions),
        Arc::new(ActivityThrottle::from_config(&config.activity)),
        identity.clone(),
        PipelineSettings::from_config(&config),
    )
    .with_effector(platform.effector.clone())
    .with_analytics(analytics.clone());
    if let Some(generator) = platform.generator {
        pipeline = pipeline.with_generator(generator);
    }
    info!(
        event_name = "system.bootstrap.engine_ready",
        triggers = registry.len(),
        generation = generation_enabled,
        "decision engine assembled"
    );

    let moderator = Arc::new(Moderator::new(
        ledger,
        Arc::new(SqlModerationLogRepository::new(db_pool.clone())),
        platform.effector,
        analytics.clone(),
    ));
    let router = Arc::new(CommandRouter::new(
        Arc::new(EngineCommandService::new(moderator, registry.clone(), modules)),
        gate,
        identity,
        analytics,
    ));
    let handler = Arc::new(MessageHandler::new(
        Arc::new(pipeline),
        router,
        platform.transport.clone(),
        shutdown.child_token(),
    ));
    let workers =
        Arc::new(ChatWorkers::new(handler, CHAT_QUEUE_CAPACITY, shutdown.child_token()));
    let runner =
        GatewayRunner::new(platform.transport, workers.clone(), ReconnectPolicy::default());

    Ok(Application {
        config,
        db_pool,
        registry,
        workers,
        runner,
        shutdown,
        analytics_writer,
    })
}
