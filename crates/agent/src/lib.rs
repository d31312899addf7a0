//! Parley Agent - stateful decision services
//!
//! Builds the message decision engine on top of `parley-core` and the record
//! store in `parley-db`:
//! - **Ledger** (`ledger`) - bans, mutes and warnings with lazy expiry
//! - **Registry** (`registry`) - pattern triggers with atomic usage counters
//! - **Pipeline** (`pipeline`) - one resolved [`Outcome`] per inbound message
//! - **Moderator** (`moderator`) - admin moderation actions and their audit log
//!
//! External effects (text generation, platform moderation, analytics, bot
//! identity) are reached only through the traits in `collaborators`.

pub mod analytics;
pub mod collaborators;
pub mod deferred;
pub mod identity;
pub mod ledger;
pub mod llm;
pub mod moderator;
pub mod pipeline;
pub mod registry;

pub use analytics::StoreAnalyticsSink;
pub use collaborators::{
    AnalyticsSink, BotIdentityProvider, GenerationRequest, ModerationEffector, NoopAnalyticsSink,
    NoopModerationEffector, StaticIdentityProvider, TextGenerator,
};
pub use deferred::{DeferredMessage, DeferredStatus};
pub use identity::BotIdentityCache;
pub use ledger::RestrictionLedger;
pub use llm::{LlmClient, LlmTextGenerator};
pub use moderator::{ModerationReceipt, ModerationRequest, Moderator};
pub use pipeline::{DecisionPipeline, Outcome, PipelineSettings, Reply};
pub use registry::TriggerRegistry;
