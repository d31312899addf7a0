//! Parley Core - deterministic decision building blocks
//!
//! This crate holds everything the message decision engine needs that does not
//! touch storage or the network:
//! - **Domain** (`domain`) - users, chats, triggers, restrictions, inbound messages
//! - **Access** (`access`) - chat allow-list, admin override, per-chat module toggles
//! - **Mentions** (`mention`) - "is this message addressed to the bot?"
//! - **Throttle** (`throttle`) - probability + cooldown gate for unprompted messages
//! - **Config** (`config`) - layered configuration (defaults, file, env, overrides)
//!
//! Stateful services (restriction ledger, trigger registry, decision pipeline)
//! live in `parley-agent` and are built from these pieces.

pub mod access;
pub mod config;
pub mod domain;
pub mod errors;
pub mod mention;
pub mod throttle;

pub use access::{AccessGate, AllModulesEnabled, ModuleToggles};
pub use domain::analytics::{AnalyticsDetail, AnalyticsEvent};
pub use domain::chat::{Chat, ChatId, ChatKind};
pub use domain::message::{Command, DecisionContext, ReplyRef, Sender};
pub use domain::moderation::{ModerationAction, ModerationLogEntry};
pub use domain::restriction::{
    DeactivationReason, NewRestriction, Restriction, RestrictionId, RestrictionKind,
    RestrictionResolution,
};
pub use domain::trigger::{
    MatchKind, MatchRank, NewTrigger, Trigger, TriggerId, TriggerMatcher, TriggerResponse,
};
pub use domain::user::{User, UserId, UserRole};
pub use errors::{ApplicationError, CollaboratorError, DomainError};
pub use mention::{AddressSignal, BotIdentity, MentionDetector};
pub use throttle::{ActivityThrottle, DrawSource, ThreadRngDraw};
