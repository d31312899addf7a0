//! Names of the per-chat modules that admins can switch on and off.

pub const TRIGGERS: &str = "triggers";
pub const AI: &str = "ai";
pub const AUTONOMOUS: &str = "autonomous";
pub const MODERATION: &str = "moderation";
