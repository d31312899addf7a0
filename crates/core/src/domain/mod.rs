pub mod analytics;
pub mod chat;
pub mod message;
pub mod module;
pub mod moderation;
pub mod restriction;
pub mod trigger;
pub mod user;
