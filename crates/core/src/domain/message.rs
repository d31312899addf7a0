use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chat::{ChatId, ChatKind};
use crate::domain::module;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    pub display_name: String,
    pub username: Option<String>,
}

/// The message an inbound message replies to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub message_id: i64,
    pub author_id: UserId,
    pub text: Option<String>,
}

/// Everything the decision pipeline knows about one inbound message. Lives for
/// a single evaluation and is never persisted as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub message_id: i64,
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub chat_title: Option<String>,
    pub sender: Sender,
    pub text: String,
    pub reply_to: Option<ReplyRef>,
    pub received_at: DateTime<Utc>,
}

impl DecisionContext {
    pub fn is_private(&self) -> bool {
        self.chat_kind == ChatKind::Private
    }

    pub fn is_reply_to(&self, author_id: UserId) -> bool {
        self.reply_to.as_ref().is_some_and(|reply| reply.author_id == author_id)
    }

    /// Parses the text as a command when it starts with one of `prefixes`.
    pub fn command(&self, prefixes: &[String]) -> Option<Command> {
        Command::parse(&self.text, prefixes)
    }
}

/// A prefixed command such as `/trigger_add@parley_bot ping pong`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    /// Bot handle after `@`, when the platform appends one in group chats.
    pub addressed_to: Option<String>,
    pub args: String,
}

impl Command {
    pub fn parse(text: &str, prefixes: &[String]) -> Option<Self> {
        let trimmed = text.trim_start();
        let rest = prefixes
            .iter()
            .filter(|prefix| !prefix.is_empty())
            .find_map(|prefix| trimmed.strip_prefix(prefix.as_str()))?;

        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let (name, addressed_to) = match head.split_once('@') {
            Some((name, handle)) => (name, Some(handle.to_ascii_lowercase())),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }

        Some(Self { name: name.to_ascii_lowercase(), addressed_to, args: args.to_string() })
    }

    /// Module consulted in the per-chat toggle map before dispatch. Help and
    /// the module switches themselves are never gated, otherwise a disabled
    /// module could not be turned back on.
    pub fn module(&self) -> Option<&'static str> {
        match self.name.as_str() {
            "trigger_add" | "trigger_global" | "trigger_del" | "trigger_reload" => {
                Some(module::TRIGGERS)
            }
            "ban" | "mute" | "warn" | "unban" | "unmute" | "warnings" => Some(module::MODERATION),
            _ => None,
        }
    }
}
