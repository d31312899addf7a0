use serde::{Deserialize, Serialize};

use crate::config::MentionConfig;
use crate::domain::message::DecisionContext;
use crate::domain::user::UserId;

/// The bot's own identity as reported by the platform at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub user_id: UserId,
    /// Handle without the leading `@`.
    pub handle: String,
    pub display_name: String,
}

/// Which condition marked a message as addressed to the bot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSignal {
    PrivateChat,
    ReplyToBot,
    Handle,
    DisplayName,
    Keyword,
    Question,
}

impl AddressSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrivateChat => "private_chat",
            Self::ReplyToBot => "reply_to_bot",
            Self::Handle => "handle",
            Self::DisplayName => "display_name",
            Self::Keyword => "keyword",
            Self::Question => "question",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MentionDetector {
    keywords: Vec<String>,
    question_min_chars: usize,
}

impl MentionDetector {
    pub fn new(keywords: impl IntoIterator<Item = String>, question_min_chars: usize) -> Self {
        let mut detector = Self { keywords: Vec::new(), question_min_chars };
        detector.extend_keywords(keywords);
        detector
    }

    pub fn from_config(config: &MentionConfig) -> Self {
        Self::new(config.keywords.iter().cloned(), config.question_min_chars)
    }

    /// Adds operator-defined address words, ignoring blanks and duplicates.
    pub fn extend_keywords(&mut self, words: impl IntoIterator<Item = String>) {
        for word in words {
            let word = word.trim().to_lowercase();
            if !word.is_empty() && !self.keywords.contains(&word) {
                self.keywords.push(word);
            }
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_addressed(&self, ctx: &DecisionContext, bot: &BotIdentity) -> bool {
        self.address_signal(ctx, bot).is_some()
    }

    /// First satisfied condition, checked from cheapest to loosest.
    pub fn address_signal(&self, ctx: &DecisionContext, bot: &BotIdentity) -> Option<AddressSignal> {
        if ctx.is_private() {
            return Some(AddressSignal::PrivateChat);
        }
        if ctx.is_reply_to(bot.user_id) {
            return Some(AddressSignal::ReplyToBot);
        }

        let lowered = ctx.text.to_lowercase();
        let handle = bot.handle.trim().trim_start_matches('@').to_lowercase();
        if !handle.is_empty() && lowered.contains(&format!("@{handle}")) {
            return Some(AddressSignal::Handle);
        }

        let display_name = bot.display_name.trim().to_lowercase();
        if !display_name.is_empty() && lowered.contains(&display_name) {
            return Some(AddressSignal::DisplayName);
        }

        if self.keywords.iter().any(|keyword| lowered.contains(keyword.as_str())) {
            return Some(AddressSignal::Keyword);
        }

        if ctx.text.contains('?') && ctx.text.chars().count() > self.question_min_chars {
            return Some(AddressSignal::Question);
        }

        None
    }
}
