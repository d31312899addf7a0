use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;

use crate::config::ActivityConfig;
use crate::domain::chat::ChatId;

/// Source of uniform draws in `[0, 1)`.
pub trait DrawSource: Send + Sync {
    fn draw(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngDraw;

impl DrawSource for ThreadRngDraw {
    fn draw(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Gates unprompted bot messages behind a rare draw and a per-chat cooldown.
///
/// The cooldown check and the timestamp update happen under the chat's map
/// entry lock, so two concurrent winners for the same chat cannot both pass.
pub struct ActivityThrottle {
    probability: f64,
    cooldown: Duration,
    last_action: DashMap<ChatId, DateTime<Utc>>,
    draws: Arc<dyn DrawSource>,
}

impl ActivityThrottle {
    pub fn new(probability: f64, cooldown: Duration, draws: Arc<dyn DrawSource>) -> Self {
        Self { probability: probability.clamp(0.0, 1.0), cooldown, last_action: DashMap::new(), draws }
    }

    pub fn from_config(config: &ActivityConfig) -> Self {
        Self::new(config.probability, config.cooldown(), Arc::new(ThreadRngDraw))
    }

    pub fn with_draws(mut self, draws: Arc<dyn DrawSource>) -> Self {
        self.draws = draws;
        self
    }

    pub fn should_act_autonomously(&self, chat_id: ChatId, now: DateTime<Utc>) -> bool {
        if self.draws.draw() >= self.probability {
            return false;
        }

        match self.last_action.entry(chat_id) {
            Entry::Occupied(mut last) => {
                if now.signed_duration_since(*last.get()) < self.cooldown {
                    return false;
                }
                last.insert(now);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    pub fn last_action(&self, chat_id: ChatId) -> Option<DateTime<Utc>> {
        self.last_action.get(&chat_id).map(|last| *last)
    }
}
