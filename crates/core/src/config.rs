use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::chat::ChatId;
use crate::domain::user::UserId;
use crate::mention::BotIdentity;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub bot: BotConfig,
    pub mention: MentionConfig,
    pub activity: ActivityConfig,
    pub generation: GenerationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BotConfig {
    pub token: SecretString,
    pub admin_ids: Vec<UserId>,
    /// Empty means every chat is allowed.
    pub allowed_chat_ids: Vec<ChatId>,
    pub command_prefixes: Vec<String>,
    pub deny_notice: Option<String>,
    /// Used until the transport reports the account's real identity.
    pub handle: String,
    pub display_name: String,
}

impl BotConfig {
    /// Static identity for transports that cannot look the bot account up.
    /// Tokens of the form `<user id>:<secret>` carry the bot's own id.
    pub fn static_identity(&self) -> BotIdentity {
        let user_id = self
            .token
            .expose_secret()
            .split_once(':')
            .and_then(|(id, _)| id.trim().parse().ok())
            .unwrap_or_default();
        BotIdentity {
            user_id: UserId(user_id),
            handle: self.handle.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MentionConfig {
    pub keywords: Vec<String>,
    pub question_min_chars: usize,
}

#[derive(Clone, Debug)]
pub struct ActivityConfig {
    pub probability: f64,
    pub cooldown_secs: u64,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    pub filler_messages: Vec<String>,
}

impl ActivityConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.cooldown_secs).unwrap_or(i64::MAX))
    }
}

#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub timeout_secs: u64,
    /// Sent when the generation collaborator fails; `None` means stay silent.
    pub fallback_reply: Option<String>,
    /// Picked from when no generation collaborator is configured at all.
    pub unavailable_replies: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bot_token: Option<String>,
    pub admin_ids: Option<Vec<UserId>>,
    pub allowed_chat_ids: Option<Vec<ChatId>>,
    pub activity_probability: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            bot: BotConfig {
                token: String::new().into(),
                admin_ids: Vec::new(),
                allowed_chat_ids: Vec::new(),
                command_prefixes: vec!["/".to_string()],
                deny_notice: None,
                handle: "parley_bot".to_string(),
                display_name: "Parley".to_string(),
            },
            mention: MentionConfig {
                keywords: ["бот", "bot", "робот", "помощник", "assistant"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                question_min_chars: 20,
            },
            activity: ActivityConfig {
                probability: 0.001,
                cooldown_secs: 7_200,
                min_delay_secs: 5,
                max_delay_secs: 30,
                filler_messages: vec![
                    "Quiet in here.".to_string(),
                    "Still here, still listening.".to_string(),
                    "Anyone up to something interesting?".to_string(),
                ],
            },
            generation: GenerationConfig {
                timeout_secs: 30,
                fallback_reply: Some(
                    "Something went wrong while thinking about that. Try again later.".to_string(),
                ),
                unavailable_replies: vec![
                    "I can tell you're talking to me, but my text generation is switched off."
                        .to_string(),
                    "Interesting question. Without a generation backend I can only nod along."
                        .to_string(),
                ],
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(bot) = patch.bot {
            if let Some(bot_token_value) = bot.token {
                self.bot.token = secret_value(bot_token_value);
            }
            if let Some(admin_ids) = bot.admin_ids {
                self.bot.admin_ids = admin_ids.into_iter().map(UserId).collect();
            }
            if let Some(allowed_chat_ids) = bot.allowed_chat_ids {
                self.bot.allowed_chat_ids = allowed_chat_ids.into_iter().map(ChatId).collect();
            }
            if let Some(command_prefixes) = bot.command_prefixes {
                self.bot.command_prefixes = command_prefixes;
            }
            if let Some(deny_notice) = bot.deny_notice {
                self.bot.deny_notice = non_blank(deny_notice);
            }
            if let Some(handle) = bot.handle {
                self.bot.handle = handle.trim_start_matches('@').to_string();
            }
            if let Some(display_name) = bot.display_name {
                self.bot.display_name = display_name;
            }
        }

        if let Some(mention) = patch.mention {
            if let Some(keywords) = mention.keywords {
                self.mention.keywords = keywords;
            }
            if let Some(question_min_chars) = mention.question_min_chars {
                self.mention.question_min_chars = question_min_chars;
            }
        }

        if let Some(activity) = patch.activity {
            if let Some(probability) = activity.probability {
                self.activity.probability = probability;
            }
            if let Some(cooldown_secs) = activity.cooldown_secs {
                self.activity.cooldown_secs = cooldown_secs;
            }
            if let Some(min_delay_secs) = activity.min_delay_secs {
                self.activity.min_delay_secs = min_delay_secs;
            }
            if let Some(max_delay_secs) = activity.max_delay_secs {
                self.activity.max_delay_secs = max_delay_secs;
            }
            if let Some(filler_messages) = activity.filler_messages {
                self.activity.filler_messages = filler_messages;
            }
        }

        if let Some(generation) = patch.generation {
            if let Some(timeout_secs) = generation.timeout_secs {
                self.generation.timeout_secs = timeout_secs;
            }
            if let Some(fallback_reply) = generation.fallback_reply {
                self.generation.fallback_reply = non_blank(fallback_reply);
            }
            if let Some(unavailable_replies) = generation.unavailable_replies {
                self.generation.unavailable_replies = unavailable_replies;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PARLEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PARLEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_BOT_TOKEN") {
            self.bot.token = secret_value(value);
        }
        if let Some(value) = read_env("PARLEY_BOT_ADMIN_IDS") {
            self.bot.admin_ids =
                parse_id_list("PARLEY_BOT_ADMIN_IDS", &value)?.into_iter().map(UserId).collect();
        }
        if let Some(value) = read_env("PARLEY_BOT_ALLOWED_CHAT_IDS") {
            self.bot.allowed_chat_ids = parse_id_list("PARLEY_BOT_ALLOWED_CHAT_IDS", &value)?
                .into_iter()
                .map(ChatId)
                .collect();
        }
        if let Some(value) = read_env("PARLEY_BOT_DENY_NOTICE") {
            self.bot.deny_notice = Some(value);
        }
        if let Some(value) = read_env("PARLEY_BOT_HANDLE") {
            self.bot.handle = value.trim_start_matches('@').to_string();
        }

        if let Some(value) = read_env("PARLEY_MENTION_KEYWORDS") {
            self.mention.keywords = split_list(&value);
        }
        if let Some(value) = read_env("PARLEY_MENTION_QUESTION_MIN_CHARS") {
            self.mention.question_min_chars =
                parse_usize("PARLEY_MENTION_QUESTION_MIN_CHARS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_ACTIVITY_PROBABILITY") {
            self.activity.probability = parse_f64("PARLEY_ACTIVITY_PROBABILITY", &value)?;
        }
        if let Some(value) = read_env("PARLEY_ACTIVITY_COOLDOWN_SECS") {
            self.activity.cooldown_secs = parse_u64("PARLEY_ACTIVITY_COOLDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_GENERATION_TIMEOUT_SECS") {
            self.generation.timeout_secs = parse_u64("PARLEY_GENERATION_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.bot_token {
            self.bot.token = secret_value(bot_token);
        }
        if let Some(admin_ids) = overrides.admin_ids {
            self.bot.admin_ids = admin_ids;
        }
        if let Some(allowed_chat_ids) = overrides.allowed_chat_ids {
            self.bot.allowed_chat_ids = allowed_chat_ids;
        }
        if let Some(probability) = overrides.activity_probability {
            self.activity.probability = probability;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_bot(&self.bot)?;
        validate_mention(&self.mention)?;
        validate_activity(&self.activity)?;
        validate_generation(&self.generation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_bot(bot: &BotConfig) -> Result<(), ConfigError> {
    if bot.token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "bot.token is required. Set PARLEY_BOT_TOKEN or `token` under [bot]".to_string(),
        ));
    }

    if bot.admin_ids.is_empty() {
        return Err(ConfigError::Validation(
            "bot.admin_ids must list at least one platform user id (PARLEY_BOT_ADMIN_IDS)"
                .to_string(),
        ));
    }

    if bot.command_prefixes.iter().all(|prefix| prefix.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "bot.command_prefixes must contain at least one non-blank prefix".to_string(),
        ));
    }

    if bot.handle.trim().is_empty() {
        return Err(ConfigError::Validation("bot.handle must not be empty".to_string()));
    }

    Ok(())
}

fn validate_mention(mention: &MentionConfig) -> Result<(), ConfigError> {
    if mention.question_min_chars == 0 {
        return Err(ConfigError::Validation(
            "mention.question_min_chars must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_activity(activity: &ActivityConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&activity.probability) {
        return Err(ConfigError::Validation(
            "activity.probability must be in range 0.0..=1.0".to_string(),
        ));
    }

    if activity.min_delay_secs > activity.max_delay_secs {
        return Err(ConfigError::Validation(
            "activity.min_delay_secs must not exceed activity.max_delay_secs".to_string(),
        ));
    }

    if activity.probability > 0.0 && activity.filler_messages.is_empty() {
        return Err(ConfigError::Validation(
            "activity.filler_messages must not be empty when activity.probability is above zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_generation(generation: &GenerationConfig) -> Result<(), ConfigError> {
    if generation.timeout_secs == 0 || generation.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "generation.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn non_blank(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string).collect()
}

fn parse_id_list(key: &str, value: &str) -> Result<Vec<i64>, ConfigError> {
    split_list(value)
        .iter()
        .map(|item| {
            item.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    bot: Option<BotPatch>,
    mention: Option<MentionPatch>,
    activity: Option<ActivityPatch>,
    generation: Option<GenerationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BotPatch {
    token: Option<String>,
    admin_ids: Option<Vec<i64>>,
    allowed_chat_ids: Option<Vec<i64>>,
    command_prefixes: Option<Vec<String>>,
    deny_notice: Option<String>,
    handle: Option<String>,
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MentionPatch {
    keywords: Option<Vec<String>>,
    question_min_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ActivityPatch {
    probability: Option<f64>,
    cooldown_secs: Option<u64>,
    min_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
    filler_messages: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerationPatch {
    timeout_secs: Option<u64>,
    fallback_reply: Option<String>,
    unavailable_replies: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
