use crate::env_file::parse_dotenv;
use crate::error::BotError;
use crate::generator::GenerationSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

fn default_llm_provider() -> String {
    "openai".into()
}
fn default_timezone() -> String {
    "Asia/Tokyo".into()
}
fn default_location_name() -> String {
    "Tokyo".into()
}
fn default_data_dir() -> String {
    "./data".into()
}
fn default_history_token_limit() -> usize {
    3000
}
fn default_prompt_history_entries() -> usize {
    20
}
fn default_post_count() -> usize {
    3
}
fn default_min_post_count() -> usize {
    1
}
fn default_max_post_count() -> usize {
    6
}
fn default_generation_temperature() -> f32 {
    0.9
}
fn default_generation_max_tokens() -> u32 {
    1200
}
fn default_reply_temperature() -> f32 {
    0.8
}
fn default_reply_max_tokens() -> u32 {
    300
}
fn default_max_workers() -> usize {
    8
}
fn default_max_document_size_kb() -> u64 {
    512
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub llm_base_url: Option<String>,
    /// Upper bound for one completion call. None = wait indefinitely.
    #[serde(default)]
    pub llm_timeout_secs: Option<u64>,
    /// Telegram user id allowed to generate and edit history. 0 = anyone.
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Place name used in the "It's winter in ..." context line.
    #[serde(default = "default_location_name")]
    pub location_name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_history_token_limit")]
    pub history_token_limit: usize,
    #[serde(default = "default_prompt_history_entries")]
    pub prompt_history_entries: usize,
    #[serde(default = "default_post_count")]
    pub default_post_count: usize,
    #[serde(default = "default_min_post_count")]
    pub min_post_count: usize,
    #[serde(default = "default_max_post_count")]
    pub max_post_count: usize,
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,
    #[serde(default = "default_generation_max_tokens")]
    pub generation_max_tokens: u32,
    #[serde(default = "default_reply_temperature")]
    pub reply_temperature: f32,
    #[serde(default = "default_reply_max_tokens")]
    pub reply_max_tokens: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_document_size_kb")]
    pub max_document_size_kb: u64,
    /// Optional text file replacing the built-in persona description.
    #[serde(default)]
    pub persona_file: Option<String>,
    /// When set, logs are also written to `<log_dir>/kenmabot.log`.
    #[serde(default)]
    pub log_dir: Option<String>,
}

/// Environment variables that override config values.
const ENV_OVERRIDES: &[&str] = &[
    "TELEGRAM_TOKEN",
    "OPENAI_API_KEY",
    "OPENAI_MODEL",
    "LLM_PROVIDER",
    "LLM_BASE_URL",
    "TIMEZONE",
    "BOT_OWNER_ID",
    "KENMABOT_DATA_DIR",
];

impl Config {
    /// Path of the JSON history file.
    pub fn history_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("history.json")
    }

    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::Tz::UTC)
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            default_count: self.default_post_count,
            min_count: self.min_post_count,
            max_count: self.max_post_count,
            prompt_history_entries: self.prompt_history_entries,
            generation_temperature: self.generation_temperature,
            generation_max_tokens: self.generation_max_tokens,
            reply_temperature: self.reply_temperature,
            reply_max_tokens: self.reply_max_tokens,
            timezone: self.tz(),
            location: self.location_name.clone(),
        }
    }

    /// Persona text: `persona_file` if readable and non-empty, otherwise the built-in persona.
    pub fn persona(&self) -> String {
        if let Some(path) = &self.persona_file {
            match std::fs::read_to_string(path) {
                Ok(text) if !text.trim().is_empty() => return text.trim().to_string(),
                Ok(_) => tracing::warn!("Persona file {path} is empty, using built-in persona"),
                Err(e) => tracing::warn!("Failed to read persona file {path}: {e}"),
            }
        }
        crate::prompt::DEFAULT_PERSONA.to_string()
    }

    pub fn is_owner_restricted(&self) -> bool {
        self.owner_id != 0
    }

    pub fn resolve_config_path() -> Result<Option<PathBuf>, BotError> {
        if let Ok(custom) = std::env::var("KENMABOT_CONFIG") {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(BotError::Config(format!(
                "KENMABOT_CONFIG points to non-existent file: {custom}"
            )));
        }

        if std::path::Path::new("./kenmabot.config.yaml").exists() {
            return Ok(Some(PathBuf::from("./kenmabot.config.yaml")));
        }
        if std::path::Path::new("./kenmabot.config.yml").exists() {
            return Ok(Some(PathBuf::from("./kenmabot.config.yml")));
        }
        Ok(None)
    }

    /// Load config from YAML (if present), then apply `.env` and process environment overrides.
    pub fn load() -> Result<Self, BotError> {
        let mut config: Config = match Self::resolve_config_path()? {
            Some(path) => {
                let path_str = path.to_string_lossy().to_string();
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| BotError::Config(format!("Failed to read {path_str}: {e}")))?;
                serde_yaml::from_str(&content)
                    .map_err(|e| BotError::Config(format!("Failed to parse {path_str}: {e}")))?
            }
            None => serde_yaml::from_str("{}")
                .map_err(|e| BotError::Config(format!("Failed to build default config: {e}")))?,
        };

        let dotenv = std::fs::read_to_string(".env")
            .map(|content| parse_dotenv(&content))
            .unwrap_or_default();
        let env = collect_env(&dotenv, |key| std::env::var(key).ok());
        config.apply_env_overrides(&env)?;
        config.post_deserialize()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(
        &mut self,
        env: &HashMap<String, String>,
    ) -> Result<(), BotError> {
        for (key, value) in env {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "TELEGRAM_TOKEN" => self.telegram_bot_token = value.to_string(),
                "OPENAI_API_KEY" => self.api_key = value.to_string(),
                "OPENAI_MODEL" => self.model = value.to_string(),
                "LLM_PROVIDER" => self.llm_provider = value.to_string(),
                "LLM_BASE_URL" => self.llm_base_url = Some(value.to_string()),
                "TIMEZONE" => self.timezone = value.to_string(),
                "BOT_OWNER_ID" => {
                    self.owner_id = value.parse().map_err(|_| {
                        BotError::Config(format!("BOT_OWNER_ID must be an integer, got {value}"))
                    })?
                }
                "KENMABOT_DATA_DIR" => self.data_dir = value.to_string(),
                _ => {}
            }
        }
        Ok(())
    }

    /// Apply post-deserialization normalization and validation.
    pub(crate) fn post_deserialize(&mut self) -> Result<(), BotError> {
        self.llm_provider = self.llm_provider.trim().to_lowercase();

        if self.model.trim().is_empty() {
            self.model = match self.llm_provider.as_str() {
                "ollama" => "llama3.2".into(),
                _ => "gpt-4o".into(),
            };
        }

        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| BotError::Config(format!("Invalid timezone: {}", self.timezone)))?;

        if let Some(ref url) = self.llm_base_url {
            if url.trim().is_empty() {
                self.llm_base_url = None;
            }
        }
        if let Some(ref path) = self.persona_file {
            if path.trim().is_empty() {
                self.persona_file = None;
            }
        }
        if let Some(ref dir) = self.log_dir {
            if dir.trim().is_empty() {
                self.log_dir = None;
            }
        }
        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
        }
        if self.location_name.trim().is_empty() {
            self.location_name = default_location_name();
        }
        if self.history_token_limit == 0 {
            self.history_token_limit = default_history_token_limit();
        }
        if self.max_workers == 0 {
            self.max_workers = default_max_workers();
        }
        if self.max_document_size_kb == 0 {
            self.max_document_size_kb = default_max_document_size_kb();
        }
        if self.min_post_count == 0 {
            self.min_post_count = 1;
        }
        if self.max_post_count < self.min_post_count {
            return Err(BotError::Config(format!(
                "max_post_count ({}) must be >= min_post_count ({})",
                self.max_post_count, self.min_post_count
            )));
        }
        self.default_post_count = self
            .default_post_count
            .clamp(self.min_post_count, self.max_post_count);

        if self.telegram_bot_token.trim().is_empty() {
            return Err(BotError::Config(
                "telegram_bot_token is required (or set TELEGRAM_TOKEN)".into(),
            ));
        }
        if self.api_key.trim().is_empty() && self.llm_provider != "ollama" {
            return Err(BotError::Config(
                "api_key is required (or set OPENAI_API_KEY)".into(),
            ));
        }

        Ok(())
    }
}

/// Merge override variables: process environment wins over `.env` values.
fn collect_env(
    dotenv: &HashMap<String, String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for key in ENV_OVERRIDES {
        if let Some(value) = lookup(key).or_else(|| dotenv.get(*key).cloned()) {
            out.insert((*key).to_string(), value);
        }
    }
    out
}
