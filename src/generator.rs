use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::error::BotError;
use crate::history::{normalize, HistoryStore};
use crate::llm::CompletionClient;
use crate::parser::parse_candidates;
use crate::prompt::{
    build_generation_prompt, build_reply_prompt, history_tail, today_context_now,
};

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub default_count: usize,
    pub min_count: usize,
    pub max_count: usize,
    pub prompt_history_entries: usize,
    pub generation_temperature: f32,
    pub generation_max_tokens: u32,
    pub reply_temperature: f32,
    pub reply_max_tokens: u32,
    pub timezone: chrono_tz::Tz,
    pub location: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            default_count: 3,
            min_count: 1,
            max_count: 6,
            prompt_history_entries: 20,
            generation_temperature: 0.9,
            generation_max_tokens: 1200,
            reply_temperature: 0.8,
            reply_max_tokens: 300,
            timezone: chrono_tz::Asia::Tokyo,
            location: "Tokyo".into(),
        }
    }
}

impl GenerationSettings {
    /// Requested post count from a command argument. Missing or unparsable input gives the
    /// default; anything else is clamped to `[min_count, max_count]`.
    pub fn clamp_count(&self, arg: Option<&str>) -> usize {
        let requested = arg
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<i64>().ok());
        match requested {
            Some(n) => n.clamp(self.min_count as i64, self.max_count as i64) as usize,
            None => self.default_count,
        }
    }
}

pub struct Generator {
    client: Arc<dyn CompletionClient>,
    history: Arc<HistoryStore>,
    persona: String,
    settings: GenerationSettings,
}

impl Generator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        history: Arc<HistoryStore>,
        persona: String,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            client,
            history,
            persona,
            settings,
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    fn context(&self) -> String {
        today_context_now(self.settings.timezone, &self.settings.location)
    }

    /// Up to `n` new posts that are not already in history, in model order.
    /// An empty result is not an error; the caller should ask the user to try again.
    pub async fn generate_candidates(&self, n: usize) -> Result<Vec<String>, BotError> {
        let snapshot = self.history.load().await;
        let tail = history_tail(&snapshot, self.settings.prompt_history_entries);
        let prompt = build_generation_prompt(&self.persona, tail, &self.context(), n);

        let raw = self
            .client
            .complete(
                &prompt,
                self.settings.generation_temperature,
                self.settings.generation_max_tokens,
            )
            .await?;

        let parsed = parse_candidates(&raw);
        let parsed_count = parsed.len();
        let candidates = filter_new(parsed, &snapshot, n);
        info!(
            "Generated {} candidates (parsed {}, requested {}, history {})",
            candidates.len(),
            parsed_count,
            n,
            snapshot.len()
        );
        Ok(candidates)
    }

    /// Single free-form reply. Does not read or write history.
    pub async fn generate_reply(&self, user_text: &str) -> Result<String, BotError> {
        let prompt = build_reply_prompt(&self.persona, &self.context(), user_text);
        let raw = self
            .client
            .complete(
                &prompt,
                self.settings.reply_temperature,
                self.settings.reply_max_tokens,
            )
            .await?;
        Ok(raw.trim().to_string())
    }
}

/// Drop candidates already present in `history` (and repeats within the batch), keep the
/// first `n`.
fn filter_new(candidates: Vec<String>, history: &[String], n: usize) -> Vec<String> {
    let mut seen: HashSet<String> = history.iter().map(|p| normalize(p)).collect();
    candidates
        .into_iter()
        .filter(|c| seen.insert(normalize(c)))
        .take(n)
        .collect()
}
