//! Durable, bounded log of previously sent posts.
//!
//! The log is a JSON array of strings, most recent last. Entries are unique under
//! [`normalize`]. Every write trims the oldest entries until the log fits the token
//! budget; reads never trim.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::BotError;

/// Characters per token used by [`approx_tokens`]. A heuristic, not a tokenizer.
pub const CHARS_PER_TOKEN: usize = 4;

/// Imported paragraphs shorter than this (in characters) are treated as noise.
pub const MIN_IMPORT_PARAGRAPH_CHARS: usize = 10;

/// Equality key for posts: lowercase, whitespace runs collapsed, trimmed.
/// Used only for comparison, never for storage.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Approximate token count of a set of posts: total characters / 4.
pub fn approx_tokens(posts: &[String]) -> usize {
    total_chars(posts) / CHARS_PER_TOKEN
}

fn total_chars(posts: &[String]) -> usize {
    posts.iter().map(|p| p.chars().count()).sum()
}

/// Keep the longest most-recent suffix whose size stays within `token_limit`.
pub fn evict_to_budget(mut posts: Vec<String>, token_limit: usize) -> Vec<String> {
    let budget_chars = token_limit.saturating_mul(CHARS_PER_TOKEN);
    let mut used = 0usize;
    let mut keep_from = posts.len();
    for (idx, post) in posts.iter().enumerate().rev() {
        let len = post.chars().count();
        if used + len > budget_chars {
            break;
        }
        used += len;
        keep_from = idx;
    }
    posts.drain(..keep_from);
    posts
}

/// Split raw import text into candidate posts: blank-line separated paragraphs,
/// trimmed, with short paragraphs dropped.
pub fn split_import_paragraphs(text: &str) -> Vec<String> {
    split_paragraphs(text)
        .into_iter()
        .filter(|p| p.chars().count() >= MIN_IMPORT_PARAGRAPH_CHARS)
        .collect()
}

/// Split on blank lines (lines that are empty after trimming). Paragraphs are trimmed and
/// empty ones skipped.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n").trim().to_string());
    }
    out.retain(|p| !p.is_empty());
    out
}

/// Render history as a plain-text document: paragraphs joined by a blank line.
pub fn render_export(posts: &[String]) -> String {
    posts.join("\n\n")
}

pub struct HistoryStore {
    path: PathBuf,
    token_limit: usize,
    /// Serializes every read-modify-write of the file.
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, token_limit: usize) -> Self {
        HistoryStore {
            path: path.into(),
            token_limit,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    /// Current contents, or empty when missing or unreadable.
    pub async fn load(&self) -> Vec<String> {
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || load_blocking(&path)).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!("History load task failed: {e}");
                Vec::new()
            }
        }
    }

    /// Trim to the token budget and atomically replace the stored log.
    /// Returns how many entries were kept.
    pub async fn persist(&self, history: Vec<String>) -> Result<usize, BotError> {
        let _guard = self.write_lock.lock().await;
        self.persist_locked(history).await
    }

    /// Append candidates whose normalized form is not already stored. Returns the count added.
    pub async fn append_unique(&self, candidates: &[String]) -> Result<usize, BotError> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.load().await;
        let mut seen: HashSet<String> = history.iter().map(|p| normalize(p)).collect();
        let mut added = 0usize;
        for candidate in candidates {
            let trimmed = candidate.trim();
            if trimmed.is_empty() {
                continue;
            }
            if seen.insert(normalize(trimmed)) {
                history.push(trimmed.to_string());
                added += 1;
            }
        }
        self.persist_locked(history).await?;
        Ok(added)
    }

    pub async fn clear(&self) -> Result<(), BotError> {
        self.persist(Vec::new()).await.map(|_| ())
    }

    async fn persist_locked(&self, history: Vec<String>) -> Result<usize, BotError> {
        let kept = evict_to_budget(history, self.token_limit);
        let count = kept.len();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &kept))
            .await
            .map_err(|e| BotError::Persistence(format!("history write task failed: {e}")))??;
        info!("History persisted ({count} posts) to {}", self.path.display());
        Ok(count)
    }
}

fn load_blocking(path: &Path) -> Vec<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Failed to read history {}: {e}", path.display());
            return Vec::new();
        }
    };
    if content.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<String>>(&content) {
        Ok(posts) => posts,
        Err(e) => {
            warn!("History {} is corrupt, treating as empty: {e}", path.display());
            Vec::new()
        }
    }
}

fn write_atomic(path: &Path, posts: &[String]) -> Result<(), BotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(posts)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
