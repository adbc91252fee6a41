//! Prompt templates for post generation and free-form replies.

use chrono::{DateTime, Datelike, TimeZone, Utc};

pub const DEFAULT_PERSONA: &str = "You are Kenma Kozume from Haikyuu!!, a 15-year-old introverted gamer who just started using social media after being convinced by Kuroo. The year is 2025, before the manga events. Be minimal, introspective, slightly ironic. Never use emoji. Never use hashtags. Write each post in English first, then add its Russian translation on the following line(s).";

const EMPTY_HISTORY_PLACEHOLDER: &str = "(no previous posts yet)";

/// Northern-hemisphere seasons indexed by month (January = 0).
const SEASONS: [&str; 12] = [
    "winter", "winter", "spring", "spring", "spring", "summer", "summer", "summer", "autumn",
    "autumn", "autumn", "winter",
];

pub fn season_for_month(month: u32) -> &'static str {
    SEASONS[(month.clamp(1, 12) - 1) as usize]
}

/// "Today is Monday, 06 January 2025. It's winter in Tokyo."
pub fn today_context<Tz: TimeZone>(now: &DateTime<Tz>, location: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "Today is {}, {}. It's {} in {}.",
        now.format("%A"),
        now.format("%d %B %Y"),
        season_for_month(now.month()),
        location
    )
}

/// Context for the current moment in the configured timezone.
pub fn today_context_now(tz: chrono_tz::Tz, location: &str) -> String {
    today_context(&Utc::now().with_timezone(&tz), location)
}

/// The last `max_entries` posts, oldest first.
pub fn history_tail(history: &[String], max_entries: usize) -> &[String] {
    let start = history.len().saturating_sub(max_entries);
    &history[start..]
}

pub fn build_generation_prompt(
    persona: &str,
    history_tail: &[String],
    context: &str,
    n: usize,
) -> String {
    let previous = if history_tail.is_empty() {
        EMPTY_HISTORY_PLACEHOLDER.to_string()
    } else {
        history_tail
            .iter()
            .map(|p| format!("- {}", p.trim().replace('\n', " / ")))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        r#"{persona}

{context}

Previous posts (do NOT repeat these ideas or phrasings):
{previous}

Write exactly {n} new short posts. Each post is one English tweet followed by its Russian translation, separated by a newline.
Return ONLY a raw JSON array of exactly {n} strings, for example ["post one\nперевод", "post two\nперевод"]. No commentary, no numbering, no code fences."#
    )
}

pub fn build_reply_prompt(persona: &str, context: &str, user_text: &str) -> String {
    format!(
        r#"{persona}

{context}

Someone wrote to you:
{user_text}

Reply in character with a short message, English first and then its Russian translation."#,
        user_text = user_text.trim()
    )
}
