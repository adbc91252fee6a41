use std::sync::atomic::{AtomicI64, Ordering};

use tracing::info;

const NOT_STARTED: i64 = i64::MIN;

/// Drops messages dated before the channel started, so a backlog queued while the bot was
/// down does not trigger a burst of generations on restart.
pub struct StartupGuard {
    channel_name: String,
    start_ms: AtomicI64,
}

impl StartupGuard {
    pub fn new(channel_name: &str) -> Self {
        Self {
            channel_name: channel_name.to_string(),
            start_ms: AtomicI64::new(NOT_STARTED),
        }
    }

    pub fn mark_started(&self) {
        self.mark_started_at(chrono::Utc::now().timestamp_millis());
    }

    /// Message dates have one-second resolution, so the start is floored to the second.
    pub fn mark_started_at(&self, now_ms: i64) {
        self.start_ms
            .store(now_ms - now_ms.rem_euclid(1000), Ordering::SeqCst);
    }

    pub fn should_drop(&self, message_id: &str, message_time_ms: Option<i64>) -> bool {
        let Some(msg_ms) = message_time_ms else {
            return false;
        };
        let start_ms = self.start_ms.load(Ordering::SeqCst);
        if start_ms == NOT_STARTED {
            return false;
        }
        if msg_ms < start_ms {
            info!(
                "Channel startup guard: dropping pre-start message channel={} message_id={} message_ms={} startup_ms={}",
                self.channel_name, message_id, msg_ms, start_ms
            );
            return true;
        }
        false
    }
}

pub fn epoch_ms_from_seconds(secs: i64) -> i64 {
    secs.saturating_mul(1000)
}
