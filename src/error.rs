use thiserror::Error;

use crate::session::SelectionError;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("History persistence error: {0}")]
    Persistence(String),

    #[error("Not authorized")]
    Unauthorized,

    #[error(transparent)]
    InvalidSelection(#[from] SelectionError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BotError {
    /// Text shown to the requester when a job fails. Internal details stay in the log.
    pub fn user_message(&self) -> String {
        match self {
            BotError::Completion(_) => {
                "Sorry, I couldn't reach the model right now. Please try again later.".into()
            }
            BotError::Persistence(_) | BotError::Io(_) | BotError::Json(_) => {
                "Sorry, I couldn't save the history. Nothing was changed.".into()
            }
            BotError::Unauthorized => "Not authorized.".into(),
            BotError::InvalidSelection(e) => e.to_string(),
            BotError::Config(e) => format!("Configuration problem: {e}"),
            BotError::Transport(_) => "Sorry, something went wrong while sending.".into(),
        }
    }
}
