//! Channel-neutral inbound/outbound shapes. The Telegram adapter converts updates
//! into `Inbound` and implements `Transport`; handlers only see these types.

use async_trait::async_trait;

use crate::error::BotError;

/// One selectable button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `/name args`. `name` is lower-case without the slash or `@bot` suffix.
    Command { name: String, args: String },
    Text(String),
    /// Button press. `message_id` is the message carrying the keyboard, when known.
    Button {
        token: String,
        message_id: Option<i32>,
    },
    /// An uploaded document, already downloaded and decoded.
    File {
        file_name: String,
        content: String,
        caption: Option<String>,
    },
}

impl Payload {
    /// True when handling this payload calls the language model.
    pub fn calls_model(&self) -> bool {
        match self {
            Payload::Text(_) => true,
            Payload::Command { name, .. } => matches!(name.as_str(), "post" | "generate"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub chat_id: i64,
    pub sender_id: i64,
    /// Text or caption of the message this one replies to.
    pub reply_to_text: Option<String>,
    pub payload: Payload,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<(), BotError>;

    async fn deliver_choices(
        &self,
        chat_id: i64,
        text: &str,
        choices: &[Choice],
    ) -> Result<(), BotError>;

    async fn deliver_document(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<(), BotError>;

    /// Remove the buttons from a previously delivered choice message.
    async fn clear_choices(&self, chat_id: i64, message_id: i32) -> Result<(), BotError>;
}
