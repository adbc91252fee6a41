use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channel::{Choice, Inbound, Payload, Transport};
use crate::channels::startup_guard::{epoch_ms_from_seconds, StartupGuard};
use crate::config::Config;
use crate::dispatch::WorkerPool;
use crate::error::BotError;
use crate::handlers::{handle_inbound, BotCore};
use crate::slash_commands::{split_command, MENU};

const MAX_MESSAGE_LEN: usize = 4096;

pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn transport_err(e: teloxide::RequestError) -> BotError {
    BotError::Transport(e.to_string())
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<(), BotError> {
        for chunk in split_response_text(text) {
            if chunk.is_empty() {
                continue;
            }
            self.bot
                .send_message(ChatId(chat_id), chunk)
                .await
                .map_err(transport_err)?;
        }
        Ok(())
    }

    async fn deliver_choices(
        &self,
        chat_id: i64,
        text: &str,
        choices: &[Choice],
    ) -> Result<(), BotError> {
        let mut chunks = split_response_text(text);
        let last = chunks.pop().unwrap_or_default();
        for chunk in chunks {
            self.bot
                .send_message(ChatId(chat_id), chunk)
                .await
                .map_err(transport_err)?;
        }
        self.bot
            .send_message(ChatId(chat_id), last)
            .reply_markup(choice_keyboard(choices))
            .await
            .map_err(transport_err)?;
        Ok(())
    }

    async fn deliver_document(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<(), BotError> {
        let file = InputFile::memory(bytes).file_name(file_name.to_string());
        self.bot
            .send_document(ChatId(chat_id), file)
            .caption(caption.to_string())
            .await
            .map_err(transport_err)?;
        Ok(())
    }

    async fn clear_choices(&self, chat_id: i64, message_id: i32) -> Result<(), BotError> {
        self.bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id))
            .await
            .map_err(transport_err)?;
        Ok(())
    }
}

/// Numbered picks on the first row, everything else (Cancel) on the second.
fn choice_keyboard(choices: &[Choice]) -> InlineKeyboardMarkup {
    let (picks, rest): (Vec<&Choice>, Vec<&Choice>) =
        choices.iter().partition(|c| c.token.starts_with("pick:"));
    let row = |items: Vec<&Choice>| {
        items
            .into_iter()
            .map(|c| InlineKeyboardButton::callback(c.label.clone(), c.token.clone()))
            .collect::<Vec<_>>()
    };
    let mut rows = vec![row(picks)];
    let extra = row(rest);
    if !extra.is_empty() {
        rows.push(extra);
    }
    InlineKeyboardMarkup::new(rows)
}

pub struct TelegramState {
    pub core: Arc<BotCore>,
    pub transport: Arc<TelegramTransport>,
    pub bot: Bot,
    pub pool: WorkerPool,
    pub guard: StartupGuard,
    pub max_document_bytes: u64,
}

pub async fn run_bot(config: &Config, core: Arc<BotCore>) -> anyhow::Result<()> {
    let bot = Bot::new(&config.telegram_bot_token);

    // Register slash commands so they appear in the Telegram menu
    let commands: Vec<BotCommand> = MENU
        .iter()
        .map(|(command, description)| BotCommand::new(*command, *description))
        .collect();
    if let Err(e) = bot.set_my_commands(commands).await {
        error!("Failed to set Telegram bot commands: {}", e);
    }

    let state = Arc::new(TelegramState {
        core,
        transport: Arc::new(TelegramTransport::new(bot.clone())),
        bot: bot.clone(),
        pool: WorkerPool::new(config.max_workers),
        guard: StartupGuard::new("telegram"),
        max_document_bytes: config.max_document_size_kb.saturating_mul(1024),
    });
    state.guard.mark_started();
    info!(
        "Telegram channel started (workers={}, owner restricted={})",
        state.pool.capacity(),
        config.is_owner_restricted()
    );

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    state: Arc<TelegramState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let message_time_ms = Some(epoch_ms_from_seconds(msg.date.timestamp()));
    if state
        .guard
        .should_drop(&msg.id.0.to_string(), message_time_ms)
    {
        return Ok(());
    }

    let chat_id = msg.chat.id.0;
    let sender_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);
    let reply_to_text = msg
        .reply_to_message()
        .and_then(|r| r.text().or_else(|| r.caption()))
        .map(str::to_string);

    if let Some(document) = msg.document() {
        if !state.core.is_authorized(sender_id) {
            info!("Ignoring document from non-owner {sender_id}");
            bot.send_message(msg.chat.id, BotError::Unauthorized.user_message())
                .await?;
            return Ok(());
        }
        let size = u64::from(document.file.size);
        if size > state.max_document_bytes {
            info!("Refusing document of {size} bytes from {sender_id}");
            bot.send_message(
                msg.chat.id,
                format!(
                    "That file is too large. The limit is {} KB.",
                    state.max_document_bytes / 1024
                ),
            )
            .await?;
            return Ok(());
        }
        let file_name = document
            .file_name
            .clone()
            .unwrap_or_else(|| "document.txt".to_string());
        let file_id = document.file.id.clone();
        let caption = msg.caption().map(str::to_string);
        let job_state = state.clone();
        dispatch(&state, chat_id, "document", async move {
            let content = match download_telegram_file(&job_state.bot, file_id).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    error!("Failed to download document {file_name}: {e}");
                    let _ = job_state
                        .transport
                        .deliver(chat_id, "Sorry, I couldn't download that file.")
                        .await;
                    return;
                }
            };
            let inbound = Inbound {
                chat_id,
                sender_id,
                reply_to_text: None,
                payload: Payload::File {
                    file_name,
                    content,
                    caption,
                },
            };
            handle_inbound(&job_state.core, job_state.transport.as_ref(), inbound).await;
        });
        return Ok(());
    }

    let text = msg.text().or_else(|| msg.caption()).unwrap_or("");
    if text.trim().is_empty() {
        return Ok(());
    }
    let payload = match split_command(text) {
        Some((name, args)) => Payload::Command { name, args },
        None => Payload::Text(text.to_string()),
    };
    info!(
        "Telegram message chat={} sender={} command={}",
        chat_id,
        sender_id,
        matches!(payload, Payload::Command { .. })
    );

    let inbound = Inbound {
        chat_id,
        sender_id,
        reply_to_text,
        payload,
    };
    let job_state = state.clone();
    dispatch(&state, chat_id, "message", async move {
        run_with_typing(&job_state, inbound).await;
    });
    Ok(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<TelegramState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!("Failed to answer callback query: {e}");
    }

    let (Some(token), Some(message)) = (q.data.clone(), q.message.as_ref()) else {
        return Ok(());
    };
    let chat_id = message.chat().id.0;
    let inbound = Inbound {
        chat_id,
        sender_id: q.from.id.0 as i64,
        reply_to_text: None,
        payload: Payload::Button {
            token,
            message_id: Some(message.id().0),
        },
    };
    let job_state = state.clone();
    dispatch(&state, chat_id, "callback", async move {
        handle_inbound(&job_state.core, job_state.transport.as_ref(), inbound).await;
    });
    Ok(())
}

fn dispatch<F>(state: &Arc<TelegramState>, chat_id: i64, label: &str, job: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let transport = state.transport.clone();
    state.pool.spawn(label, job, move || async move {
        let _ = transport
            .deliver(chat_id, "Sorry, something went wrong.")
            .await;
    });
}

/// Aborts the wrapped task when dropped, including while a panic unwinds.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Keep the typing indicator up while a model call is in flight.
async fn run_with_typing(state: &TelegramState, inbound: Inbound) {
    let _typing = inbound.payload.calls_model().then(|| {
        let typing_bot = state.bot.clone();
        let typing_chat_id = ChatId(inbound.chat_id);
        AbortOnDrop(tokio::spawn(async move {
            loop {
                let _ = typing_bot
                    .send_chat_action(typing_chat_id, ChatAction::Typing)
                    .await;
                tokio::time::sleep(std::time::Duration::from_secs(4)).await;
            }
        }))
    });

    handle_inbound(&state.core, state.transport.as_ref(), inbound).await;
}

async fn download_telegram_file(
    bot: &Bot,
    file_id: String,
) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    let file = bot.get_file(file_id).await?;
    let mut buf = Vec::new();
    teloxide::net::Download::download_file(bot, &file.path, &mut buf).await?;
    Ok(buf)
}

/// Split text into chunks of at most 4096 bytes, preferring newline boundaries and never
/// cutting inside a UTF-8 character.
fn split_response_text(text: &str) -> Vec<String> {
    if text.len() <= MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let chunk_len = if remaining.len() <= MAX_MESSAGE_LEN {
            remaining.len()
        } else {
            let mut end = MAX_MESSAGE_LEN;
            while !remaining.is_char_boundary(end) {
                end -= 1;
            }
            remaining[..end].rfind('\n').unwrap_or(end)
        };
        chunks.push(remaining[..chunk_len].to_string());
        remaining = &remaining[chunk_len..];
        if remaining.starts_with('\n') {
            remaining = &remaining[1..];
        }
    }
    chunks
}
