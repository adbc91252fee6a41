//! Channel-neutral handling of one inbound update: commands, button presses, uploaded
//! documents and free text.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::channel::{Choice, Inbound, Payload, Transport};
use crate::error::BotError;
use crate::generator::Generator;
use crate::history::{approx_tokens, render_export, split_import_paragraphs, HistoryStore};
use crate::session::{SelectionAction, SessionStore};
use crate::slash_commands::{from_parts, SlashCommand};

pub const HELP_TEXT: &str = "I draft short posts in character and remember what was already posted.

/post [n]: draft n new posts (default 3) and pick one to keep
/import [text]: add posts to history from inline text, a message you reply to, or an uploaded .txt file
/export: download the history as history.txt
/history: show how many posts are stored
/clear: erase the history

Any other message gets a reply in character.";

pub const NOTHING_NEW_TEXT: &str =
    "I couldn't come up with anything new this time. Try /post again.";

pub const NOTHING_TO_IMPORT_TEXT: &str = "Nothing to import. Send /import followed by text, reply to a message with /import, or upload a .txt file first.";

pub struct BotCore {
    /// 0 = no restriction.
    pub owner_id: i64,
    pub history: Arc<HistoryStore>,
    pub sessions: SessionStore,
    pub generator: Generator,
}

impl BotCore {
    pub fn new(owner_id: i64, history: Arc<HistoryStore>, generator: Generator) -> Self {
        Self {
            owner_id,
            history,
            sessions: SessionStore::new(),
            generator,
        }
    }

    /// Whether `sender_id` may generate, commit or change history.
    pub fn is_authorized(&self, sender_id: i64) -> bool {
        self.owner_id == 0 || self.owner_id == sender_id
    }

    fn authorize(&self, sender_id: i64) -> Result<(), BotError> {
        if self.is_authorized(sender_id) {
            Ok(())
        } else {
            warn!("Rejected request from non-owner {sender_id}");
            Err(BotError::Unauthorized)
        }
    }
}

/// Handle one update and deliver whatever the user should see. Failures are logged and
/// reported to the chat once.
pub async fn handle_inbound(core: &BotCore, transport: &dyn Transport, inbound: Inbound) {
    let chat_id = inbound.chat_id;
    if let Err(e) = route(core, transport, inbound).await {
        match &e {
            BotError::Unauthorized | BotError::InvalidSelection(_) => info!("{e}"),
            _ => error!("Error handling update for chat {chat_id}: {e}"),
        }
        if let Err(send_err) = transport.deliver(chat_id, &e.user_message()).await {
            error!("Failed to report error to chat {chat_id}: {send_err}");
        }
    }
}

async fn route(
    core: &BotCore,
    transport: &dyn Transport,
    inbound: Inbound,
) -> Result<(), BotError> {
    let Inbound {
        chat_id,
        sender_id,
        reply_to_text,
        payload,
    } = inbound;

    match payload {
        Payload::Command { name, args } => {
            let command = from_parts(&name, &args);
            handle_command(core, transport, chat_id, sender_id, reply_to_text, command).await
        }
        Payload::Button { token, message_id } => {
            core.authorize(sender_id)?;
            handle_button(core, transport, chat_id, sender_id, &token, message_id).await
        }
        Payload::File {
            file_name,
            content,
            caption,
        } => {
            core.authorize(sender_id)?;
            let import_now = caption
                .as_deref()
                .and_then(crate::slash_commands::parse)
                .is_some_and(|c| matches!(c, SlashCommand::Import(_)));
            if import_now {
                return import_text(core, transport, chat_id, &content).await;
            }
            let found = split_import_paragraphs(&content).len();
            core.sessions.stage_import(sender_id, content);
            info!("Staged document {file_name} with {found} paragraphs for {sender_id}");
            transport
                .deliver(
                    chat_id,
                    &format!(
                        "Received {file_name}: {found} paragraphs found. Send /import to add them to the history."
                    ),
                )
                .await
        }
        Payload::Text(text) => {
            let reply = core.generator.generate_reply(&text).await?;
            transport.deliver(chat_id, &reply).await
        }
    }
}

async fn handle_command(
    core: &BotCore,
    transport: &dyn Transport,
    chat_id: i64,
    sender_id: i64,
    reply_to_text: Option<String>,
    command: SlashCommand,
) -> Result<(), BotError> {
    match command {
        SlashCommand::Start | SlashCommand::Help => transport.deliver(chat_id, HELP_TEXT).await,
        SlashCommand::Unknown(_) => transport.deliver(chat_id, "Unknown command.").await,
        SlashCommand::Post(args) => {
            core.authorize(sender_id)?;
            let n = core.generator.settings().clamp_count(Some(args.as_str()));
            offer_candidates(core, transport, chat_id, sender_id, n).await
        }
        SlashCommand::Import(args) => {
            core.authorize(sender_id)?;
            let source = Some(args)
                .filter(|a| !a.trim().is_empty())
                .or_else(|| reply_to_text.filter(|t| !t.trim().is_empty()))
                .or_else(|| core.sessions.take_import(sender_id));
            match source {
                Some(text) => import_text(core, transport, chat_id, &text).await,
                None => transport.deliver(chat_id, NOTHING_TO_IMPORT_TEXT).await,
            }
        }
        SlashCommand::Export => {
            core.authorize(sender_id)?;
            let posts = core.history.load().await;
            if posts.is_empty() {
                return transport.deliver(chat_id, "History is empty.").await;
            }
            let body = render_export(&posts).into_bytes();
            transport
                .deliver_document(
                    chat_id,
                    "history.txt",
                    body,
                    &format!("{} posts", posts.len()),
                )
                .await
        }
        SlashCommand::Clear => {
            core.authorize(sender_id)?;
            core.history.clear().await?;
            info!("History cleared by {sender_id}");
            transport.deliver(chat_id, "History cleared.").await
        }
        SlashCommand::History => {
            core.authorize(sender_id)?;
            let posts = core.history.load().await;
            transport
                .deliver(
                    chat_id,
                    &format!(
                        "History: {} posts, ~{} of {} tokens.",
                        posts.len(),
                        approx_tokens(&posts),
                        core.history.token_limit()
                    ),
                )
                .await
        }
    }
}

async fn offer_candidates(
    core: &BotCore,
    transport: &dyn Transport,
    chat_id: i64,
    sender_id: i64,
    n: usize,
) -> Result<(), BotError> {
    let candidates = core.generator.generate_candidates(n).await?;
    if candidates.is_empty() {
        return transport.deliver(chat_id, NOTHING_NEW_TEXT).await;
    }

    let pending = core.sessions.offer(sender_id, candidates);
    let mut text = String::from("Pick one to keep:\n");
    let mut choices = Vec::with_capacity(pending.candidates.len() + 1);
    for (i, candidate) in pending.candidates.iter().enumerate() {
        let label = (i + 1).to_string();
        text.push_str(&format!("\n{label}. {candidate}\n"));
        choices.push(Choice {
            token: SelectionAction::pick_token(pending.offer_id, i + 1),
            label,
        });
    }
    choices.push(Choice {
        label: "Cancel".into(),
        token: SelectionAction::cancel_token(pending.offer_id),
    });
    transport.deliver_choices(chat_id, &text, &choices).await
}

async fn handle_button(
    core: &BotCore,
    transport: &dyn Transport,
    chat_id: i64,
    sender_id: i64,
    token: &str,
    message_id: Option<i32>,
) -> Result<(), BotError> {
    let Some(action) = SelectionAction::parse(token) else {
        warn!("Ignoring unrecognized button token {token:?}");
        return transport.deliver(chat_id, "Unknown button.").await;
    };

    match action {
        SelectionAction::Pick { offer_id, index } => {
            let (pending, text) = core.sessions.take(sender_id, Some(offer_id), index)?;
            let added = match core.history.append_unique(std::slice::from_ref(&text)).await {
                Ok(added) => added,
                Err(e) => {
                    core.sessions.restore(sender_id, pending);
                    return Err(e);
                }
            };
            info!("Committed option {index} of offer {offer_id} (added {added})");
            clear_keyboard(transport, chat_id, message_id).await;
            transport.deliver(chat_id, &text).await
        }
        SelectionAction::Cancel { offer_id } => {
            let discarded = core.sessions.cancel(sender_id, Some(offer_id))?;
            clear_keyboard(transport, chat_id, message_id).await;
            transport
                .deliver(chat_id, &format!("Cancelled. {discarded} options discarded."))
                .await
        }
    }
}

async fn clear_keyboard(transport: &dyn Transport, chat_id: i64, message_id: Option<i32>) {
    if let Some(message_id) = message_id {
        if let Err(e) = transport.clear_choices(chat_id, message_id).await {
            warn!("Failed to remove keyboard from message {message_id}: {e}");
        }
    }
}

async fn import_text(
    core: &BotCore,
    transport: &dyn Transport,
    chat_id: i64,
    text: &str,
) -> Result<(), BotError> {
    let paragraphs = split_import_paragraphs(text);
    if paragraphs.is_empty() {
        return transport
            .deliver(chat_id, "No paragraphs of 10 or more characters found.")
            .await;
    }
    let added = core.history.append_unique(&paragraphs).await?;
    let total = core.history.load().await.len();
    info!(
        "Imported {added} of {} paragraphs, history now {total}",
        paragraphs.len()
    );
    transport
        .deliver(
            chat_id,
            &format!(
                "Imported {added} new posts ({} already known). History now holds {total} posts.",
                paragraphs.len() - added
            ),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::tests::ScriptedClient;
    use crate::generator::GenerationSettings;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text(String),
        Choices(String, Vec<Choice>),
        Document(String, Vec<u8>),
        Cleared(i32),
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn last_text(&self) -> String {
            self.sent()
                .into_iter()
                .rev()
                .find_map(|s| match s {
                    Sent::Text(t) => Some(t),
                    _ => None,
                })
                .unwrap_or_default()
        }

        fn last_choices(&self) -> Vec<Choice> {
            self.sent()
                .into_iter()
                .rev()
                .find_map(|s| match s {
                    Sent::Choices(_, c) => Some(c),
                    _ => None,
                })
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(&self, _chat_id: i64, text: &str) -> Result<(), BotError> {
            self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
            Ok(())
        }

        async fn deliver_choices(
            &self,
            _chat_id: i64,
            text: &str,
            choices: &[Choice],
        ) -> Result<(), BotError> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Choices(text.to_string(), choices.to_vec()));
            Ok(())
        }

        async fn deliver_document(
            &self,
            _chat_id: i64,
            file_name: &str,
            bytes: Vec<u8>,
            _caption: &str,
        ) -> Result<(), BotError> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Document(file_name.to_string(), bytes));
            Ok(())
        }

        async fn clear_choices(&self, _chat_id: i64, message_id: i32) -> Result<(), BotError> {
            self.sent.lock().unwrap().push(Sent::Cleared(message_id));
            Ok(())
        }
    }

    struct Fixture {
        core: BotCore,
        client: Arc<ScriptedClient>,
        transport: RecordingTransport,
        dir: std::path::PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn fixture(owner_id: i64, responses: Vec<Result<String, BotError>>) -> Fixture {
        let dir = std::env::temp_dir().join(format!("kenmabot_handlers_{}", uuid::Uuid::new_v4()));
        let history = Arc::new(HistoryStore::new(dir.join("history.json"), 3000));
        let client = ScriptedClient::new(responses);
        let generator = Generator::new(
            client.clone(),
            history.clone(),
            "persona".into(),
            GenerationSettings::default(),
        );
        Fixture {
            core: BotCore::new(owner_id, history, generator),
            client,
            transport: RecordingTransport::default(),
            dir,
        }
    }

    fn command(sender_id: i64, name: &str, args: &str) -> Inbound {
        Inbound {
            chat_id: 100,
            sender_id,
            reply_to_text: None,
            payload: Payload::Command {
                name: name.into(),
                args: args.into(),
            },
        }
    }

    fn button(sender_id: i64, token: &str) -> Inbound {
        Inbound {
            chat_id: 100,
            sender_id,
            reply_to_text: None,
            payload: Payload::Button {
                token: token.into(),
                message_id: Some(55),
            },
        }
    }

    async fn run(f: &Fixture, inbound: Inbound) {
        handle_inbound(&f.core, &f.transport, inbound).await;
    }

    #[tokio::test]
    async fn test_non_owner_is_denied_without_side_effects() {
        let f = fixture(42, vec![Ok(r#"["never used"]"#.into())]);
        f.core
            .history
            .append_unique(&["existing post".to_string()])
            .await
            .unwrap();

        for inbound in [
            command(7, "post", ""),
            command(7, "import", "Some imported paragraph text."),
            command(7, "clear", ""),
            command(7, "export", ""),
            command(7, "history", ""),
            button(7, "pick:1:1"),
        ] {
            run(&f, inbound).await;
            assert_eq!(f.transport.last_text(), "Not authorized.");
        }

        assert_eq!(f.client.calls(), 0);
        assert_eq!(f.core.history.load().await, vec!["existing post".to_string()]);
        assert!(f.core.sessions.pending(7).is_none());
    }

    #[tokio::test]
    async fn test_reply_mode_is_open_to_everyone() {
        let f = fixture(42, vec![Ok("  fine.\nнормально.  ".into())]);
        let inbound = Inbound {
            chat_id: 100,
            sender_id: 7,
            reply_to_text: None,
            payload: Payload::Text("how are you".into()),
        };
        run(&f, inbound).await;
        assert_eq!(f.transport.last_text(), "fine.\nнормально.");
        assert!(f.core.history.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_post_pick_commits_once() {
        let f = fixture(0, vec![Ok(r#"["first idea", "second idea"]"#.into())]);
        run(&f, command(1, "post", "2")).await;

        let choices = f.transport.last_choices();
        assert_eq!(choices.len(), 3);
        assert_eq!(choices[1].label, "2");
        assert_eq!(choices[2].label, "Cancel");

        run(&f, button(1, &choices[1].token)).await;
        assert_eq!(f.core.history.load().await, vec!["second idea".to_string()]);
        assert!(f.transport.sent().contains(&Sent::Cleared(55)));
        assert_eq!(f.transport.last_text(), "second idea");

        // Pressing again after the offer was cleared is rejected and changes nothing
        run(&f, button(1, &choices[0].token)).await;
        assert_eq!(
            f.transport.last_text(),
            crate::session::SelectionError::NothingPending.to_string()
        );
        assert_eq!(f.core.history.load().await.len(), 1);
    }

    #[tokio::test]
    async fn test_simultaneous_picks_commit_exactly_one() {
        let f = fixture(0, vec![Ok(r#"["left idea", "right idea"]"#.into())]);
        run(&f, command(1, "post", "2")).await;
        let choices = f.transport.last_choices();

        tokio::join!(
            handle_inbound(&f.core, &f.transport, button(1, &choices[0].token)),
            handle_inbound(&f.core, &f.transport, button(1, &choices[1].token)),
        );

        let history = f.core.history.load().await;
        assert_eq!(history.len(), 1);
        assert!(history[0] == "left idea" || history[0] == "right idea");
        assert!(f.core.sessions.pending(1).is_none());
        let delivered = f
            .transport
            .sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Text(t) if t == "left idea" || t == "right idea"))
            .count();
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_out_of_range_pick_keeps_offer() {
        let f = fixture(0, vec![Ok(r#"["only idea", "other idea"]"#.into())]);
        run(&f, command(1, "post", "2")).await;
        let offer_id = f.core.sessions.pending(1).unwrap().offer_id;

        run(&f, button(1, &SelectionAction::pick_token(offer_id, 9))).await;
        assert_eq!(
            f.transport.last_text(),
            crate::session::SelectionError::InvalidIndex {
                index: 9,
                available: 2
            }
            .to_string()
        );
        assert!(f.core.history.load().await.is_empty());
        assert_eq!(f.core.sessions.pending(1).unwrap().offer_id, offer_id);
    }

    #[tokio::test]
    async fn test_failed_history_write_keeps_offer_for_retry() {
        let f = fixture(0, vec![Ok(r#"["keeper idea"]"#.into())]);
        run(&f, command(1, "post", "1")).await;
        let choices = f.transport.last_choices();

        // A non-empty directory at the history path makes the atomic rename fail
        let blocker = f.dir.join("history.json");
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();
        run(&f, button(1, &choices[0].token)).await;
        assert!(f.core.sessions.pending(1).is_some());

        std::fs::remove_dir_all(&blocker).unwrap();
        run(&f, button(1, &choices[0].token)).await;
        assert_eq!(f.core.history.load().await, vec!["keeper idea".to_string()]);
        assert!(f.core.sessions.pending(1).is_none());
    }

    #[tokio::test]
    async fn test_stale_offer_rejected_after_regenerate() {
        let f = fixture(
            0,
            vec![Ok(r#"["old one"]"#.into()), Ok(r#"["new one"]"#.into())],
        );
        run(&f, command(1, "post", "1")).await;
        let old = f.transport.last_choices();
        run(&f, command(1, "post", "1")).await;

        run(&f, button(1, &old[0].token)).await;
        assert_eq!(
            f.transport.last_text(),
            crate::session::SelectionError::Stale.to_string()
        );
        assert!(f.core.history.load().await.is_empty());
        assert!(f.core.sessions.pending(1).is_some());
    }

    #[tokio::test]
    async fn test_cancel_discards_offer() {
        let f = fixture(0, vec![Ok(r#"["a post", "b post"]"#.into())]);
        run(&f, command(1, "post", "")).await;
        let choices = f.transport.last_choices();
        run(&f, button(1, &choices.last().unwrap().token)).await;
        assert_eq!(f.transport.last_text(), "Cancelled. 2 options discarded.");
        assert!(f.core.sessions.pending(1).is_none());
        assert!(f.core.history.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_all_duplicates_asks_to_try_again() {
        let f = fixture(0, vec![Ok(r#"["Known Post"]"#.into())]);
        f.core
            .history
            .append_unique(&["known post".to_string()])
            .await
            .unwrap();
        run(&f, command(1, "post", "")).await;
        assert_eq!(f.transport.last_text(), NOTHING_NEW_TEXT);
        assert!(f.core.sessions.pending(1).is_none());
    }

    #[tokio::test]
    async fn test_completion_failure_is_reported() {
        let f = fixture(0, vec![Err(BotError::Completion("HTTP 502".into()))]);
        run(&f, command(1, "post", "")).await;
        assert!(f.transport.last_text().starts_with("Sorry"));
        assert!(f.core.history.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_import_inline_keeps_long_paragraphs() {
        let f = fixture(0, vec![]);
        let text = "First post here.\n\nshort\n\nSecond post here.";
        run(&f, command(1, "import", text)).await;
        assert_eq!(
            f.core.history.load().await,
            vec!["First post here.".to_string(), "Second post here.".to_string()]
        );
        assert!(f.transport.last_text().starts_with("Imported 2 new posts"));
    }

    #[tokio::test]
    async fn test_import_source_precedence() {
        let f = fixture(0, vec![]);
        f.core
            .sessions
            .stage_import(1, "From the uploaded document.".into());

        let mut from_reply = command(1, "import", "");
        from_reply.reply_to_text = Some("From the replied message.".into());
        run(&f, from_reply).await;
        assert_eq!(
            f.core.history.load().await,
            vec!["From the replied message.".to_string()]
        );

        // The document buffer was not consumed and is used next
        run(&f, command(1, "import", "")).await;
        assert_eq!(f.core.history.load().await.len(), 2);

        run(&f, command(1, "import", "")).await;
        assert_eq!(f.transport.last_text(), NOTHING_TO_IMPORT_TEXT);
    }

    #[tokio::test]
    async fn test_document_is_staged_then_imported() {
        let f = fixture(0, vec![]);
        let upload = Inbound {
            chat_id: 100,
            sender_id: 1,
            reply_to_text: None,
            payload: Payload::File {
                file_name: "posts.txt".into(),
                content: "Paragraph number one.\n\nParagraph number two.".into(),
                caption: None,
            },
        };
        run(&f, upload).await;
        assert!(f.transport.last_text().contains("2 paragraphs found"));
        assert!(f.core.history.load().await.is_empty());

        run(&f, command(1, "import", "")).await;
        assert_eq!(f.core.history.load().await.len(), 2);
    }

    #[tokio::test]
    async fn test_document_from_non_owner_is_not_staged() {
        let f = fixture(42, vec![]);
        let upload = Inbound {
            chat_id: 100,
            sender_id: 7,
            reply_to_text: None,
            payload: Payload::File {
                file_name: "posts.txt".into(),
                content: "Paragraph number one.".into(),
                caption: Some("/import".into()),
            },
        };
        run(&f, upload).await;
        assert_eq!(f.transport.last_text(), "Not authorized.");
        assert!(f.core.sessions.take_import(7).is_none());
        assert!(f.core.history.load().await.is_empty());
        assert!(!f.core.is_authorized(7));
        assert!(f.core.is_authorized(42));
    }

    #[tokio::test]
    async fn test_document_with_import_caption_imports_immediately() {
        let f = fixture(0, vec![]);
        let upload = Inbound {
            chat_id: 100,
            sender_id: 1,
            reply_to_text: None,
            payload: Payload::File {
                file_name: "posts.txt".into(),
                content: "Paragraph number one.".into(),
                caption: Some("/import".into()),
            },
        };
        run(&f, upload).await;
        assert_eq!(f.core.history.load().await.len(), 1);
        assert!(f.core.sessions.take_import(1).is_none());
    }

    #[tokio::test]
    async fn test_export_clear_and_history() {
        let f = fixture(0, vec![]);
        run(&f, command(1, "export", "")).await;
        assert_eq!(f.transport.last_text(), "History is empty.");

        f.core
            .history
            .append_unique(&["one post".to_string(), "two post".to_string()])
            .await
            .unwrap();
        run(&f, command(1, "export", "")).await;
        assert!(f.transport.sent().contains(&Sent::Document(
            "history.txt".into(),
            b"one post\n\ntwo post".to_vec()
        )));

        run(&f, command(1, "history", "")).await;
        assert!(f.transport.last_text().starts_with("History: 2 posts"));

        run(&f, command(1, "clear", "")).await;
        assert_eq!(f.transport.last_text(), "History cleared.");
        assert!(f.core.history.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_help_and_unknown_command() {
        let f = fixture(42, vec![]);
        run(&f, command(7, "help", "")).await;
        assert_eq!(f.transport.last_text(), HELP_TEXT);
        run(&f, command(7, "dance", "")).await;
        assert_eq!(f.transport.last_text(), "Unknown command.");
        assert_eq!(f.client.calls(), 0);
    }
}
