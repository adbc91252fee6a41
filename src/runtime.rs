use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::generator::Generator;
use crate::handlers::BotCore;
use crate::history::HistoryStore;
use crate::llm::CompletionClient;

/// Wire the history store, generator and session state from config.
pub fn build_core(config: &Config, client: Arc<dyn CompletionClient>) -> BotCore {
    let history = Arc::new(HistoryStore::new(
        config.history_path(),
        config.history_token_limit,
    ));
    let generator = Generator::new(
        client,
        history.clone(),
        config.persona(),
        config.generation_settings(),
    );
    BotCore::new(config.owner_id, history, generator)
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let client = crate::llm::create_client(&config)?;
    let core = Arc::new(build_core(&config, client));

    let existing = core.history.load().await;
    info!(
        "History store at {} ({} posts, budget {} tokens)",
        core.history.path().display(),
        existing.len(),
        core.history.token_limit()
    );
    info!(
        "LLM: provider={} model={} base={}",
        config.llm_provider,
        config.model,
        config.llm_base_url.as_deref().unwrap_or("(default)")
    );

    crate::channels::run_bot(&config, core).await
}
