use kenmabot::config::Config;
use kenmabot::error::BotError;
use kenmabot::{llm, logging, runtime};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!(
        r#"kenmabot v{VERSION}: Telegram bot that drafts in-character posts and remembers what was posted

USAGE:
    kenmabot <COMMAND>

COMMANDS:
    start       Start the Telegram bot
    test-llm    Send one probe prompt to the configured model
    version     Show version information
    help        Show this help message

CONFIG FILE (kenmabot.config.yaml):
    kenmabot reads configuration from kenmabot.config.yaml (or kenmabot.config.yml).
    Override the path with KENMABOT_CONFIG env var. Values from .env and the process
    environment override the file.

    Core fields:
      telegram_bot_token     Telegram bot token from @BotFather (env: TELEGRAM_TOKEN)
      llm_provider           openai (default) or ollama
      api_key                LLM API key, optional for ollama (env: OPENAI_API_KEY)
      model                  Model name (default: gpt-4o, llama3.2 for ollama) (env: OPENAI_MODEL)
      llm_base_url           Custom base URL (env: LLM_BASE_URL)
      owner_id               Telegram user id allowed to post and edit history, 0 = anyone (env: BOT_OWNER_ID)

    Runtime:
      timezone               IANA timezone for the date line (default: Asia/Tokyo) (env: TIMEZONE)
      data_dir               Where history.json lives (default: ./data) (env: KENMABOT_DATA_DIR)
      history_token_limit    History budget in approximate tokens (default: 3000)
      max_workers            Concurrent update handlers (default: 8)
      persona_file           Text file replacing the built-in persona
      log_dir                Also write logs to <log_dir>/kenmabot.log

EXAMPLES:
    kenmabot start         Start the bot
    kenmabot test-llm      Test the LLM connection
    kenmabot version       Show version"#
    );
}

fn print_version() {
    println!("kenmabot {VERSION}");
}

fn load_config_or_exit() -> Config {
    match Config::load() {
        Ok(c) => c,
        Err(BotError::Config(e)) => {
            eprintln!("Config error: {e}");
            eprintln!("Set KENMABOT_CONFIG or create kenmabot.config.yaml");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_test_llm() -> anyhow::Result<()> {
    let config = load_config_or_exit();
    let client = llm::create_client(&config)?;
    println!(
        "Testing LLM: provider={} model={} base={}",
        config.llm_provider,
        config.model,
        config.llm_base_url.as_deref().unwrap_or("(default)")
    );
    match client.complete("Reply with exactly: OK", 0.0, 16).await {
        Ok(text) => println!("LLM OK. Response: {}", text.trim()),
        Err(e) => {
            eprintln!("LLM error: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str());

    match command {
        Some("start") => {}
        Some("test-llm") => {
            run_test_llm().await?;
            return Ok(());
        }
        Some("version" | "--version" | "-V") => {
            print_version();
            return Ok(());
        }
        Some("help" | "--help" | "-h") | None => {
            print_help();
            return Ok(());
        }
        Some(unknown) => {
            eprintln!("Unknown command: {unknown}\n");
            print_help();
            std::process::exit(1);
        }
    }

    let config = load_config_or_exit();
    match config.log_dir.as_deref() {
        Some(dir) => logging::init_logging(dir)?,
        None => logging::init_console_logging(),
    }
    info!("Starting kenmabot v{VERSION}...");

    runtime::run(config).await
}
