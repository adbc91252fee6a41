pub mod channel;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod env_file;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod history;
pub mod llm;
pub mod logging;
pub mod parser;
pub mod prompt;
pub mod runtime;
pub mod session;
pub mod slash_commands;
