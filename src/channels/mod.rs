pub mod startup_guard;
pub mod telegram;

pub use telegram::{run_bot, TelegramTransport};
