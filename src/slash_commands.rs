//! Central slash-command parsing. Channels run this first on incoming text.
//! Anything that parses as a command is handled by its command handler and never reaches
//! reply mode.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Start,
    Help,
    /// `/post [n]`, also `/generate`. Carries the raw argument text.
    Post(String),
    /// `/import [text]`. Carries the inline text, possibly empty.
    Import(String),
    Export,
    Clear,
    History,
    Unknown(String),
}

/// Normalize message text for command detection: trim, slash-like and invisible chars so
/// commands are recognized.
fn normalize(text: &str) -> String {
    let invisibles = [
        '\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}', // zero-width, BOM
        '\u{200e}', '\u{200f}', '\u{202a}', '\u{202b}', '\u{202c}', '\u{202d}', '\u{202e}', // RTL/LTR format
    ];
    let mut s = text.trim().to_string();
    for c in invisibles {
        s = s.replace(c, "");
    }
    s = s.trim().to_string();
    s = s.replace('\u{ff0f}', "/"); // fullwidth solidus
    s = s.replace('\u{2044}', "/"); // fraction slash
    s = s.replace('\u{2215}', "/"); // division slash
    s
}

/// Split `/Name@bot rest` into (`name`, `rest`). The name is lower-cased; `rest` keeps its
/// original case and inner newlines.
pub fn split_command(text: &str) -> Option<(String, String)> {
    let t = normalize(text);
    let body = t.strip_prefix('/')?;
    let (head, rest) = match body.find(char::is_whitespace) {
        Some(i) => (&body[..i], body[i..].trim()),
        None => (body, ""),
    };
    let name = head.split('@').next().unwrap_or("").to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some((name, rest.to_string()))
}

pub fn from_parts(name: &str, args: &str) -> SlashCommand {
    match name {
        "start" => SlashCommand::Start,
        "help" => SlashCommand::Help,
        "post" | "generate" => SlashCommand::Post(args.to_string()),
        "import" => SlashCommand::Import(args.to_string()),
        "export" => SlashCommand::Export,
        "clear" => SlashCommand::Clear,
        "history" | "stats" => SlashCommand::History,
        other => SlashCommand::Unknown(other.to_string()),
    }
}

/// Parse slash command from raw message text.
/// Returns `Some(cmd)` only when the message starts with `/` followed by a name.
pub fn parse(text: &str) -> Option<SlashCommand> {
    let (name, args) = split_command(text)?;
    Some(from_parts(&name, &args))
}

/// Commands shown in the client's command menu, as (`command`, `description`).
pub const MENU: &[(&str, &str)] = &[
    ("post", "Draft new posts (optional count, e.g. /post 4)"),
    ("import", "Import posts from text, a replied message or an uploaded file"),
    ("export", "Download the post history"),
    ("history", "Show history size"),
    ("clear", "Erase the post history"),
    ("help", "How to use this bot"),
];
