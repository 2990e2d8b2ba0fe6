/// Commands the interactive session understands. Bare text (no leading
/// slash) submits the line as the document context for a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Noop,
    Help,
    Quit,
    Show,
    Reset,
    GenerateAgain,
    /// Path may be empty when the user omitted it; the caller reports usage.
    UploadImage { path: String },
    SubmitContext { context: String },
    /// `None` when the argument was not `original` or a 1-based position.
    Select { target: Option<SelectTarget> },
    Save { dir: Option<String> },
    Unknown { command: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectTarget {
    Original,
    /// Zero-based variation index.
    Variation(usize),
}

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/image <path>",
    "/select <original|1-8>",
    "/save [dir]",
    "/again",
    "/show",
    "/reset",
    "/help",
    "/quit",
];

fn first_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts.into_iter().find(|value| !value.is_empty()),
        Err(_) => arg.split_whitespace().next().map(str::to_string),
    }
    .unwrap_or_default()
}

fn parse_select_target(arg: &str) -> Option<SelectTarget> {
    let normalized = arg.trim().to_ascii_lowercase();
    if normalized == "original" {
        return Some(SelectTarget::Original);
    }
    let position: usize = normalized.parse().ok()?;
    if position == 0 {
        return None;
    }
    Some(SelectTarget::Variation(position - 1))
}

pub fn parse_command(line: &str) -> ChatCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatCommand::Noop;
    }

    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return ChatCommand::SubmitContext {
            context: trimmed.to_string(),
        };
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return ChatCommand::Unknown {
            command: trimmed.to_string(),
        };
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    match command.as_str() {
        "help" => ChatCommand::Help,
        "quit" | "exit" => ChatCommand::Quit,
        "show" => ChatCommand::Show,
        "reset" => ChatCommand::Reset,
        "again" => ChatCommand::GenerateAgain,
        "image" => ChatCommand::UploadImage {
            path: first_path_arg(arg),
        },
        "select" => ChatCommand::Select {
            target: parse_select_target(arg),
        },
        "save" => ChatCommand::Save {
            dir: {
                let dir = first_path_arg(arg);
                if dir.is_empty() {
                    None
                } else {
                    Some(dir)
                }
            },
        },
        _ => ChatCommand::Unknown {
            command: format!("/{command}"),
        },
    }
}
