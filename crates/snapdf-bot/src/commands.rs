use crate::telegram::BotCommandSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BotCommand {
    Start,
    Convert,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandDef {
    command: BotCommand,
    patterns: &'static [&'static str],
    telegram_spec: BotCommandSpec,
}

const COMMAND_DEFS: &[CommandDef] = &[
    CommandDef {
        command: BotCommand::Start,
        patterns: &["/start"],
        telegram_spec: BotCommandSpec {
            command: "start",
            description: "How to use this bot",
        },
    },
    CommandDef {
        command: BotCommand::Convert,
        patterns: &["/convert", "/pdf"],
        telegram_spec: BotCommandSpec {
            command: "convert",
            description: "Combine the images you sent into one PDF",
        },
    },
    CommandDef {
        command: BotCommand::Clear,
        patterns: &["/clear"],
        telegram_spec: BotCommandSpec {
            command: "clear",
            description: "Discard the images you sent so far",
        },
    },
];

pub(crate) fn telegram_command_specs() -> Vec<BotCommandSpec> {
    COMMAND_DEFS.iter().map(|def| def.telegram_spec).collect()
}

pub(crate) fn parse_command(text: &str) -> Option<BotCommand> {
    let trimmed = text.trim();

    COMMAND_DEFS.iter().find_map(|def| {
        def.patterns
            .iter()
            .any(|pattern| command_matches(trimmed, pattern))
            .then_some(def.command)
    })
}

/// `/start` from a deep link carries a payload (`/start abc`); accept it.
fn command_matches(trimmed_text: &str, command: &str) -> bool {
    if trimmed_text == command {
        return true;
    }

    trimmed_text.strip_prefix(command).is_some_and(|stripped| {
        stripped.starts_with('@') || (command == "/start" && stripped.starts_with(' '))
    })
}
