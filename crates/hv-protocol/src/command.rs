//! Console line grammar.
//!
//! A line is split on whitespace into at most [`MAX_TOKENS`] tokens. The
//! first token selects a command from [`COMMAND_TABLE`] by prefix: the
//! first entry whose name starts with the token wins, so any command can
//! be abbreviated (`l` → `list`, `v` → `vpcs`). Order of the table
//! therefore decides ambiguous prefixes (`d` → `disconnect`).

/// Maximum number of tokens kept from a line, command name included.
pub const MAX_TOKENS: usize = 20;

/// Console commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Print the command summary.
    Help,
    /// End the current console session only.
    Disconnect,
    /// List live workers.
    List,
    /// Stop all workers and shut the daemon down.
    Quit,
    /// Stop one worker by list index.
    Stop,
    /// Start a worker.
    Start,
}

/// Ordered command table used for prefix matching.
pub const COMMAND_TABLE: &[(&str, CommandKind)] = &[
    ("?", CommandKind::Help),
    ("disconnect", CommandKind::Disconnect),
    ("help", CommandKind::Help),
    ("list", CommandKind::List),
    ("quit", CommandKind::Quit),
    ("stop", CommandKind::Stop),
    ("vpcs", CommandKind::Start),
];

/// Text printed by `help` and `?`.
pub const HELP_TEXT: &str = "\
help | ?              Print help
vpcs [parameters]     Start vpcs with parameters of vpcs
stop id               Stop vpcs process
list                  List vpcs process
disconnect            Exit the telnet session
quit                  Stop vpcs processes and hypervisor
";

/// Result of parsing one console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine<'a> {
    /// Nothing but whitespace.
    Empty,
    /// First token matched no command.
    Unknown(&'a str),
    /// A command with its arguments (command token excluded).
    Command {
        kind: CommandKind,
        args: Vec<&'a str>,
    },
}

/// Looks a token up in the command table by prefix.
pub fn match_command(token: &str) -> Option<CommandKind> {
    COMMAND_TABLE
        .iter()
        .find(|(name, _)| name.starts_with(token))
        .map(|(_, kind)| *kind)
}

/// Splits a line into at most [`MAX_TOKENS`] tokens; extra tokens are dropped.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.trim_end().split_whitespace().take(MAX_TOKENS).collect()
}

/// Parses one console line.
pub fn parse_line(line: &str) -> ParsedLine<'_> {
    let mut tokens = tokenize(line).into_iter();
    let Some(first) = tokens.next() else {
        return ParsedLine::Empty;
    };

    match match_command(first) {
        Some(kind) => ParsedLine::Command {
            kind,
            args: tokens.collect(),
        },
        None => ParsedLine::Unknown(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_names_match() {
        assert_eq!(match_command("help"), Some(CommandKind::Help));
        assert_eq!(match_command("?"), Some(CommandKind::Help));
        assert_eq!(match_command("vpcs"), Some(CommandKind::Start));
        assert_eq!(match_command("disconnect"), Some(CommandKind::Disconnect));
    }

    #[test]
    fn test_prefixes_match_first_entry() {
        assert_eq!(match_command("l"), Some(CommandKind::List));
        assert_eq!(match_command("q"), Some(CommandKind::Quit));
        assert_eq!(match_command("s"), Some(CommandKind::Stop));
        assert_eq!(match_command("d"), Some(CommandKind::Disconnect));
        assert_eq!(match_command("v"), Some(CommandKind::Start));
    }

    #[test]
    fn test_matching_is_case_sensitive_and_rejects_longer_tokens() {
        assert_eq!(match_command("LIST"), None);
        assert_eq!(match_command("lists"), None);
        assert_eq!(match_command("x"), None);
    }

    #[test]
    fn test_parse_line_variants() {
        assert_eq!(parse_line("   \t "), ParsedLine::Empty);
        assert_eq!(parse_line("frobnicate now"), ParsedLine::Unknown("frobnicate"));
        assert_eq!(
            parse_line("st 2  \r"),
            ParsedLine::Command {
                kind: CommandKind::Stop,
                args: vec!["2"],
            }
        );
    }

    #[test]
    fn test_excess_tokens_dropped() {
        let line = (0..30).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let tokens = tokenize(&line);
        assert_eq!(tokens.len(), MAX_TOKENS);
        assert_eq!(tokens.last(), Some(&"19"));
    }

    #[test]
    fn test_help_text_mentions_every_command() {
        for (name, _) in COMMAND_TABLE {
            assert!(HELP_TEXT.contains(name), "help text is missing {name}");
        }
    }
}
