//! Parsing of input lines into chat commands.

use tally_core::GroupId;
use thiserror::Error;

/// One line of user input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `/join <id>`: switch the active group.
    Join(GroupId),
    /// `/leave`: leave the active group.
    Leave,
    /// `/history`: fetch and print the active group's history.
    History,
    /// `/reconnect`: drop the connection and connect again.
    Reconnect,
    /// `/state`: print connection state and active group.
    State,
    /// `/quit`: leave, disconnect and exit.
    Quit,
    /// Anything else: a chat message for the active group.
    Say(String),
    /// Blank line.
    Empty,
}

/// Why a line could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// `/join` without an argument.
    #[error("usage: /join <group id>")]
    MissingGroup,
    /// `/join` with a non-numeric argument.
    #[error("invalid group id: {0}")]
    InvalidGroup(String),
    /// Slash command not recognised.
    #[error("unknown command: /{0} (try /join, /leave, /history, /reconnect, /state, /quit)")]
    Unknown(String),
}

impl Command {
    /// Parse one input line.
    ///
    /// Lines starting with `//` send the rest, starting with `/`, as a
    /// message.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Empty);
        }
        if let Some(escaped) = line.strip_prefix("//") {
            return Ok(Self::Say(format!("/{escaped}")));
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Say(line.to_string()));
        };

        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));
        match name {
            "join" | "j" => {
                if arg.is_empty() {
                    return Err(CommandError::MissingGroup);
                }
                arg.parse()
                    .map(Self::Join)
                    .map_err(|_| CommandError::InvalidGroup(arg.to_string()))
            }
            "leave" => Ok(Self::Leave),
            "history" | "h" => Ok(Self::History),
            "reconnect" => Ok(Self::Reconnect),
            "state" => Ok(Self::State),
            "quit" | "q" | "exit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            Command::parse("  hello there "),
            Ok(Command::Say("hello there".into()))
        );
    }

    #[test]
    fn blank_line() {
        assert_eq!(Command::parse("   "), Ok(Command::Empty));
    }

    #[test]
    fn join_with_id() {
        assert_eq!(Command::parse("/join 42"), Ok(Command::Join(GroupId::new(42))));
        assert_eq!(Command::parse("/j  7 "), Ok(Command::Join(GroupId::new(7))));
    }

    #[test]
    fn join_errors() {
        assert_eq!(Command::parse("/join"), Err(CommandError::MissingGroup));
        assert_matches!(Command::parse("/join abc"), Err(CommandError::InvalidGroup(s)) if s == "abc");
    }

    #[test]
    fn simple_commands() {
        assert_eq!(Command::parse("/leave"), Ok(Command::Leave));
        assert_eq!(Command::parse("/history"), Ok(Command::History));
        assert_eq!(Command::parse("/reconnect"), Ok(Command::Reconnect));
        assert_eq!(Command::parse("/state"), Ok(Command::State));
        assert_eq!(Command::parse("/quit"), Ok(Command::Quit));
    }

    #[test]
    fn unknown_command() {
        assert_matches!(Command::parse("/dance"), Err(CommandError::Unknown(s)) if s == "dance");
    }

    #[test]
    fn double_slash_escapes() {
        assert_eq!(
            Command::parse("//shrug"),
            Ok(Command::Say("/shrug".into()))
        );
    }
}
