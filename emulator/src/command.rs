//! Line grammar for the emulator console.

use std::fmt;

use winnow::ascii::{Caseless, alpha1, dec_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::literal;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Sleep { duration_ms: u32, smart: bool },
    Repeater(bool),
    Transport(LinkCommand),
    Ota(bool),
    Stray(u32),
    Status,
    Help(Option<&'a str>),
    Exit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkCommand {
    Up,
    Down,
    /// Link comes back after this many milliseconds.
    After(u32),
}

/// Syntax error with the byte offset where parsing stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "at column {}", self.offset + 1)
        } else {
            write!(f, "at column {}: {}", self.offset + 1, self.message)
        }
    }
}

pub fn parse(line: &str) -> Result<Command<'_>, ParseError> {
    command.parse(line).map_err(|err| ParseError {
        offset: err.offset(),
        message: err.inner().to_string(),
    })
}

fn command<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        space0,
        terminated(
            alt((sleep, repeater, transport, ota, stray, status, help, exit))
                .context(StrContext::Label("command")),
            (space0, eof),
        ),
    )
    .parse_next(input)
}

fn keyword<'s>(word: &'static str) -> impl Parser<&'s str, &'s str, ErrMode<ContextError>> {
    literal(Caseless(word)).context(StrContext::Expected(StrContextValue::StringLiteral(word)))
}

/// Decimal milliseconds with an optional `ms` suffix.
fn millis(input: &mut &str) -> ModalResult<u32> {
    terminated(dec_uint, opt(literal(Caseless("ms"))))
        .context(StrContext::Label("milliseconds"))
        .parse_next(input)
}

fn on_off(input: &mut &str) -> ModalResult<bool> {
    alt((keyword("on").value(true), keyword("off").value(false))).parse_next(input)
}

fn sleep<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        (keyword("sleep"), space1),
        (millis, opt(preceded(space1, keyword("smart")))),
    )
    .map(|(duration_ms, smart)| Command::Sleep {
        duration_ms,
        smart: smart.is_some(),
    })
    .parse_next(input)
}

fn repeater<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded((keyword("repeater"), space1), on_off)
        .map(Command::Repeater)
        .parse_next(input)
}

fn transport<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        (keyword("transport"), space1),
        alt((
            keyword("up").value(LinkCommand::Up),
            keyword("down").value(LinkCommand::Down),
            preceded((keyword("after"), space1), millis).map(LinkCommand::After),
        )),
    )
    .map(Command::Transport)
    .parse_next(input)
}

fn ota<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded((keyword("ota"), space1), on_off)
        .map(Command::Ota)
        .parse_next(input)
}

fn stray<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded((keyword("stray"), space1), dec_uint)
        .map(Command::Stray)
        .parse_next(input)
}

fn status<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    keyword("status").value(Command::Status).parse_next(input)
}

fn help<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(keyword("help"), opt(preceded(space1, alpha1)))
        .map(Command::Help)
        .parse_next(input)
}

fn exit<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    alt((keyword("exit"), keyword("quit")))
        .value(Command::Exit)
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_smart_sleep() {
        assert_eq!(
            parse("sleep 20000"),
            Ok(Command::Sleep {
                duration_ms: 20_000,
                smart: false
            })
        );
        assert_eq!(
            parse("  SLEEP 1000ms smart "),
            Ok(Command::Sleep {
                duration_ms: 1_000,
                smart: true
            })
        );
    }

    #[test]
    fn parses_environment_toggles() {
        assert_eq!(parse("repeater on"), Ok(Command::Repeater(true)));
        assert_eq!(parse("ota off"), Ok(Command::Ota(false)));
        assert_eq!(parse("stray 3"), Ok(Command::Stray(3)));
        assert_eq!(
            parse("transport after 300"),
            Ok(Command::Transport(LinkCommand::After(300)))
        );
        assert_eq!(
            parse("transport down"),
            Ok(Command::Transport(LinkCommand::Down))
        );
    }

    #[test]
    fn parses_session_commands() {
        assert_eq!(parse("status"), Ok(Command::Status));
        assert_eq!(parse("help"), Ok(Command::Help(None)));
        assert_eq!(parse("help sleep"), Ok(Command::Help(Some("sleep"))));
        assert_eq!(parse("quit"), Ok(Command::Exit));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse("sleep").is_err());
        assert!(parse("sleep soon").is_err());
        assert!(parse("sleep 100 later").is_err());
        assert!(parse("repeater maybe").is_err());
        assert!(parse("sleep 99999999999").is_err());
        assert!(parse("reboot").is_err());
    }

    #[test]
    fn error_names_the_column() {
        let err = parse("ota sideways").expect_err("should not parse");
        assert!(err.offset < "ota sideways".len());
        assert!(err.to_string().starts_with("at column "));
    }
}
