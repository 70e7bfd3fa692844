//! Command-line grammar: splits a trimmed command string into
//! a typed [`Command`]. Never touches an [`crate::instrument::Instrument`] —
//! purely syntactic, so it can be unit-tested without any device state.

use crate::error::{Error, Result};
use crate::nudgematic::OffsetSize;

#[derive(Debug, Clone, PartialEq)]
pub enum FitsHeaderValueKind {
    Boolean,
    Float,
    Integer,
    String,
    Comment,
    Units,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Abort,
    ConfigFilter(String),
    ConfigCoaddExpLen(String),
    ConfigNudgematic(OffsetSize),
    Fan(bool),
    FitsHeaderAdd {
        keyword: String,
        kind: FitsHeaderValueKind,
        value: String,
    },
    FitsHeaderDelete(String),
    FitsHeaderClear,
    Help,
    Multbias(u32),
    Multdark(u32, u32),
    Multrun(u32, u32, bool),
    StatusDetector(String),
    StatusExposure(String),
    StatusFilterWheel(String),
    StatusNudgematic(String),
    StatusTemperature(String),
    Shutdown,
    Temperature(f64),
}

/// Parse one trimmed command line. Returns [`Error::UnknownCommand`] for an
/// unrecognised leading keyword and [`Error::ParseError`] for a recognised
/// keyword with malformed arguments, matching the documented distinction
/// between `1 failed message unknown` and `1 Failed to parse <command>.`.
pub fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim();
    let mut tokens = line.split_whitespace();
    let keyword = tokens.next().ok_or(Error::UnknownCommand)?;

    match keyword {
        "abort" => Ok(Command::Abort),
        "help" => Ok(Command::Help),
        "shutdown" => Ok(Command::Shutdown),
        "config" => parse_config(line, tokens),
        "fan" => parse_fan(line, tokens),
        "fitsheader" => parse_fitsheader(line, tokens),
        "multbias" => parse_multbias(line, tokens),
        "multdark" => parse_multdark(line, tokens),
        "multrun" => parse_multrun(line, tokens),
        "status" => parse_status(line, tokens),
        "temperature" => parse_temperature(line, tokens),
        _ => Err(Error::UnknownCommand),
    }
}

fn parse_err(line: &str) -> Error {
    Error::ParseError(format!("Failed to parse {line}."))
}

fn parse_config<'a>(line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Result<Command> {
    let sub = tokens.next().ok_or_else(|| parse_err(line))?;
    match sub {
        "filter" => {
            let name = tokens.next().ok_or_else(|| parse_err(line))?;
            Ok(Command::ConfigFilter(name.to_string()))
        }
        "coadd_exp_len" => {
            let tag = tokens.next().ok_or_else(|| parse_err(line))?;
            if tag != "short" && tag != "long" {
                return Err(parse_err(line));
            }
            Ok(Command::ConfigCoaddExpLen(tag.to_string()))
        }
        "nudgematic" => {
            let size = tokens.next().ok_or_else(|| parse_err(line))?;
            let size = match size {
                "none" => OffsetSize::None,
                "small" => OffsetSize::Small,
                "large" => OffsetSize::Large,
                _ => return Err(parse_err(line)),
            };
            Ok(Command::ConfigNudgematic(size))
        }
        _ => Err(parse_err(line)),
    }
}

fn parse_fan<'a>(line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Result<Command> {
    let state = tokens.next().ok_or_else(|| parse_err(line))?;
    match state {
        "on" => Ok(Command::Fan(true)),
        "off" => Ok(Command::Fan(false)),
        _ => Err(parse_err(line)),
    }
}

fn parse_fitsheader<'a>(line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Result<Command> {
    let sub = tokens.next().ok_or_else(|| parse_err(line))?;
    match sub {
        "add" => {
            let keyword = tokens.next().ok_or_else(|| parse_err(line))?.to_string();
            let kind = tokens.next().ok_or_else(|| parse_err(line))?;
            let kind = match kind {
                "boolean" => FitsHeaderValueKind::Boolean,
                "float" => FitsHeaderValueKind::Float,
                "integer" => FitsHeaderValueKind::Integer,
                "string" => FitsHeaderValueKind::String,
                "comment" => FitsHeaderValueKind::Comment,
                "units" => FitsHeaderValueKind::Units,
                _ => return Err(parse_err(line)),
            };
            // The value may itself contain spaces (string/comment text), so
            // take the rest of the line rather than a single token.
            let value: String = tokens.collect::<Vec<_>>().join(" ");
            if value.is_empty() {
                return Err(parse_err(line));
            }
            Ok(Command::FitsHeaderAdd { keyword, kind, value })
        }
        "delete" => {
            let keyword = tokens.next().ok_or_else(|| parse_err(line))?;
            Ok(Command::FitsHeaderDelete(keyword.to_string()))
        }
        "clear" => Ok(Command::FitsHeaderClear),
        _ => Err(parse_err(line)),
    }
}

fn parse_multbias<'a>(line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Result<Command> {
    let count: u32 = tokens
        .next()
        .ok_or_else(|| parse_err(line))?
        .parse()
        .map_err(|_| parse_err(line))?;
    Ok(Command::Multbias(count))
}

fn parse_multdark<'a>(line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Result<Command> {
    let length_ms: u32 = tokens
        .next()
        .ok_or_else(|| parse_err(line))?
        .parse()
        .map_err(|_| parse_err(line))?;
    let count: u32 = tokens
        .next()
        .ok_or_else(|| parse_err(line))?
        .parse()
        .map_err(|_| parse_err(line))?;
    Ok(Command::Multdark(length_ms, count))
}

fn parse_multrun<'a>(line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Result<Command> {
    let length_ms: u32 = tokens
        .next()
        .ok_or_else(|| parse_err(line))?
        .parse()
        .map_err(|_| parse_err(line))?;
    let count: u32 = tokens
        .next()
        .ok_or_else(|| parse_err(line))?
        .parse()
        .map_err(|_| parse_err(line))?;
    let standard: bool = match tokens.next().ok_or_else(|| parse_err(line))? {
        "true" => true,
        "false" => false,
        _ => return Err(parse_err(line)),
    };
    Ok(Command::Multrun(length_ms, count, standard))
}

fn parse_status<'a>(line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Result<Command> {
    let sub = tokens.next().ok_or_else(|| parse_err(line))?;
    let field = tokens.next().ok_or_else(|| parse_err(line))?.to_string();
    match sub {
        "detector" => Ok(Command::StatusDetector(field)),
        "exposure" => Ok(Command::StatusExposure(field)),
        "filterwheel" => Ok(Command::StatusFilterWheel(field)),
        "nudgematic" => Ok(Command::StatusNudgematic(field)),
        "temperature" => Ok(Command::StatusTemperature(field)),
        _ => Err(parse_err(line)),
    }
}

fn parse_temperature<'a>(line: &str, mut tokens: impl Iterator<Item = &'a str>) -> Result<Command> {
    let degrees: f64 = tokens
        .next()
        .ok_or_else(|| parse_err(line))?
        .parse()
        .map_err(|_| parse_err(line))?;
    Ok(Command::Temperature(degrees))
}
