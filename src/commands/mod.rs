//! Command dispatcher: one command string in, one framed
//! `0 .../1 ...` reply string out. [`parse`] turns the line into a typed
//! [`Command`]; [`dispatch::handle`] runs it against an
//! [`crate::instrument::Instrument`] and formats the reply.

pub mod dispatch;
pub mod parse;

pub use dispatch::handle;
pub use parse::{parse_command, Command};
