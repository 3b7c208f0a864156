//! hv Protocol - console wire handling and command grammar
//!
//! The operator talks to the daemon over a plain telnet connection.
//! This crate holds everything about that conversation that does not
//! need I/O:
//! - `telnet` - the option negotiation sent on connect and the inbound filter
//! - `command` - tokenizing and prefix-matching a console line
//! - `args` - the `vpcs` flag grammar and `stop` index parsing

pub mod args;
pub mod command;
pub mod telnet;

pub use args::{parse_start_args, parse_stop_index, ArgumentError, StartArgs};
pub use command::{parse_line, CommandKind, ParsedLine, COMMAND_TABLE, HELP_TEXT, MAX_TOKENS};
pub use telnet::{count_line_terminators, ends_with_line_terminator, filter_inbound, NEGOTIATION};
