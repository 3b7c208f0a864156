//! Argument grammar for `vpcs` and `stop`.
//!
//! `vpcs` understands four resource flags, each taking a value either as
//! the next token (`-p 5001`) or joined (`-p5001`):
//!
//! | flag | resource            |
//! |------|---------------------|
//! | `-p` | worker listen port  |
//! | `-m` | MAC base            |
//! | `-s` | local UDP base      |
//! | `-c` | remote UDP base     |
//!
//! Every other token is passed through to the worker untouched. A later
//! flag overrides an earlier one. `--` ends flag parsing; it and everything
//! after it are passed through.

use std::num::{NonZeroU16, NonZeroU32};

use hv_core::{ResourceKind, ResourceRequest};
use thiserror::Error;

/// Errors in console command arguments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    /// A resource flag carried a zero, negative, or non-numeric value.
    #[error("{}", invalid_value_message(.kind))]
    InvalidValue { kind: ResourceKind, value: String },

    /// A resource flag was the last token.
    #[error("Option {flag} requires an argument")]
    MissingValue { flag: &'static str },
}

fn invalid_value_message(kind: &ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ListenPort => "Invalid daemon port",
        ResourceKind::MacBase => "Invalid ether address",
        ResourceKind::LocalUdpBase => "Invalid local port",
        ResourceKind::RemoteUdpBase => "Invalid remote port",
    }
}

/// Parsed `vpcs` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartArgs {
    /// Explicit resource values.
    pub request: ResourceRequest,
    /// Tokens forwarded to the worker after the resource flags.
    pub passthrough: Vec<String>,
}

fn flag_kind(flag: &str) -> Option<ResourceKind> {
    ResourceKind::ALL.into_iter().find(|kind| kind.flag() == flag)
}

/// Splits `-p5001` into (`ListenPort`, `"5001"`).
fn split_joined(token: &str) -> Option<(ResourceKind, &str)> {
    let flag = token.get(..2)?;
    let value = token.get(2..).filter(|v| !v.is_empty())?;
    flag_kind(flag).map(|kind| (kind, value))
}

fn apply(
    request: &mut ResourceRequest,
    kind: ResourceKind,
    value: &str,
) -> Result<(), ArgumentError> {
    let invalid = || ArgumentError::InvalidValue {
        kind,
        value: value.to_string(),
    };

    match kind {
        ResourceKind::ListenPort => {
            request.listen_port = Some(value.parse::<NonZeroU16>().map_err(|_| invalid())?);
        }
        ResourceKind::MacBase => {
            request.mac_base = Some(value.parse::<NonZeroU32>().map_err(|_| invalid())?);
        }
        ResourceKind::LocalUdpBase => {
            request.local_udp_base = Some(value.parse::<NonZeroU16>().map_err(|_| invalid())?);
        }
        ResourceKind::RemoteUdpBase => {
            request.remote_udp_base = Some(value.parse::<NonZeroU16>().map_err(|_| invalid())?);
        }
    }
    Ok(())
}

/// Parses the arguments of `vpcs` (command token excluded).
///
/// # Errors
///
/// - `ArgumentError::InvalidValue` for a bad resource value
/// - `ArgumentError::MissingValue` for a trailing resource flag
pub fn parse_start_args(args: &[&str]) -> Result<StartArgs, ArgumentError> {
    let mut parsed = StartArgs::default();
    let mut tokens = args.iter();

    while let Some(&token) = tokens.next() {
        if token == "--" {
            parsed.passthrough.push(token.to_string());
            parsed
                .passthrough
                .extend(tokens.by_ref().map(|t| t.to_string()));
            break;
        }

        if let Some(kind) = flag_kind(token) {
            let value = tokens.next().ok_or(ArgumentError::MissingValue { flag: kind.flag() })?;
            apply(&mut parsed.request, kind, value)?;
            continue;
        }

        if let Some((kind, value)) = split_joined(token) {
            apply(&mut parsed.request, kind, value)?;
            continue;
        }

        parsed.passthrough.push(token.to_string());
    }

    Ok(parsed)
}

/// Parses the 1-based index argument of `stop`. Returns `None` unless exactly
/// one positive integer was given.
pub fn parse_stop_index(args: &[&str]) -> Option<usize> {
    match args {
        [index] => index.parse::<usize>().ok().filter(|i| *i > 0),
        _ => None,
    }
}
