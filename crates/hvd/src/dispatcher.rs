//! Console command dispatch.
//!
//! [`dispatch`] takes one operator line and the supervisor (already locked
//! by the caller) and returns the text to print plus whether the session
//! or the daemon should end. It performs no I/O of its own, which keeps
//! every command testable without a terminal.
//!
//! Status lines start with [`SUCCESS_PREFIX`] or [`FAILURE_PREFIX`] so a
//! script driving the console can tell them apart from listings.

use std::fmt::Write as _;

use hv_protocol::{
    parse_line, parse_start_args, parse_stop_index, CommandKind, ParsedLine, HELP_TEXT,
};
use tracing::debug;

use crate::supervisor::Supervisor;

/// Prefix of a line reporting success.
pub const SUCCESS_PREFIX: &str = "+OK ";

/// Prefix of a line reporting failure.
pub const FAILURE_PREFIX: &str = "-ERR ";

/// Whether the console should keep running after a command.
///
/// Ordered by severity: once a session leaves `Running` it never goes back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuitState {
    #[default]
    Running,
    /// `disconnect`: end this session, keep the daemon.
    DisconnectRequested,
    /// `quit`: workers are gone, the daemon should exit.
    ShutdownRequested,
}

impl QuitState {
    pub fn is_running(self) -> bool {
        self == QuitState::Running
    }
}

/// What a command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Text for the terminal, `\n`-terminated lines.
    pub output: String,
    pub quit: QuitState,
}

impl Dispatch {
    fn line(&mut self, text: &str) {
        self.output.push_str(text);
        self.output.push('\n');
    }

    fn success(&mut self, text: &str) {
        self.output.push_str(SUCCESS_PREFIX);
        self.line(text);
    }

    fn failure(&mut self, text: &str) {
        self.output.push_str(FAILURE_PREFIX);
        self.line(text);
    }
}

/// Executes one console line.
pub fn dispatch(supervisor: &mut Supervisor, line: &str) -> Dispatch {
    let mut out = Dispatch::default();

    match parse_line(line) {
        ParsedLine::Empty => {}
        ParsedLine::Unknown(token) => {
            debug!(token, "Unknown console command");
            out.failure("Invalid or incomplete command");
        }
        ParsedLine::Command { kind, args } => {
            debug!(?kind, ?args, "Console command");
            match kind {
                CommandKind::Help => out.output.push_str(HELP_TEXT),
                CommandKind::Start => start(supervisor, &args, &mut out),
                CommandKind::List => list(supervisor, &mut out),
                CommandKind::Stop => stop(supervisor, &args, &mut out),
                CommandKind::Quit => {
                    let count = supervisor.terminate_all();
                    out.success(&format!("{count} VPCS terminated, hypervisor exiting"));
                    out.quit = QuitState::ShutdownRequested;
                }
                CommandKind::Disconnect => {
                    out.success("Bye");
                    out.quit = QuitState::DisconnectRequested;
                }
            }
        }
    }

    out
}

fn start(supervisor: &mut Supervisor, args: &[&str], out: &mut Dispatch) {
    let parsed = match parse_start_args(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "Rejected vpcs arguments");
            out.failure(&e.to_string());
            return;
        }
    };

    match supervisor.launch(parsed) {
        Ok(slot) => {
            let text = format!("VPCS started with {}", slot.command_line());
            out.success(&text);
        }
        Err(e) => out.failure(&e.to_string()),
    }
}

fn list(supervisor: &mut Supervisor, out: &mut Dispatch) {
    out.line("ID\tPID\tParameters");
    for (ordinal, worker) in supervisor.live_workers().iter().enumerate() {
        let _ = writeln!(
            out.output,
            "{:<2}\t{:<5}\t{}",
            ordinal + 1,
            worker.pid,
            worker.command_line
        );
    }
    out.success("OK");
}

fn stop(supervisor: &mut Supervisor, args: &[&str], out: &mut Dispatch) {
    let Some(ordinal) = parse_stop_index(args) else {
        out.failure("Usage: stop <id>");
        return;
    };

    match supervisor.terminate_nth(ordinal) {
        Some(pid) => out.success(&format!("VPCS PID {pid} is terminated")),
        None => {
            debug!(ordinal, "stop: no such worker");
            out.failure(&format!("No VPCS with id {ordinal}"));
        }
    }
}
