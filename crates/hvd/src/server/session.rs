//! One console session: a TCP client bridged onto a fresh pty.
//!
//! ```text
//!            inbound (this task)                    outbound task
//! socket ──read──▶ filter ──▶ pty controller ──read──▶ socket
//!                                  │ ▲
//!                      line disc.  ▼ │ echo, prompt, output
//!                              pty follower
//!                                  │ ▲
//!                     read_line    ▼ │ write_text
//!                              command task ──lock──▶ Supervisor
//! ```
//!
//! The inbound path and the command task meet at the rendezvous: after a
//! chunk that ends a line, the inbound path waits until the command task
//! has executed every line forwarded so far.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Socket and pty errors end the session; they never reach the accept loop
//!   as failures

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hv_protocol::{count_line_terminators, ends_with_line_terminator, filter_inbound};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::console::{LineInput, OperatorConsole, PtyConsole};
use crate::dispatcher::{dispatch, QuitState};
use crate::pty::{PtyEndpoint, PtyError, PtyPair};
use crate::supervisor::SharedSupervisor;

use super::rendezvous::{command_rendezvous, CompletionNotifier, CompletionWaiter};

/// Socket read size.
const READ_BUFFER_SIZE: usize = 1024;

/// How long the outbound task may keep flushing terminal output after the
/// command task has stopped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A console session bound to one client.
pub struct ConsoleSession {
    supervisor: SharedSupervisor,
    prompt: String,
    cancel_token: CancellationToken,
    peer: SocketAddr,
}

impl ConsoleSession {
    /// Creates a session. `daemon_token` cancels it from outside.
    pub fn new(
        supervisor: SharedSupervisor,
        prompt: impl Into<String>,
        daemon_token: &CancellationToken,
        peer: SocketAddr,
    ) -> Self {
        Self {
            supervisor,
            prompt: prompt.into(),
            cancel_token: daemon_token.child_token(),
            peer,
        }
    }

    /// Runs the session to completion and reports how it ended.
    ///
    /// # Errors
    ///
    /// Only pty setup can fail; everything after that ends the session
    /// normally.
    pub async fn run(self, stream: TcpStream) -> Result<QuitState, PtyError> {
        let PtyPair {
            controller,
            follower,
        } = PtyPair::open()?;
        let controller = Arc::new(controller);
        let (mut reader, writer) = stream.into_split();
        let (notifier, mut waiter) = command_rendezvous();

        let outbound = tokio::spawn(forward_outbound(Arc::clone(&controller), writer));
        let commands = tokio::spawn(run_command_loop(
            PtyConsole::new(follower),
            Arc::clone(&self.supervisor),
            self.prompt.clone(),
            notifier,
            self.cancel_token.clone(),
        ));

        let quit = forward_inbound(&mut reader, &controller, &mut waiter, &self.cancel_token).await;

        // Stopping the command task closes the follower; the outbound task
        // then drains what is left and sees EOF.
        self.cancel_token.cancel();
        if let Err(e) = commands.await {
            warn!(peer = %self.peer, error = %e, "Command task failed");
        }
        let abort = outbound.abort_handle();
        if tokio::time::timeout(DRAIN_TIMEOUT, outbound).await.is_err() {
            debug!(peer = %self.peer, "Outbound drain timed out");
            abort.abort();
        }

        info!(peer = %self.peer, ?quit, "Console session finished");
        Ok(quit)
    }
}

/// Socket to pty. Returns the quit state the session ended with.
async fn forward_inbound(
    reader: &mut OwnedReadHalf,
    controller: &PtyEndpoint,
    waiter: &mut CompletionWaiter,
    cancel_token: &CancellationToken,
) -> QuitState {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return waiter.quit_state(),
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("Client closed the connection");
                    return waiter.quit_state();
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "Socket read failed");
                    return waiter.quit_state();
                }
            },
        };

        let chunk = filter_inbound(buf.get(..n).unwrap_or_default());
        if chunk.is_empty() {
            continue;
        }

        if let Err(e) = controller.write_all(&chunk).await {
            warn!(error = %e, "Failed to write to terminal");
            return waiter.quit_state();
        }
        waiter.submit(count_line_terminators(&chunk));

        if ends_with_line_terminator(&chunk) {
            let quit = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return waiter.quit_state(),
                result = waiter.wait_for_commands() => match result {
                    Ok(quit) => quit,
                    Err(_) => return waiter.quit_state(),
                },
            };
            if !quit.is_running() {
                return quit;
            }
        }
    }
}

/// Pty to socket. Socket write failures are ignored; the task ends when
/// the terminal closes.
async fn forward_outbound(controller: Arc<PtyEndpoint>, mut writer: OwnedWriteHalf) {
    let mut buf = [0u8; 4096];
    loop {
        match controller.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = writer.write_all(buf.get(..n).unwrap_or_default()).await;
            }
            Err(e) => {
                debug!(error = %e, "Terminal read failed");
                break;
            }
        }
    }
    debug!("Outbound forwarder finished");
}

/// Prompt, read, dispatch under the supervisor lock, print, report.
///
/// Ends when a command leaves the `Running` state, when the console runs
/// out of input, or when `cancel_token` fires. On the way out it cancels
/// `cancel_token` so the rest of the session follows.
pub async fn run_command_loop<C: OperatorConsole>(
    mut console: C,
    supervisor: SharedSupervisor,
    prompt: String,
    notifier: CompletionNotifier,
    cancel_token: CancellationToken,
) {
    loop {
        let input = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            input = console.read_line(&prompt) => input,
        };

        let line = match input {
            Ok(LineInput::Line(line)) => line,
            Ok(LineInput::EndOfInput) => {
                debug!("Console input ended");
                notifier.request_quit(QuitState::DisconnectRequested);
                break;
            }
            Err(e) => {
                warn!(error = %e, "Console read failed");
                notifier.request_quit(QuitState::DisconnectRequested);
                break;
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            mut guard = supervisor.lock() => dispatch(&mut guard, &line),
        };

        if !outcome.output.is_empty() {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                result = console.write_text(&outcome.output) => {
                    if let Err(e) = result {
                        debug!(error = %e, "Failed to write command output");
                    }
                }
            }
        }

        notifier.line_completed(outcome.quit);
        if !outcome.quit.is_running() {
            break;
        }
        tokio::task::yield_now().await;
    }

    cancel_token.cancel();
}
