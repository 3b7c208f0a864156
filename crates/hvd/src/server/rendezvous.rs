//! Ordering between the inbound socket path and the command task.
//!
//! The inbound path counts every line terminator it forwards to the
//! terminal (`submit`). The command task reports every line it has
//! finished executing (`line_completed`). After forwarding a chunk that
//! ends a line, the inbound path waits until the two counts meet, so the
//! next operator line is never handed to the terminal while the previous
//! command is still running.
//!
//! ```text
//! inbound ── submit(n) ──▶ wait_for_commands ◀── watch ── line_completed ── command task
//! ```

use thiserror::Error;
use tokio::sync::watch;

use crate::dispatcher::QuitState;

/// Published by the command task after each line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandProgress {
    /// Lines fully executed so far.
    pub completed: u64,
    /// Highest quit state any command has requested.
    pub quit: QuitState,
}

/// The command task went away while the inbound path was waiting.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("command task ended")]
pub struct CommandTaskGone;

/// Creates a connected notifier / waiter pair for one session.
pub fn command_rendezvous() -> (CompletionNotifier, CompletionWaiter) {
    let (tx, rx) = watch::channel(CommandProgress::default());
    (
        CompletionNotifier { tx },
        CompletionWaiter { rx, submitted: 0 },
    )
}

/// Command task side.
#[derive(Debug)]
pub struct CompletionNotifier {
    tx: watch::Sender<CommandProgress>,
}

impl CompletionNotifier {
    /// Records one executed line and the quit state it left behind.
    pub fn line_completed(&self, quit: QuitState) {
        self.tx.send_modify(|progress| {
            progress.completed += 1;
            progress.quit = progress.quit.max(quit);
        });
    }

    /// Raises the quit state without completing a line (terminal closed).
    pub fn request_quit(&self, quit: QuitState) {
        self.tx.send_modify(|progress| progress.quit = progress.quit.max(quit));
    }
}

/// Inbound side.
#[derive(Debug)]
pub struct CompletionWaiter {
    rx: watch::Receiver<CommandProgress>,
    submitted: u64,
}

impl CompletionWaiter {
    /// Counts `lines` more lines as handed to the terminal.
    pub fn submit(&mut self, lines: u64) {
        self.submitted += lines;
    }

    /// Waits until every submitted line is executed, or until a command
    /// ended the session, and returns the current quit state.
    pub async fn wait_for_commands(&mut self) -> Result<QuitState, CommandTaskGone> {
        let submitted = self.submitted;
        let progress = self
            .rx
            .wait_for(|p| p.completed >= submitted || !p.quit.is_running())
            .await
            .map_err(|_| CommandTaskGone)?;
        Ok(progress.quit)
    }

    /// Quit state as last published.
    pub fn quit_state(&self) -> QuitState {
        self.rx.borrow().quit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_nothing_submitted_returns_immediately() {
        let (_notifier, mut waiter) = command_rendezvous();
        let quit = timeout(Duration::from_secs(1), waiter.wait_for_commands())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quit, QuitState::Running);
    }

    #[tokio::test]
    async fn test_waits_for_every_submitted_line() {
        let (notifier, mut waiter) = command_rendezvous();
        waiter.submit(2);

        notifier.line_completed(QuitState::Running);
        assert!(timeout(Duration::from_millis(50), waiter.wait_for_commands())
            .await
            .is_err());

        notifier.line_completed(QuitState::Running);
        let quit = timeout(Duration::from_secs(1), waiter.wait_for_commands())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quit, QuitState::Running);
    }

    #[tokio::test]
    async fn test_completion_from_another_task() {
        let (notifier, mut waiter) = command_rendezvous();
        waiter.submit(1);

        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.line_completed(QuitState::DisconnectRequested);
            notifier
        });

        let quit = timeout(Duration::from_secs(1), waiter.wait_for_commands())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quit, QuitState::DisconnectRequested);
        drop(task.await.unwrap());
    }

    #[tokio::test]
    async fn test_quit_releases_pending_lines() {
        let (notifier, mut waiter) = command_rendezvous();
        waiter.submit(3);
        notifier.line_completed(QuitState::ShutdownRequested);

        let quit = waiter.wait_for_commands().await.unwrap();
        assert_eq!(quit, QuitState::ShutdownRequested);
        assert_eq!(waiter.quit_state(), QuitState::ShutdownRequested);
    }

    #[tokio::test]
    async fn test_quit_state_never_decreases() {
        let (notifier, waiter) = command_rendezvous();
        notifier.line_completed(QuitState::ShutdownRequested);
        notifier.line_completed(QuitState::Running);
        notifier.request_quit(QuitState::DisconnectRequested);
        assert_eq!(waiter.quit_state(), QuitState::ShutdownRequested);
    }

    #[tokio::test]
    async fn test_dropped_notifier_is_an_error() {
        let (notifier, mut waiter) = command_rendezvous();
        waiter.submit(1);
        drop(notifier);
        assert_eq!(waiter.wait_for_commands().await, Err(CommandTaskGone));
    }
}
