//! Operator line source.
//!
//! The command task only needs two things from a console: "prompt and give
//! me the next line" and "print this". [`OperatorConsole`] captures that so
//! the task runs the same way over a pty or over a scripted fake.

use std::io;

use async_trait::async_trait;

use crate::pty::PtyEndpoint;

/// Result of waiting for a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineInput {
    /// A complete line, terminator removed.
    Line(String),
    /// The terminal is gone; no more lines will arrive.
    EndOfInput,
}

/// Line-oriented console used by the command task.
#[async_trait]
pub trait OperatorConsole: Send {
    /// Shows `prompt` and waits for the next complete line.
    async fn read_line(&mut self, prompt: &str) -> io::Result<LineInput>;

    /// Prints command output.
    async fn write_text(&mut self, text: &str) -> io::Result<()>;
}

/// Console on the follower end of a pty.
///
/// The line discipline already handles echo and editing; this only splits
/// the byte stream on CR / LF. Bytes after a terminator are kept for the
/// next call.
#[derive(Debug)]
pub struct PtyConsole {
    follower: PtyEndpoint,
    pending: Vec<u8>,
}

impl PtyConsole {
    pub fn new(follower: PtyEndpoint) -> Self {
        Self {
            follower,
            pending: Vec::new(),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n' || b == b'\r')?;
        let line =
            String::from_utf8_lossy(self.pending.get(..end).unwrap_or_default()).into_owned();
        self.pending.drain(..=end);
        Some(line)
    }
}

#[async_trait]
impl OperatorConsole for PtyConsole {
    async fn read_line(&mut self, prompt: &str) -> io::Result<LineInput> {
        self.follower.write_all(prompt.as_bytes()).await?;

        let mut buf = [0u8; 1024];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(LineInput::Line(line));
            }
            let n = self.follower.read(&mut buf).await?;
            if n == 0 {
                return Ok(LineInput::EndOfInput);
            }
            self.pending.extend_from_slice(buf.get(..n).unwrap_or_default());
        }
    }

    async fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.follower.write_all(text.as_bytes()).await
    }
}
