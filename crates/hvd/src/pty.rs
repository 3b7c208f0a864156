//! Pseudo-terminal pair driven through tokio's reactor.
//!
//! Each console session gets a fresh pair. The controller end faces the
//! network: bytes from the client are written into it, and whatever the
//! terminal produces (echo, prompt, command output) is read back out of it.
//! The follower end faces the command task, which reads complete lines
//! from it and writes responses to it.
//!
//! The kernel line discipline on the follower does the line editing
//! (echo, erase, kill). It is adjusted so that only CR and LF end a line:
//! EOF, signal characters, literal-next and flow control are all disabled.
//! The session counts the CR/LF bytes it forwards and relies on each one
//! producing exactly one line on the follower.
//!
//! Both descriptors are close-on-exec and non-blocking, wrapped in
//! [`AsyncFd`].

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::termios::{
    tcgetattr, tcsetattr, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices, Termios,
};
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tracing::debug;

/// `_POSIX_VDISABLE`: a control character slot holding this value is inert.
#[cfg(target_vendor = "apple")]
const DISABLED_CHAR: u8 = 0xff;
#[cfg(not(target_vendor = "apple"))]
const DISABLED_CHAR: u8 = 0;

/// Terminal pair errors.
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open pty: {0}")]
    Open(Errno),

    #[error("Failed to configure pty: {0}")]
    Configure(Errno),

    #[error("Pty I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One end of a terminal pair.
#[derive(Debug)]
pub struct PtyEndpoint {
    fd: AsyncFd<File>,
}

impl PtyEndpoint {
    fn new(fd: OwnedFd) -> Result<Self, PtyError> {
        let raw = fd.as_raw_fd();
        fcntl(raw, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(PtyError::Configure)?;
        let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(PtyError::Configure)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(PtyError::Configure)?;

        Ok(Self {
            fd: AsyncFd::new(File::from(fd))?,
        })
    }

    /// Reads whatever is available. Returns `Ok(0)` once the other end is
    /// gone (the kernel reports that as `EIO` on a pty).
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;

            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                    debug!("Pty peer closed");
                    return Ok(0);
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    /// Writes all of `data`.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let mut guard = self.fd.writable().await?;

            match guard.try_io(|inner| inner.get_ref().write(remaining)) {
                Ok(Ok(0)) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(Ok(n)) => remaining = remaining.get(n..).unwrap_or_default(),
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }
}

/// A freshly opened terminal pair.
#[derive(Debug)]
pub struct PtyPair {
    /// Network-facing end.
    pub controller: PtyEndpoint,
    /// Command-task-facing end.
    pub follower: PtyEndpoint,
}

impl PtyPair {
    /// Opens and configures a pair. Must be called inside a tokio runtime.
    pub fn open() -> Result<Self, PtyError> {
        let OpenptyResult { master, slave } =
            openpty(None::<&Winsize>, None::<&Termios>).map_err(PtyError::Open)?;

        configure_line_discipline(&slave)?;

        Ok(Self {
            controller: PtyEndpoint::new(master)?,
            follower: PtyEndpoint::new(slave)?,
        })
    }
}

/// Canonical mode with echo, where only CR and LF complete a line.
fn configure_line_discipline(follower: &OwnedFd) -> Result<(), PtyError> {
    let mut termios = tcgetattr(follower).map_err(PtyError::Configure)?;

    termios.local_flags |= LocalFlags::ICANON | LocalFlags::ECHO;
    termios.local_flags &= !(LocalFlags::ISIG | LocalFlags::IEXTEN);
    termios.input_flags |= InputFlags::ICRNL;
    termios.input_flags &= !(InputFlags::IXON | InputFlags::IGNCR | InputFlags::INLCR);

    for index in [
        SpecialCharacterIndices::VEOF,
        SpecialCharacterIndices::VEOL,
        SpecialCharacterIndices::VEOL2,
    ] {
        if let Some(slot) = termios.control_chars.get_mut(index as usize) {
            *slot = DISABLED_CHAR;
        }
    }

    tcsetattr(follower, SetArg::TCSANOW, &termios).map_err(PtyError::Configure)?;
    Ok(())
}
