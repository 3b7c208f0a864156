//! Spawning workers and talking to them through signals.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use hv_core::WorkerProcess;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::debug;

/// Signal a worker treats as "finish up and exit".
pub const SHUTDOWN_SIGNAL: Signal = Signal::SIGUSR2;

/// Starts worker processes.
///
/// The supervisor goes through this seam for every launch so tests can
/// substitute a launcher that never touches the OS.
pub trait WorkerLauncher: Send + Sync + fmt::Debug {
    /// Spawns a worker with `args` appended to the launcher's own arguments.
    ///
    /// Must not wait for the worker.
    fn launch(&self, args: &[String]) -> io::Result<Box<dyn WorkerProcess>>;
}

/// Launches a fixed executable via `tokio::process::Command`.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl CommandLauncher {
    /// Launcher for `program`, passing `leading_args` before every argument vector.
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }
}

impl WorkerLauncher for CommandLauncher {
    fn launch(&self, args: &[String]) -> io::Result<Box<dyn WorkerProcess>> {
        // Descriptors opened by the daemon (listener, client socket, pty)
        // are close-on-exec, so the worker only inherits stdout/stderr.
        let child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()?;

        let pid = child.id().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "worker exited before it was recorded")
        })?;

        debug!(pid, program = %self.program.display(), "Worker process spawned");
        Ok(Box::new(ChildWorker { child, pid }))
    }
}

/// A worker spawned by [`CommandLauncher`].
///
/// Dropping the handle neither kills nor waits for the process; the tokio
/// runtime reaps it in the background once it exits.
#[derive(Debug)]
pub struct ChildWorker {
    child: Child,
    pid: u32,
}

impl WorkerProcess for ChildWorker {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn request_shutdown(&mut self) -> io::Result<()> {
        // An exited child has been reaped by `try_wait`; its pid may
        // already belong to someone else.
        if !self.is_alive() {
            return Ok(());
        }

        let pid = i32::try_from(self.pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(pid), SHUTDOWN_SIGNAL)?;
        debug!(pid = self.pid, signal = %SHUTDOWN_SIGNAL, "Shutdown signal delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_missing_program_fails_to_launch() {
        let launcher = CommandLauncher::new("/nonexistent/hv-worker", vec!["-F".to_string()]);
        let err = launcher.launch(&["-p".to_string(), "2001".to_string()]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_child_worker_lifecycle() {
        let launcher = CommandLauncher::new("sleep", Vec::new());
        let mut worker = launcher.launch(&["30".to_string()]).unwrap();

        assert!(worker.pid() > 0);
        assert!(worker.is_alive());

        // sleep has no SIGUSR2 handler, so the default action ends it.
        worker.request_shutdown().unwrap();

        let mut alive = true;
        for _ in 0..100 {
            if !worker.is_alive() {
                alive = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "worker did not exit after the shutdown signal");

        // Already gone: no signal is sent.
        worker.request_shutdown().unwrap();
    }
}
