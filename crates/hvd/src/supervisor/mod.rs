//! Worker supervisor.
//!
//! `Supervisor` is the single owner of the resource registry. It turns a
//! parsed `vpcs` request into a running worker and tears workers down
//! again. The daemon shares it as [`SharedSupervisor`]; holding that mutex
//! is what "holding the command lock" means elsewhere in this crate.
//!
//! ```text
//! StartArgs ──▶ registry.allocate ──▶ launcher.launch ──▶ registry.occupy
//!                 (no mutation)         (spawn, no wait)     (commit)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Spawn failures and signal delivery failures are reported, never fatal
//! - Nothing here waits on a worker process

mod process;

pub use process::{ChildWorker, CommandLauncher, WorkerLauncher, SHUTDOWN_SIGNAL};

use std::sync::Arc;

use hv_core::{AllocationError, RegistryLimits, ResourceRegistry, WorkerSlot};
use hv_protocol::StartArgs;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Supervisor shared between the console session and daemon shutdown.
pub type SharedSupervisor = Arc<Mutex<Supervisor>>;

/// Errors from starting a worker.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("Failed to start worker ({command_line}): {error}")]
    SpawnFailed { command_line: String, error: String },
}

/// One row of `list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub pid: u32,
    pub command_line: String,
}

/// Owns the registry and launches, lists and terminates workers.
#[derive(Debug)]
pub struct Supervisor {
    registry: ResourceRegistry,
    launcher: Box<dyn WorkerLauncher>,
}

impl Supervisor {
    /// Creates a supervisor with an empty registry.
    pub fn new(limits: RegistryLimits, launcher: impl WorkerLauncher + 'static) -> Self {
        Self {
            registry: ResourceRegistry::new(limits),
            launcher: Box::new(launcher),
        }
    }

    /// Wraps the supervisor for sharing across tasks.
    pub fn into_shared(self) -> SharedSupervisor {
        Arc::new(Mutex::new(self))
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Starts a worker for `args`.
    ///
    /// The worker receives every resource flag explicitly, in the order
    /// `-p -s -c -m`, followed by the passthrough arguments. If the spawn
    /// fails the registry is left exactly as it was.
    pub fn launch(&mut self, args: StartArgs) -> Result<&WorkerSlot, SupervisorError> {
        let allocation = self.registry.allocate(&args.request)?;

        let mut argv = allocation.resources().to_flags();
        argv.extend(args.passthrough);
        let command_line = argv.join(" ");

        let process = match self.launcher.launch(&argv) {
            Ok(process) => process,
            Err(e) => {
                error!(command_line = %command_line, error = %e, "Failed to spawn worker");
                return Err(SupervisorError::SpawnFailed {
                    command_line,
                    error: e.to_string(),
                });
            }
        };

        let pid = process.pid();
        let slot = self.registry.occupy(allocation, process, command_line)?;
        info!(pid, command_line = %slot.command_line(), "Worker started");
        Ok(slot)
    }

    /// Terminates the worker in slot `index` and frees the slot immediately.
    ///
    /// Returns the worker's pid, or `None` if the slot was free.
    pub fn terminate(&mut self, index: usize) -> Option<u32> {
        let slot = self.registry.release(index)?;
        Some(shut_down(slot))
    }

    /// Terminates the worker at 1-based position `ordinal` among live slots,
    /// the numbering `list` prints.
    pub fn terminate_nth(&mut self, ordinal: usize) -> Option<u32> {
        let index = self.registry.nth_active(ordinal)?;
        self.terminate(index)
    }

    /// Terminates every worker. Returns how many were signalled.
    pub fn terminate_all(&mut self) -> usize {
        let slots = self.registry.drain();
        let count = slots.len();
        for slot in slots {
            shut_down(slot);
        }
        if count > 0 {
            info!(count, "All workers terminated");
        }
        count
    }

    /// Reclaims slots of workers that exited on their own, then lists the rest
    /// in slot order.
    pub fn live_workers(&mut self) -> Vec<WorkerSummary> {
        self.registry.reap_dead();
        self.registry
            .active()
            .map(|(_, slot)| WorkerSummary {
                pid: slot.pid(),
                command_line: slot.command_line().to_string(),
            })
            .collect()
    }
}

fn shut_down(slot: WorkerSlot) -> u32 {
    let pid = slot.pid();
    let mut process = slot.into_process();
    if let Err(e) = process.request_shutdown() {
        warn!(pid, error = %e, "Failed to deliver shutdown signal");
    }
    info!(pid, "Worker terminated");
    pid
}


#[cfg(test)]
mod tests {
    use super::testing::FakeLauncher;
    use super::*;
    use hv_protocol::parse_start_args;
    use std::sync::atomic::Ordering;

    fn supervisor(launcher: &FakeLauncher) -> Supervisor {
        let limits = RegistryLimits {
            capacity: 4,
            step: 32,
            ..RegistryLimits::for_daemon_port(2000)
        };
        Supervisor::new(limits, launcher.clone())
    }

    #[test]
    fn test_launch_passes_every_flag_then_passthrough() {
        let launcher = FakeLauncher::default();
        let mut sup = supervisor(&launcher);

        let args = parse_start_args(&["-i", "2", "-m", "64"]).unwrap();
        let slot = sup.launch(args).unwrap();
        assert_eq!(
            slot.command_line(),
            "-p 2001 -s 20000 -c 30000 -m 64 -i 2"
        );

        let launched = launcher.launched();
        assert_eq!(launched.len(), 1);
        assert_eq!(
            launched[0].args,
            vec!["-p", "2001", "-s", "20000", "-c", "30000", "-m", "64", "-i", "2"]
        );
    }

    #[test]
    fn test_spawn_failure_leaves_registry_unchanged() {
        let launcher = FakeLauncher::default();
        let mut sup = supervisor(&launcher);

        launcher.fail_next(true);
        let err = sup.launch(StartArgs::default()).unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
        assert!(err.to_string().contains("-p 2001"));
        assert_eq!(sup.registry().active_count(), 0);

        launcher.fail_next(false);
        let slot = sup.launch(StartArgs::default()).unwrap();
        assert_eq!(slot.resources().listen_port, 2001);
    }

    #[test]
    fn test_conflict_is_reported_without_spawning() {
        let launcher = FakeLauncher::default();
        let mut sup = supervisor(&launcher);
        sup.launch(StartArgs::default()).unwrap();

        let args = parse_start_args(&["-p", "2001"]).unwrap();
        let err = sup.launch(args).unwrap_err();
        assert_eq!(err.to_string(), "Port 2001 already in use");
        assert_eq!(launcher.launched().len(), 1);
    }

    #[test]
    fn test_terminate_nth_signals_and_frees() {
        let launcher = FakeLauncher::default();
        let mut sup = supervisor(&launcher);
        for _ in 0..3 {
            sup.launch(StartArgs::default()).unwrap();
        }
        let launched = launcher.launched();

        assert_eq!(sup.terminate_nth(2), Some(launched[1].pid));
        assert!(launched[1].signalled.load(Ordering::SeqCst));
        assert!(!launched[0].signalled.load(Ordering::SeqCst));
        assert_eq!(sup.registry().active_count(), 2);

        assert_eq!(sup.terminate_nth(3), None);
        assert_eq!(sup.terminate_nth(0), None);
        assert_eq!(sup.registry().active_count(), 2);
    }

    #[test]
    fn test_terminate_all_is_idempotent() {
        let launcher = FakeLauncher::default();
        let mut sup = supervisor(&launcher);
        sup.launch(StartArgs::default()).unwrap();
        sup.launch(StartArgs::default()).unwrap();

        assert_eq!(sup.terminate_all(), 2);
        assert_eq!(sup.registry().active_count(), 0);
        assert!(launcher
            .launched()
            .iter()
            .all(|l| l.signalled.load(Ordering::SeqCst)));
        assert_eq!(sup.terminate_all(), 0);
    }

    #[test]
    fn test_live_workers_reaps_exited() {
        let launcher = FakeLauncher::default();
        let mut sup = supervisor(&launcher);
        sup.launch(StartArgs::default()).unwrap();
        sup.launch(StartArgs::default()).unwrap();

        let launched = launcher.launched();
        launched[0].alive.store(false, Ordering::SeqCst);

        let live = sup.live_workers();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].pid, launched[1].pid);
        assert_eq!(sup.registry().active_count(), 1);
        assert!(!launched[0].signalled.load(Ordering::SeqCst));
    }
}
