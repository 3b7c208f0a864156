//! Worker process abstraction and registry rows.

use std::fmt;
use std::io;

use crate::WorkerResources;

/// A running worker as seen by the supervisor.
///
/// The supervisor never waits on a worker. It only asks whether the
/// process still exists and asks it to shut down; everything else about
/// the worker is opaque.
pub trait WorkerProcess: Send + fmt::Debug {
    /// OS process identifier.
    fn pid(&self) -> u32;

    /// Non-blocking liveness probe. Must not have side effects on the worker.
    fn is_alive(&mut self) -> bool;

    /// Delivers the graceful shutdown notification without waiting for exit.
    fn request_shutdown(&mut self) -> io::Result<()>;
}

/// One occupied row of the registry.
///
/// A slot that holds a `WorkerSlot` is active; a free slot holds nothing.
#[derive(Debug)]
pub struct WorkerSlot {
    process: Box<dyn WorkerProcess>,
    resources: WorkerResources,
    command_line: String,
}

impl WorkerSlot {
    pub(crate) fn new(
        process: Box<dyn WorkerProcess>,
        resources: WorkerResources,
        command_line: String,
    ) -> Self {
        Self {
            process,
            resources,
            command_line,
        }
    }

    /// Process identifier of the worker.
    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Identifiers the worker was launched with.
    pub fn resources(&self) -> &WorkerResources {
        &self.resources
    }

    /// Argument string the worker was launched with.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub(crate) fn process_mut(&mut self) -> &mut dyn WorkerProcess {
        self.process.as_mut()
    }

    /// Consumes the slot, handing back the process handle.
    pub fn into_process(self) -> Box<dyn WorkerProcess> {
        self.process
    }
}
