//! hv Core - Worker slots and conflict-free resource allocation
//!
//! This crate provides the domain types shared between the daemon (hvd)
//! and the console grammar (hv-protocol):
//! - `resource` - the four resource kinds a worker consumes and requests for them
//! - `worker` - the `WorkerProcess` abstraction and the `WorkerSlot` row
//! - `registry` - the fixed-capacity slot table and its allocation policy
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod registry;
pub mod resource;
pub mod worker;

// Re-exports for convenience
pub use error::AllocationError;
pub use registry::{
    Allocation, RegistryLimits, ResourceRegistry, DEFAULT_BLOCK_STEP, DEFAULT_LOCAL_UDP_BASE,
    DEFAULT_MAX_WORKERS, DEFAULT_REMOTE_UDP_BASE,
};
pub use resource::{ResourceKind, ResourceRequest, WorkerResources};
pub use worker::{WorkerProcess, WorkerSlot};
