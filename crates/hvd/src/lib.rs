//! hvd - worker hypervisor daemon
//!
//! This crate provides the daemon side of hv:
//! - `config` - TOML settings and their validation
//! - `supervisor` - worker launch / termination around the resource registry
//! - `dispatcher` - console command execution
//! - `pty` / `console` - the terminal pair each session runs on
//! - `server` - TCP accept loop and the per-client session bridge
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         hvd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐       ┌───────────────────────────┐   │
//! │  │ HypervisorServer │──────▶│      ConsoleSession       │   │
//! │  │  (TCP listener)  │ one   │ inbound / outbound / cmd  │   │
//! │  └──────────────────┘ at a  └─────────────┬─────────────┘   │
//! │                       time                │ command lock    │
//! │                                           ▼                 │
//! │                             ┌───────────────────────────┐   │
//! │                             │ Supervisor                │   │
//! │                             │  └─ ResourceRegistry      │   │
//! │                             └─────────────┬─────────────┘   │
//! │                                           │ spawn / SIGUSR2 │
//! └───────────────────────────────────────────┼─────────────────┘
//!                                             ▼
//!                                      worker processes
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Operator mistakes become `-ERR` lines, never errors

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod pty;
pub mod server;
pub mod supervisor;

pub use config::{ConfigError, HypervisorConfig};
pub use dispatcher::{dispatch, Dispatch, QuitState, FAILURE_PREFIX, SUCCESS_PREFIX};
pub use server::{HypervisorServer, ServerError};
pub use supervisor::{
    CommandLauncher, SharedSupervisor, Supervisor, SupervisorError, WorkerLauncher,
};
