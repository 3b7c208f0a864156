//! Daemon configuration.
//!
//! Every field has a default, so an empty (or absent) TOML file yields the
//! stock daemon: console on port 2000, 100 worker slots, blocks of 9.
//!
//! ```toml
//! port = 2000
//! bind_address = "0.0.0.0"
//! max_workers = 100
//! block_step = 9
//! local_udp_base = 20000
//! remote_udp_base = 30000
//! worker_program = "vpcs"
//! worker_args = ["-F"]
//! prompt = "HV > "
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use hv_core::{
    RegistryLimits, DEFAULT_BLOCK_STEP, DEFAULT_LOCAL_UDP_BASE, DEFAULT_MAX_WORKERS,
    DEFAULT_REMOTE_UDP_BASE,
};
use serde::Deserialize;
use thiserror::Error;

/// Default console port.
pub const DEFAULT_PORT: u16 = 2000;

/// Ports the console may listen on.
pub const PORT_RANGE: RangeInclusive<u16> = 1024..=65000;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "HV_CONFIG";

/// Default worker executable.
pub const DEFAULT_WORKER_PROGRAM: &str = "vpcs";

/// Default console prompt.
pub const DEFAULT_PROMPT: &str = "HV > ";

/// Configuration errors. All of them are fatal at start.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid daemon port {port} (allowed 1024..=65000)")]
    InvalidPort { port: u16 },

    #[error("max_workers must be at least 1")]
    NoWorkerSlots,

    #[error("block_step must be at least 1")]
    ZeroBlockStep,

    #[error("{field} must be non-zero")]
    ZeroUdpBase { field: &'static str },

    #[error("worker_program must not be empty")]
    EmptyWorkerProgram,
}

/// Daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HypervisorConfig {
    /// Console TCP port. Workers get consecutive listen ports above it.
    pub port: u16,
    /// Address the console binds to.
    pub bind_address: IpAddr,
    /// Number of worker slots.
    pub max_workers: usize,
    /// Width of the MAC / UDP block each worker reserves.
    pub block_step: u32,
    /// Local UDP base of the first worker.
    pub local_udp_base: u16,
    /// Remote UDP base of the first worker.
    pub remote_udp_base: u16,
    /// Worker executable, looked up in `PATH` when not absolute.
    pub worker_program: PathBuf,
    /// Arguments placed before the resource flags on every launch.
    pub worker_args: Vec<String>,
    /// Console prompt.
    pub prompt: String,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_workers: DEFAULT_MAX_WORKERS,
            block_step: DEFAULT_BLOCK_STEP,
            local_udp_base: DEFAULT_LOCAL_UDP_BASE,
            remote_udp_base: DEFAULT_REMOTE_UDP_BASE,
            worker_program: PathBuf::from(DEFAULT_WORKER_PROGRAM),
            worker_args: vec!["-F".to_string()],
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl HypervisorConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml(source: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Reads and parses a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&source, path)
    }

    /// Loads `explicit` if given, else the file named by `HV_CONFIG`, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Rejects settings the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !PORT_RANGE.contains(&self.port) {
            return Err(ConfigError::InvalidPort { port: self.port });
        }
        if self.max_workers == 0 {
            return Err(ConfigError::NoWorkerSlots);
        }
        if self.block_step == 0 {
            return Err(ConfigError::ZeroBlockStep);
        }
        if self.local_udp_base == 0 {
            return Err(ConfigError::ZeroUdpBase {
                field: "local_udp_base",
            });
        }
        if self.remote_udp_base == 0 {
            return Err(ConfigError::ZeroUdpBase {
                field: "remote_udp_base",
            });
        }
        if self.worker_program.as_os_str().is_empty() {
            return Err(ConfigError::EmptyWorkerProgram);
        }
        Ok(())
    }

    /// Socket address the console listens on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Registry sizing derived from these settings.
    pub fn registry_limits(&self) -> RegistryLimits {
        RegistryLimits {
            capacity: self.max_workers,
            step: self.block_step,
            local_udp_base: self.local_udp_base,
            remote_udp_base: self.remote_udp_base,
            ..RegistryLimits::for_daemon_port(self.port)
        }
    }
}
