//! hvd - worker hypervisor daemon
//!
//! Runs the telnet console that starts, lists and stops worker processes.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground) on the default console port 2000
//! hvd start
//!
//! # Start the daemon (background/daemonized) on port 5000
//! hvd start -d -H 5000
//!
//! # Start with a config file
//! hvd start --config /etc/hv/hvd.toml
//! HV_CONFIG=/etc/hv/hvd.toml hvd start
//!
//! # Stop the daemon
//! hvd stop
//!
//! # Check daemon status
//! hvd status
//!
//! # Enable debug logging
//! RUST_LOG=hvd=debug hvd start
//!
//! # Talk to it
//! telnet localhost 2000
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: end the console session, stop every worker, exit

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hvd::{CommandLauncher, HypervisorConfig, HypervisorServer, Supervisor};

/// hv daemon - worker hypervisor
#[derive(Parser, Debug)]
#[command(name = "hvd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Console TCP port (1024-65000)
        #[arg(short = 'H', long)]
        port: Option<u16>,

        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Configuration file (TOML); defaults to $HV_CONFIG
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Returns the directory holding the PID and log files.
fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("hv")
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("hvd.pid")
}

/// Returns the path to the log file.
fn log_file_path() -> PathBuf {
    state_dir().join("hvd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<i32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

/// Removes the PID file.
fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Checks if a process with the given PID exists.
fn is_process_running(pid: i32) -> bool {
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

/// Checks if the daemon is already running.
fn is_daemon_running() -> Option<i32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: i32) -> Result<()> {
    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .with_context(|| format!("Failed to send SIGTERM to process {pid}"))?;
    Ok(())
}

/// Loads the configuration and applies command line overrides.
fn load_config(path: Option<PathBuf>, port: Option<u16>) -> Result<HypervisorConfig> {
    let mut config = HypervisorConfig::discover(path.as_deref())?;
    if let Some(port) = port {
        config.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        port: None,
        daemon: false,
        config: None,
    });

    match command {
        Command::Start {
            port,
            daemon,
            config,
        } => {
            // Configuration errors go to the terminal, not the log file
            let config = load_config(config, port)?;

            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'hvd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Daemonize before starting tokio runtime
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();

            result
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            stop_daemon(pid)?;

            // Wait for process to exit (up to 5 seconds)
            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            bail!("Daemon did not stop within 5 seconds");
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                println!("Log: {}", log_file_path().display());
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: HypervisorConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hvd=info".parse()?)
                .add_directive("hv_core=info".parse()?)
                .add_directive("hv_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        port = config.port,
        max_workers = config.max_workers,
        block_step = config.block_step,
        worker = %config.worker_program.display(),
        "Hypervisor starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let launcher = CommandLauncher::new(&config.worker_program, config.worker_args.clone());
    let supervisor = Supervisor::new(config.registry_limits(), launcher).into_shared();

    let server = HypervisorServer::bind(
        config.listen_addr(),
        supervisor,
        config.prompt.as_str(),
        cancel_token,
    )
    .context("Failed to start console")?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Hypervisor stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
