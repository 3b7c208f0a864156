//! TCP console server for the hypervisor daemon.
//!
//! The server:
//! - Listens on a TCP port (SO_REUSEADDR, backlog 5)
//! - Serves one console client at a time; others wait in the backlog
//! - Sends the telnet option negotiation, then bridges the client onto a pty
//! - Stops on `quit` or when the daemon's CancellationToken fires, and
//!   terminates every worker on the way out
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ HypervisorServer │
//! │   TcpListener    │
//! └────────┬─────────┘
//!          │ accept() (sequential)
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │  ConsoleSession  │────▶│ SharedSupervisor │
//! │  (pty + tasks)   │lock │  (registry owner)│
//! └──────────────────┘     └────────┬─────────┘
//!                                   │ spawn / SIGUSR2
//!                                   ▼
//!                          ┌──────────────────┐
//!                          │  worker processes│
//!                          └──────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept and session errors are logged and the loop continues
//! - Only listener setup is fatal

mod rendezvous;
mod session;

pub use rendezvous::{
    command_rendezvous, CommandProgress, CommandTaskGone, CompletionNotifier, CompletionWaiter,
};
pub use session::{run_command_loop, ConsoleSession};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hv_protocol::NEGOTIATION;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::QuitState;
use crate::supervisor::SharedSupervisor;

/// Pending connections the kernel queues while a session is running.
pub const LISTEN_BACKLOG: u32 = 5;

/// Console server. Owns the listener; shares the supervisor.
pub struct HypervisorServer {
    listener: TcpListener,
    supervisor: SharedSupervisor,
    prompt: String,
    cancel_token: CancellationToken,
    session_counter: u64,
}

impl HypervisorServer {
    /// Binds the console listener. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// `ServerError::Bind` if the socket cannot be created, bound or put
    /// into listening state.
    pub fn bind(
        addr: SocketAddr,
        supervisor: SharedSupervisor,
        prompt: impl Into<String>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let bind_error = |e: io::Error| ServerError::Bind {
            addr,
            error: e.to_string(),
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;

        info!(%addr, "Console listening");

        Ok(Self {
            listener,
            supervisor,
            prompt: prompt.into(),
            cancel_token,
            session_counter: 0,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves clients until `quit` or cancellation, then
    /// terminates every worker.
    pub async fn run(mut self) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }
                result = self.listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            self.session_counter += 1;
            info!(%peer, session = self.session_counter, "Console client connected");

            if self.serve(stream, peer).await == QuitState::ShutdownRequested {
                info!("Shutdown requested from console");
                self.cancel_token.cancel();
                break;
            }
        }

        drop(self.listener);
        let terminated = self.supervisor.lock().await.terminate_all();
        info!(terminated, "Hypervisor stopped");
        Ok(())
    }

    /// Runs one client to completion.
    async fn serve(&self, mut stream: TcpStream, peer: SocketAddr) -> QuitState {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
        }
        if let Err(e) = stream.write_all(&NEGOTIATION).await {
            warn!(%peer, error = %e, "Failed to send telnet negotiation");
            return QuitState::Running;
        }

        let session = ConsoleSession::new(
            Arc::clone(&self.supervisor),
            self.prompt.as_str(),
            &self.cancel_token,
            peer,
        );
        match session.run(stream).await {
            Ok(quit) => quit,
            Err(e) => {
                error!(%peer, error = %e, "Console session could not start");
                QuitState::Running
            }
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind console listener on {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },
}
