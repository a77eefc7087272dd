//! Listener, shared context and lifecycle of the pairing server

use crate::config::ServerConfig;
use crate::connections::ConnectionTable;
use crate::error::ServerError;
use crate::handler::handle_connection;
use crate::janitor;
use crate::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Everything a connection handler needs, cheap to clone
#[derive(Clone)]
pub struct AppContext {
    config: Arc<ServerConfig>,
    connections: Arc<ConnectionTable>,
    state: ServerState,
}

impl AppContext {
    pub fn new(config: ServerConfig) -> Self {
        let connections = Arc::new(ConnectionTable::new());
        let state = ServerState::new(connections.clone(), config.pairing.clone());
        Self {
            config: Arc::new(config),
            connections,
            state,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }
}

/// Handle to a running server
pub struct ServerHandle {
    addr: SocketAddr,
    state: ServerState,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address, with the real port when configured with port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Stop accepting connections and stop the janitor
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Bind the listener and start serving in the background
pub async fn start(config: ServerConfig) -> Result<ServerHandle, ServerError> {
    config.validate()?;
    let listener = TcpListener::bind(config.addr).await?;
    let addr = listener.local_addr()?;

    let ctx = AppContext::new(config);
    let state = ctx.state().clone();
    let janitor = janitor::spawn(state.clone(), ctx.config().janitor_interval);
    let (shutdown, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx, janitor));

    tracing::info!(%addr, "pairing server listening");
    Ok(ServerHandle {
        addr,
        state,
        shutdown,
        task,
    })
}

/// Serve until Ctrl-C
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let handle = start(config).await?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    ctx: AppContext,
    mut shutdown: oneshot::Receiver<()>,
    janitor: JoinHandle<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    tokio::spawn(handle_connection(stream, peer_addr, ctx.clone()));
                }
                Err(err) => tracing::warn!(%err, "failed to accept connection"),
            },
        }
    }
    janitor.abort();
}
