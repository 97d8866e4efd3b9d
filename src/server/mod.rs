//! # Channel Server Front-End
//!
//! Accepts client TCP connections, performs the 8-byte null-init
//! handshake, and drives one encrypted session per client. Decrypted
//! payloads are routed through the opcode dispatcher to the system
//! handlers, which mutate the stage/object registries and broadcast back
//! out through other clients' send queues.

pub mod handlers;
pub mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::protocol::Dispatcher;
use crate::server::session::{run_session, SessionContext};
use crate::stage::{SessionId, StageRegistry};
use crate::utils::metrics::Metrics;

/// One game-channel server instance.
pub struct ChannelServer {
    config: NetworkConfig,
    stages: Arc<StageRegistry>,
    dispatcher: Arc<Dispatcher<SessionContext>>,
    metrics: Arc<Metrics>,
    next_session_id: AtomicU64,
}

impl ChannelServer {
    /// Build a server with the system handlers registered and the
    /// configured lobby stages pre-created.
    pub fn new(config: NetworkConfig) -> Self {
        let stages = Arc::new(StageRegistry::new());
        stages.seed(config.server.default_stages.iter().cloned());

        let dispatcher = Arc::new(Dispatcher::new());
        handlers::register_system_handlers(&dispatcher);

        Self {
            config,
            stages,
            dispatcher,
            metrics: Arc::new(Metrics::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn stages(&self) -> &Arc<StageRegistry> {
        &self.stages
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<SessionContext>> {
        &self.dispatcher
    }

    /// Run until ctrl-c.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("received ctrl-c, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(shutdown_rx).await
    }

    /// Run until a message arrives on `shutdown_rx`, then wait for the
    /// active connections to drain (bounded by the configured timeout).
    pub async fn run_with_shutdown(
        self: Arc<Self>,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let listener = TcpListener::bind(&self.config.server.address).await?;
        self.run_on(listener, shutdown_rx).await
    }

    /// Serve an already-bound listener; tests bind to an ephemeral port
    /// and hand it in here.
    pub async fn run_on(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        if let Ok(address) = listener.local_addr() {
            info!(%address, "listening");
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutting down server, waiting for connections to close");
                    self.drain_connections().await;
                    self.metrics.log_summary();
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            let active = self.metrics.connections_active.load(Ordering::Relaxed);
                            if active >= self.config.server.max_connections as u64 {
                                warn!(%peer, active, "connection limit reached, refusing");
                                continue;
                            }

                            let server = Arc::clone(&self);
                            let id = SessionId(
                                server.next_session_id.fetch_add(1, Ordering::Relaxed),
                            );

                            tokio::spawn(async move {
                                server.metrics.connection_opened();
                                let result = run_session(
                                    stream,
                                    peer,
                                    id,
                                    Arc::clone(&server.dispatcher),
                                    Arc::clone(&server.stages),
                                    Arc::clone(&server.metrics),
                                    server.config.session.clone(),
                                    server.config.server.expect_null_init,
                                )
                                .await;
                                if let Err(e) = result {
                                    warn!(%id, error = %e, "session ended with error");
                                }
                                server.metrics.connection_closed();
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "error accepting connection");
                        }
                    }
                }
            }
        }
    }

    /// Wait for active connections to close, up to the shutdown timeout.
    async fn drain_connections(&self) {
        let timeout = tokio::time::sleep(self.config.server.shutdown_timeout);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                _ = &mut timeout => {
                    warn!("shutdown timeout reached, forcing exit");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(500)) => {
                    let connections = self.metrics.connections_active.load(Ordering::Relaxed);
                    info!(connections, "waiting for connections to close");
                    if connections == 0 {
                        info!("all connections closed");
                        return;
                    }
                }
            }
        }
    }
}
