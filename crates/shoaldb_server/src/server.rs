//! TCP accept loop.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::ConnectionHandler;
use shoaldb_core::Database;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc};
use std::thread;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Semaphore};

/// The TCP server.
///
/// Every accepted connection gets its own task and its own
/// [`Session`](shoaldb_core::Session); commands run on tokio's blocking
/// pool.
///
/// # Example
///
/// ```no_run
/// use shoaldb_core::{Config, Database};
/// use shoaldb_server::{Server, ServerConfig};
/// use std::sync::Arc;
///
/// # async fn serve() -> shoaldb_server::ServerResult<()> {
/// let db = Arc::new(Database::open("data", Config::default())?);
/// let server = Server::bind(ServerConfig::default(), db).await?;
/// server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
/// # }
/// ```
pub struct Server {
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    slots: Arc<Semaphore>,
}

impl Server {
    /// Binds the listener.
    pub async fn bind(config: ServerConfig, db: Arc<Database>) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let slots = Arc::new(Semaphore::new(config.max_connections.max(1)));
        let handler = Arc::new(ConnectionHandler::new(db, config));
        Ok(Self {
            listener,
            handler,
            slots,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections forever.
    pub async fn run(self) -> ServerResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves connections until `shutdown` completes.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(%addr, "shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                        tracing::warn!(%peer, "connection limit reached, refusing");
                        continue;
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, error = %e, "cannot set TCP_NODELAY");
                    }

                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        let _permit = permit;
                        let peer = peer.to_string();
                        tracing::debug!(peer, "connection accepted");
                        match handler.handle(stream, &peer).await {
                            Ok(()) => tracing::debug!(peer, "connection closed"),
                            Err(e) if e.is_disconnect() => {
                                tracing::debug!(peer, error = %e, "peer went away");
                            }
                            Err(e) => tracing::warn!(peer, error = %e, "connection failed"),
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

/// A server running on its own runtime thread.
///
/// Dropping the handle stops the accept loop and joins the thread.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<ServerResult<()>>>,
}

impl ServerHandle {
    /// Binds and starts a server in the background.
    pub fn start(config: ServerConfig, db: Arc<Database>) -> ServerResult<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("shoaldb-server".into())
            .spawn(move || -> ServerResult<()> {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(async move {
                    let server = match Server::bind(config, db).await {
                        Ok(server) => server,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return Err(e);
                        }
                    };
                    let _ = ready_tx.send(server.local_addr().map_err(|e| e.to_string()));
                    server
                        .run_until(async {
                            let _ = shutdown_rx.await;
                        })
                        .await
                })
            })?;

        let addr = ready_rx
            .recv()
            .map_err(|_| ServerError::Internal("server thread exited during startup".into()))?
            .map_err(ServerError::Internal)?;

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops the server and waits for the runtime thread.
    pub fn stop(mut self) -> ServerResult<()> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> ServerResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| ServerError::Internal("server thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_and_join() {
            tracing::warn!(error = %e, "server did not stop cleanly");
        }
    }
}
