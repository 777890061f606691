//! TCP accept loop and per-connection request processing.
//!
//! One task per accepted connection. Requests on a connection are handled
//! strictly one after another; connections never wait on each other.
//! Closing flips a shared watch flag: the accept loop stops and drops the
//! listener, and every connection task leaves its read and drops the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::codec::FrameCodec;
use crate::error::{Result, ServerError};
use crate::protocol::{Dispatcher, RequestContext, ServerContext};

/// Stops a running [`ConnectionDispatcher`] from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConnectionDispatcher {
    listener: TcpListener,
    context: Arc<ServerContext>,
    dispatcher: Arc<Dispatcher>,
    limit: Arc<Semaphore>,
    shutdown: ShutdownHandle,
    shutdown_timeout: Duration,
}

impl ConnectionDispatcher {
    #[instrument(skip_all, fields(target = %config.bind_target()))]
    pub async fn bind(
        config: &ServerConfig,
        context: Arc<ServerContext>,
        dispatcher: Arc<Dispatcher>,
        shutdown: ShutdownHandle,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_target()).await?;
        info!(
            address = %listener.local_addr()?,
            max_connections = config.max_connections,
            "LaunchServer listening"
        );
        Ok(Self {
            listener,
            context,
            dispatcher,
            limit: Arc::new(Semaphore::new(config.max_connections)),
            shutdown,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept until closed, then wait for connections to finish.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut connections = JoinSet::new();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let Ok(permit) = Arc::clone(&self.limit).try_acquire_owned() else {
                            warn!(%peer, "Connection limit reached, dropping connection");
                            self.context.metrics.connection_refused();
                            continue;
                        };
                        connections.spawn(serve(
                            stream,
                            peer,
                            Arc::clone(&self.context),
                            Arc::clone(&self.dispatcher),
                            self.shutdown.subscribe(),
                            permit,
                        ));
                    }
                    Err(e) => error!(error = %e, "Error accepting connection"),
                },

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(self.listener);
        info!(
            connections = connections.len(),
            "Shutting down server, waiting for connections to close"
        );

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!("Shutdown timeout reached, aborting remaining connections");
            connections.abort_all();
        }
        Ok(())
    }
}

#[instrument(skip_all, fields(%peer))]
async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ServerContext>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
    _permit: OwnedSemaphorePermit,
) {
    let session_id = context.sessions.open(peer).id;
    context.metrics.connection_opened();
    debug!(session_id, "Connection accepted");

    let result = process(stream, session_id, &context, &dispatcher, &mut shutdown).await;

    context.sessions.close(session_id);
    context.metrics.connection_closed();
    match result {
        Ok(()) => debug!(session_id, "Connection closed"),
        Err(ServerError::Io(e)) => debug!(session_id, error = %e, "Connection dropped"),
        Err(e) => {
            context.metrics.protocol_error();
            warn!(session_id, error = %e, "Closing connection");
        }
    }
}

async fn process(
    stream: TcpStream,
    session_id: u64,
    context: &ServerContext,
    dispatcher: &Dispatcher,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    loop {
        if *shutdown.borrow_and_update() {
            return Ok(());
        }
        let frame = tokio::select! {
            changed = shutdown.changed() => match changed {
                Ok(()) => continue,
                Err(_) => return Ok(()),
            },
            next = framed.next() => match next {
                Some(frame) => frame?,
                None => return Ok(()),
            },
        };

        // Swept by the idle sweep while waiting for this request.
        let session = context
            .sessions
            .touch(session_id)
            .ok_or(ServerError::ConnectionClosed)?;

        let response = dispatcher.dispatch(&RequestContext::new(context, session), frame)?;
        framed.send(response).await?;
    }
}
