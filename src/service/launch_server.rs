//! # Launch Server
//!
//! Wires the pieces together: key pair, snapshot store, launcher build,
//! connection dispatcher, maintenance sweeps and the control task.
//!
//! Resyncs and launcher rebuilds only ever run on the control task, one at a
//! time in arrival order. Administrative requests queue on its channel.

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::bootstrap::{BuildReport, LauncherBuilder};
use crate::config::LaunchServerConfig;
use crate::error::{Result, ServerError};
use crate::protocol::handlers::register_defaults;
use crate::protocol::{Dispatcher, ServerContext};
use crate::service::maintenance::{spawn_sweep, Sweepable};
use crate::service::server::{ConnectionDispatcher, ShutdownHandle};
use crate::state::{ResyncReport, ServerKeyPair, SnapshotStore};
use crate::utils::metrics::Timer;

/// Pending admin requests beyond this make callers wait.
const CONTROL_QUEUE_DEPTH: usize = 16;

enum ControlRequest {
    Resync {
        changed: Option<HashSet<String>>,
        reply: oneshot::Sender<Result<ResyncReport>>,
    },
    RebuildLauncher {
        reply: oneshot::Sender<Result<BuildReport>>,
    },
}

pub struct LaunchServer {
    context: Arc<ServerContext>,
    config: LaunchServerConfig,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
    control: mpsc::Sender<ControlRequest>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LaunchServer {
    /// Start with the default (offline) account backend.
    pub async fn start(dir: &Path, config: LaunchServerConfig) -> Result<Self> {
        Self::start_with(dir, config, |ctx| ctx).await
    }

    /// Start, letting `customize` plug account and texture backends into the
    /// context before anything is served.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn start_with<F>(dir: &Path, config: LaunchServerConfig, customize: F) -> Result<Self>
    where
        F: FnOnce(ServerContext) -> ServerContext,
    {
        let config = config.resolve(dir);
        config.validate_strict()?;

        let state = &config.state;
        let keys = Arc::new(ServerKeyPair::load_or_generate(
            &state.public_key_file,
            &state.private_key_file,
        )?);
        info!(
            crc32 = %format!("{:08x}", keys.crc32()),
            fingerprint = %hex::encode(keys.fingerprint()),
            "Public key loaded"
        );

        for dir in [&state.updates_dir, &state.profiles_dir] {
            if !dir.is_dir() {
                info!(dir = %dir.display(), "Creating directory");
                fs::create_dir_all(dir)?;
            }
        }

        let store = Arc::new(SnapshotStore::new(
            &state.updates_dir,
            &state.profiles_dir,
            state.digest_algorithm,
            Arc::clone(&keys),
        ));
        let context = Arc::new(customize(ServerContext::new(
            config.auth.clone(),
            Arc::clone(&store),
        )?));

        let report = blocking(move || store.resync(None)).await?;
        context
            .metrics
            .resync(report.rehashed.len(), report.reused.len());

        let builder = Arc::new(LauncherBuilder::new(
            &config.launcher,
            &config.server,
            Arc::clone(&keys),
        ));
        if builder.has_base_archive() {
            rebuild(&builder, &context).await?;
        } else {
            warn!(
                base = %builder.base_archive().display(),
                "No base launcher archive, skipping launcher build"
            );
        }

        let dispatcher = Arc::new(Dispatcher::new());
        register_defaults(&dispatcher)?;

        let shutdown = ShutdownHandle::new();
        let server = ConnectionDispatcher::bind(
            &config.server,
            Arc::clone(&context),
            dispatcher,
            shutdown.clone(),
        )
        .await?;
        let local_addr = server.local_addr()?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "Connection dispatcher failed");
            }
        }));
        for target in [
            Arc::clone(&context.sessions) as Arc<dyn Sweepable>,
            Arc::clone(&context.rate_limiter) as _,
        ] {
            tasks.push(spawn_sweep(
                target,
                config.auth.sweep_interval,
                Some(Arc::clone(&context.metrics)),
                shutdown.subscribe(),
            ));
        }

        let (control, requests) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        tasks.push(tokio::spawn(control_loop(
            requests,
            Arc::clone(&context),
            builder,
            shutdown.clone(),
        )));

        info!(address = %local_addr, "LaunchServer started");
        Ok(Self {
            context,
            config,
            local_addr,
            shutdown,
            control,
            tasks: Mutex::new(tasks),
        })
    }

    /// Build the launcher artifact once without serving anything.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn build_launcher(dir: &Path, config: LaunchServerConfig) -> Result<BuildReport> {
        let config = config.resolve(dir);
        config.validate_strict()?;
        let keys = Arc::new(ServerKeyPair::load_or_generate(
            &config.state.public_key_file,
            &config.state.private_key_file,
        )?);
        LauncherBuilder::new(&config.launcher, &config.server, keys).build()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn config(&self) -> &LaunchServerConfig {
        &self.config
    }

    /// Queue a resync; `None` rehashes every update set.
    pub async fn request_resync(&self, changed: Option<HashSet<String>>) -> Result<ResyncReport> {
        let (reply, response) = oneshot::channel();
        self.send(ControlRequest::Resync { changed, reply }).await?;
        response.await.map_err(|_| control_stopped())?
    }

    /// Queue a launcher rebuild.
    pub async fn rebuild_launcher(&self) -> Result<BuildReport> {
        let (reply, response) = oneshot::channel();
        self.send(ControlRequest::RebuildLauncher { reply }).await?;
        response.await.map_err(|_| control_stopped())?
    }

    async fn send(&self, request: ControlRequest) -> Result<()> {
        if self.shutdown.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }
        self.control
            .send(request)
            .await
            .map_err(|_| control_stopped())
    }

    /// Stop accepting, close every connection and wait for background tasks.
    pub async fn close(&self) {
        info!("Closing LaunchServer");
        self.shutdown.close();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.context.metrics.log_summary();
    }
}

fn control_stopped() -> ServerError {
    ServerError::Custom("Control task stopped".into())
}

async fn control_loop(
    mut requests: mpsc::Receiver<ControlRequest>,
    context: Arc<ServerContext>,
    builder: Arc<LauncherBuilder>,
    shutdown: ShutdownHandle,
) {
    let mut closed = shutdown.subscribe();
    loop {
        if *closed.borrow_and_update() {
            break;
        }
        let request = tokio::select! {
            changed = closed.changed() => match changed {
                Ok(()) => continue,
                Err(_) => break,
            },
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        match request {
            ControlRequest::Resync { changed, reply } => {
                let _timer = Timer::start("resync");
                let store = Arc::clone(&context.store);
                let result = blocking(move || store.resync(changed.as_ref())).await;
                match &result {
                    Ok(report) => context
                        .metrics
                        .resync(report.rehashed.len(), report.reused.len()),
                    Err(e) => {
                        context.metrics.resync_failed();
                        error!(error = %e, "Resync failed, previous snapshot stays published");
                    }
                }
                let _ = reply.send(result);
            }
            ControlRequest::RebuildLauncher { reply } => {
                let _timer = Timer::start("launcher_build");
                let result = rebuild(&builder, &context).await;
                if let Err(e) = &result {
                    error!(error = %e, "Launcher build failed");
                }
                let _ = reply.send(result);
            }
        }
    }
}

async fn rebuild(builder: &Arc<LauncherBuilder>, context: &ServerContext) -> Result<BuildReport> {
    let task = Arc::clone(builder);
    let report = blocking(move || task.build()).await?;
    context.set_launcher(builder.sign(&report.digest)?);
    Ok(report)
}

/// Filesystem and signing work stays off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Custom(format!("Blocking task failed: {e}")))?
}
