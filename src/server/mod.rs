//! Service lifecycle: routing, listener, refresh job and ordered shutdown.
//!
//! ```text
//! Stopped ─start()─▶ Starting ─▶ Running ─stop() / GET /admin/shutdown─▶ ShuttingDown ─▶ Stopped
//! ```
//!
//! Shutdown stops admitting requests, waits for the in-flight ones (up to
//! `drain_timeout_secs`), cancels the refresh job, closes the state holder and
//! finally stops the listener. Teardown failures are logged and never abort
//! the remaining steps.

pub mod handlers;
pub mod routing;
pub mod shutdown;

use std::net::SocketAddr;
use std::sync::{Arc, RwLock, Weak};

use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::{SchemaError, SchemaResult, ServerError, ShutdownError, StateError};
use crate::scheduler::{JobHandle, JobScheduler, StateRefreshJob, TokioScheduler};
use crate::source::OntologySource;
use crate::state::{ServerState, StateHolder};

use self::routing::{Route, SHUTDOWN_PATH, build_router};
use self::shutdown::{ShutdownTracker, track_requests};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Stopped,
    Starting,
    Running,
    ShuttingDown,
}

/// A schemad service. Cheap to clone; clones control the same service.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    source: Arc<dyn OntologySource>,
    routes: Vec<Route>,
    scheduler: Arc<dyn JobScheduler + Send + Sync>,
    phase: watch::Sender<LifecyclePhase>,
    holder: RwLock<Option<Arc<StateHolder>>>,
    running: Mutex<Option<Running>>,
}

struct Prepared {
    holder: Arc<StateHolder>,
    tracker: Arc<ShutdownTracker>,
    listener: tokio::net::TcpListener,
    router: axum::Router,
    local_addr: SocketAddr,
}

/// Resources owned while the service is up.
struct Running {
    local_addr: SocketAddr,
    tracker: Arc<ShutdownTracker>,
    stop_listener: oneshot::Sender<()>,
    listener: JoinHandle<std::io::Result<()>>,
    job: Option<JobHandle>,
}

impl Server {
    /// A stopped service serving `routes` over ontologies from `source`.
    pub fn new(config: ServerConfig, source: Arc<dyn OntologySource>, routes: Vec<Route>) -> Self {
        Self::with_scheduler(config, source, routes, Arc::new(TokioScheduler::new()))
    }

    pub fn with_scheduler(
        config: ServerConfig,
        source: Arc<dyn OntologySource>,
        routes: Vec<Route>,
        scheduler: Arc<dyn JobScheduler + Send + Sync>,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                source,
                routes,
                scheduler,
                phase: watch::Sender::new(LifecyclePhase::Stopped),
                holder: RwLock::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.inner.phase.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == LifecyclePhase::Running
    }

    /// The latest server state, as request handlers see it.
    pub fn state(&self) -> Result<Arc<ServerState>, StateError> {
        self.holder()?.current()
    }

    pub fn holder(&self) -> Result<Arc<StateHolder>, StateError> {
        self.inner
            .holder
            .read()
            .expect("holder lock poisoned")
            .clone()
            .ok_or(StateError::Closed)
    }

    /// Address the listener is bound to, while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Resolve once the service is stopped.
    pub async fn wait_stopped(&self) {
        let mut rx = self.inner.phase.subscribe();
        let _ = rx.wait_for(|p| *p == LifecyclePhase::Stopped).await;
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        self.inner.phase.send_replace(phase);
    }

    /// Load state, bind the listener and schedule the refresh job.
    ///
    /// If the job cannot be scheduled the listener stays bound and the error
    /// is a fatal [`ServerError::Start`]; call [`stop`](Self::stop) to release
    /// it.
    pub async fn start(&self) -> SchemaResult<SocketAddr> {
        let claimed = self.inner.phase.send_if_modified(|phase| {
            if *phase == LifecyclePhase::Stopped {
                *phase = LifecyclePhase::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ServerError::AlreadyRunning.into());
        }

        let mut running = self.inner.running.lock().await;
        let Prepared {
            holder,
            tracker,
            listener,
            router,
            local_addr,
        } = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(error = %e, "server failed to start");
                self.set_phase(LifecyclePhase::Stopped);
                return Err(e);
            }
        };

        let (stop_listener, stop_rx) = oneshot::channel();
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        });
        let listener = tokio::spawn(async move { serve.await });

        *self.inner.holder.write().expect("holder lock poisoned") = Some(Arc::clone(&holder));
        *running = Some(Running {
            local_addr,
            tracker: Arc::clone(&tracker),
            stop_listener,
            listener,
            job: None,
        });
        self.set_phase(LifecyclePhase::Running);
        tokio::spawn(coordinate(Arc::downgrade(&self.inner), tracker));
        tracing::info!(addr = %local_addr, "schemad listening");

        let job = Arc::new(StateRefreshJob::new(holder, Arc::clone(&self.inner.source)));
        match self
            .inner
            .scheduler
            .schedule(job, self.inner.config.update_interval())
        {
            Ok(handle) => {
                if let Some(r) = running.as_mut() {
                    r.job = Some(handle);
                }
                Ok(local_addr)
            }
            Err(e) => {
                let err = ServerError::start(e);
                tracing::error!(error = %err, "refresh job could not be scheduled");
                Err(err.into())
            }
        }
    }

    /// Load the state, build the router and bind. Releases the state again if
    /// a later step fails.
    async fn prepare(&self) -> SchemaResult<Prepared> {
        let source = Arc::clone(&self.inner.source);
        let settings = self.inner.config.kb_settings();
        let holder =
            match tokio::task::spawn_blocking(move || StateHolder::load(source.as_ref(), settings))
                .await
            {
                Ok(loaded) => Arc::new(loaded?),
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            };

        let tracker = ShutdownTracker::new();
        let prepared = async {
            let router = build_router(&self.inner.routes, Arc::clone(&holder))?
                .route(
                    SHUTDOWN_PATH,
                    get(request_shutdown).with_state(Arc::clone(&tracker)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    Arc::clone(&tracker),
                    track_requests,
                ))
                .layer(TraceLayer::new_for_http());

            let addr = self.inner.config.bind_addr();
            let bind_err = |e: std::io::Error| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            };
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(bind_err)?;
            let local_addr = listener.local_addr().map_err(bind_err)?;
            Ok::<_, ServerError>((listener, router, local_addr))
        }
        .await;

        match prepared {
            Ok((listener, router, local_addr)) => Ok(Prepared {
                holder,
                tracker,
                listener,
                router,
                local_addr,
            }),
            Err(e) => {
                holder.close();
                Err(e.into())
            }
        }
    }

    /// Drain in-flight requests, then tear down the job, the state and the
    /// listener, in that order. A no-op unless the service is running.
    pub async fn stop(&self) -> SchemaResult<()> {
        let claimed = self.inner.phase.send_if_modified(|phase| {
            if *phase == LifecyclePhase::Running {
                *phase = LifecyclePhase::ShuttingDown;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Ok(());
        }
        tracing::info!("schemad shutting down");

        let Some(running) = self.inner.running.lock().await.take() else {
            self.set_phase(LifecyclePhase::Stopped);
            return Ok(());
        };
        let drain = self.inner.config.drain_timeout();

        running.tracker.request_shutdown();
        if !running.tracker.drained(drain).await {
            tracing::debug!(
                in_flight = running.tracker.in_flight(),
                "drain timed out; continuing shutdown"
            );
        }

        match running.job.as_ref().map(JobHandle::cancel) {
            Some(Err(e)) => tracing::debug!(error = %e, "refresh job cancel failed"),
            Some(Ok(())) => {}
            None => tracing::debug!("no refresh job to cancel"),
        }

        let holder = self.inner.holder.write().expect("holder lock poisoned").take();
        if let Some(holder) = holder {
            holder.close();
        }

        let result = stop_listener(running, drain).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "listener stop failed");
        }
        self.set_phase(LifecyclePhase::Stopped);
        tracing::info!("schemad stopped");
        result.map_err(SchemaError::from)
    }
}

async fn stop_listener(running: Running, timeout: std::time::Duration) -> Result<(), ShutdownError> {
    let _ = running.stop_listener.send(());
    let mut listener = running.listener;
    match tokio::time::timeout(timeout, &mut listener).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(ShutdownError::Listener {
            message: e.to_string(),
        }),
        Ok(Err(e)) => Err(ShutdownError::Listener {
            message: e.to_string(),
        }),
        Err(_) => {
            listener.abort();
            Err(ShutdownError::ListenerTimeout {
                secs: timeout.as_secs(),
            })
        }
    }
}

/// `GET /admin/shutdown`: acknowledge at once, shut down in the background.
async fn request_shutdown(
    axum::extract::State(tracker): axum::extract::State<Arc<ShutdownTracker>>,
) -> impl IntoResponse {
    if tracker.request_shutdown() {
        tracing::info!("shutdown requested over HTTP");
    }
    (StatusCode::ACCEPTED, [(header::CONNECTION, "close")])
}

/// Waits for a shutdown request and performs the stop.
async fn coordinate(inner: Weak<ServerInner>, tracker: Arc<ShutdownTracker>) {
    tracker.requested().await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let server = Server { inner };
    if let Err(e) = server.stop().await {
        tracing::debug!(error = %e, "shutdown finished with errors");
    }
}
