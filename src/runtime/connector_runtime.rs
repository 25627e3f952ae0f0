//! Building and running a connector.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::managed_config::ManagedConfigRefresher;
use crate::ack::AckPublisher;
use crate::clock::{SharedClock, system_clock};
use crate::config::{ConnectorConfig, ReceiveMode};
use crate::connector::Connector;
use crate::health::{HealthController, HealthProbe, ShutdownAction};
use crate::ingest::{Dispatcher, FetchLoop, WebhookIngestor};
use crate::ledger::DeliveryLedger;
use crate::metrics::ProcessingMetrics;
use crate::remote::{ManagedConfig, RemoteClient};
use crate::scheduler::{MIN_PERIOD, SingleFlightTask, TaskSchedule, spawn_scheduled};
use crate::server::{AppState, PING_TIMEOUT, build_router, ping_local};
use crate::store::{DurableStore, KeyValueStore, StoreError, StoreLocation};

/// Errors that can occur while building or starting the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The store could not be opened or its tables created.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// `start` was called on a runtime that already started.
    #[error("runtime already started")]
    AlreadyStarted,

    /// The webhook server could not listen on its port.
    #[error("could not bind webhook server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

enum Lifecycle {
    Idle,
    Running {
        token: CancellationToken,
        handles: Vec<JoinHandle<()>>,
    },
    Stopped,
}

/// Configures a [`ConnectorRuntime`] before it is built.
pub struct RuntimeBuilder<C, K> {
    config: ConnectorConfig,
    client: Arc<C>,
    connector: Arc<K>,
    clock: SharedClock,
    store: Option<Arc<DurableStore>>,
    shutdown_action: Option<ShutdownAction>,
    metrics: Option<Arc<ProcessingMetrics>>,
}

impl<C: RemoteClient, K: Connector> RuntimeBuilder<C, K> {
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `store` instead of opening the one described by the config.
    pub fn with_store(mut self, store: Arc<DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shares `metrics` with the host, so sync hooks can count the tags
    /// they push.
    pub fn with_metrics(mut self, metrics: Arc<ProcessingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replaces what happens when the health failure threshold is reached.
    ///
    /// Default: the runtime stops, which releases [`ConnectorRuntime::wait`].
    pub fn with_shutdown_action(mut self, action: ShutdownAction) -> Self {
        self.shutdown_action = Some(action);
        self
    }

    /// Opens storage and wires every component. Nothing runs until
    /// [`ConnectorRuntime::start`].
    pub fn build(self) -> Result<ConnectorRuntime<C, K>> {
        let RuntimeBuilder {
            config,
            client,
            connector,
            clock,
            store,
            shutdown_action,
            metrics,
        } = self;

        let store = match store {
            Some(store) => store,
            None => Arc::new(DurableStore::open(&config.store)?),
        };
        let ledger = Arc::new(DeliveryLedger::with_clock(
            store.clone(),
            config.ledger.clone(),
            clock.clone(),
        )?);
        let kv_store = KeyValueStore::open(store.clone())?;

        let acks = Arc::new(AckPublisher::new(ledger.clone(), client.clone()));
        let metrics = metrics.unwrap_or_default();
        let dispatcher = Dispatcher::new(connector.clone(), config.caller_key.clone())
            .with_metrics(metrics.clone());
        let ingestor = Arc::new(WebhookIngestor::new(
            ledger.clone(),
            acks.clone(),
            dispatcher.clone(),
        ));
        let fetch_loop = (config.receive_mode == ReceiveMode::LongPoll).then(|| {
            Arc::new(
                FetchLoop::new(
                    client.clone(),
                    ledger.clone(),
                    acks.clone(),
                    dispatcher,
                    config.fetch.clone(),
                )
                .with_clock(clock.clone()),
            )
        });

        let managed_config = Arc::new(
            ManagedConfigRefresher::new(client.clone(), connector.connector_type())
                .with_clock(clock.clone()),
        );

        let schedules = config.schedules;
        let staleness = config.job_max_staleness;
        let jobs = vec![
            (
                connector_job(&connector, "tag-sync", staleness, |c| async move {
                    c.sync_tags().await
                })
                .with_enabled(config.tag_scan),
                schedules.tags,
            ),
            (
                connector_job(&connector, "tag-sync-slow-loop", staleness, |c| async move {
                    c.sync_tags_slow_loop().await
                })
                .with_enabled(config.tag_scan),
                schedules.tags_slow_loop,
            ),
            (
                connector_job(&connector, "activity-type-sync", staleness, |c| async move {
                    c.sync_activity_types().await
                })
                .with_enabled(config.activity_type_scan),
                schedules.activity_types,
            ),
            (
                connector_job(
                    &connector,
                    "activity-type-sync-slow-loop",
                    staleness,
                    |c| async move { c.sync_activity_types_slow_loop().await },
                )
                .with_enabled(config.activity_type_scan),
                schedules.activity_types_slow_loop,
            ),
            (
                SingleFlightTask::new("managed-config", staleness, {
                    let refresher = managed_config.clone();
                    move || {
                        let refresher = refresher.clone();
                        async move {
                            refresher.refresh().await?;
                            anyhow::Ok(())
                        }
                    }
                }),
                schedules.managed_config,
            ),
        ];
        let jobs: Vec<(Arc<SingleFlightTask>, TaskSchedule)> = jobs
            .into_iter()
            .map(|(task, schedule)| (Arc::new(task.with_clock(clock.clone())), schedule))
            .collect();

        let ack_sweep = Arc::new(
            SingleFlightTask::new("ack-sweep", config.ack_sweep_max_staleness, {
                let acks = acks.clone();
                move || {
                    let acks = acks.clone();
                    async move {
                        acks.sweep().await?;
                        anyhow::Ok(())
                    }
                }
            })
            .with_clock(clock.clone()),
        );

        let halt = CancellationToken::new();
        let server_alive = Arc::new(AtomicBool::new(true));

        let shutdown_action = shutdown_action.unwrap_or_else(|| {
            let halt = halt.clone();
            ShutdownAction::new(move || halt.cancel())
        });
        let mut health = HealthController::new(client.clone())
            .with_threshold(config.health_threshold)
            .with_shutdown_action(shutdown_action)
            .with_connector_check({
                let connector = connector.clone();
                move || connector.check_health()
            });
        if let Some(fetch_loop) = &fetch_loop {
            health.register(fetch_loop.clone());
        }
        health.register(acks.clone());
        health.register(ack_sweep.clone());
        for (task, _) in &jobs {
            health.register(task.clone());
        }
        if config.receive_mode == ReceiveMode::Webhook {
            let alive = server_alive.clone();
            health.register(
                HealthProbe::new("webhook-server", move || alive.load(Ordering::Acquire)).shared(),
            );
        }

        Ok(ConnectorRuntime {
            config,
            connector,
            store,
            ledger,
            kv_store,
            metrics,
            ingestor,
            fetch_loop,
            managed_config,
            jobs,
            ack_sweep,
            health: Arc::new(health),
            halt,
            server_alive,
            webhook_addr: parking_lot::Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Idle),
        })
    }
}

/// A job that calls one of the connector's sync hooks.
fn connector_job<K, F, Fut>(
    connector: &Arc<K>,
    name: &'static str,
    max_staleness: Duration,
    run: F,
) -> SingleFlightTask
where
    K: Connector,
    F: Fn(Arc<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let connector = connector.clone();
    SingleFlightTask::new(name, max_staleness, move || run(connector.clone()))
}

/// Pings the webhook server every `period`, starting now, and records
/// whether it answered.
pub(super) async fn watch_webhook_server(
    port: u16,
    period: Duration,
    alive: Arc<AtomicBool>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period.max(MIN_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let answered = ping_local(port, PING_TIMEOUT).await;
                if !answered && !token.is_cancelled() {
                    warn!(port, "Webhook server did not answer ping");
                }
                alive.store(answered, Ordering::Release);
            }
        }
    }
}

/// A connector with its ledger, transports, periodic jobs and health
/// supervision.
///
/// # Lifecycle
///
/// ```text
/// build ──► Idle ──start──► Running ──stop──► Stopped
/// ```
///
/// A runtime runs at most once. Reaching the health failure threshold stops
/// it unless a different shutdown action was configured.
pub struct ConnectorRuntime<C, K> {
    config: ConnectorConfig,
    connector: Arc<K>,
    store: Arc<DurableStore>,
    ledger: Arc<DeliveryLedger>,
    kv_store: KeyValueStore,
    metrics: Arc<ProcessingMetrics>,
    ingestor: Arc<WebhookIngestor<C, K>>,
    fetch_loop: Option<Arc<FetchLoop<C, K>>>,
    managed_config: Arc<ManagedConfigRefresher<C>>,
    jobs: Vec<(Arc<SingleFlightTask>, TaskSchedule)>,
    ack_sweep: Arc<SingleFlightTask>,
    health: Arc<HealthController<C>>,
    halt: CancellationToken,
    server_alive: Arc<AtomicBool>,
    webhook_addr: parking_lot::Mutex<Option<SocketAddr>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl<C: RemoteClient, K: Connector> ConnectorRuntime<C, K> {
    /// Starts configuring a runtime for `connector`.
    pub fn builder(config: ConnectorConfig, client: Arc<C>, connector: Arc<K>) -> RuntimeBuilder<C, K> {
        RuntimeBuilder {
            config,
            client,
            connector,
            clock: system_clock(),
            store: None,
            shutdown_action: None,
            metrics: None,
        }
    }

    /// Builds a runtime with the system clock and the configured store.
    pub fn new(config: ConnectorConfig, client: Arc<C>, connector: Arc<K>) -> Result<Self> {
        Self::builder(config, client, connector).build()
    }

    /// Spawns the receive transport, the periodic jobs, the acknowledgement
    /// sweep and health supervision.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(RuntimeError::AlreadyStarted);
        }

        let token = self.halt.child_token();
        let mut handles = Vec::new();

        match self.config.receive_mode {
            ReceiveMode::LongPoll => {
                if let Some(fetch_loop) = &self.fetch_loop {
                    handles.push(tokio::spawn(fetch_loop.clone().run(token.clone())));
                }
            }
            ReceiveMode::Webhook => self.serve_webhooks(token.clone(), &mut handles).await?,
            ReceiveMode::Disabled => info!("Receiving posted time is disabled"),
        }

        for (task, schedule) in &self.jobs {
            handles.push(spawn_scheduled(task.clone(), *schedule, token.clone()));
        }
        handles.push(spawn_scheduled(
            self.ack_sweep.clone(),
            self.config.schedules.ack_sweep,
            token.clone(),
        ));
        handles.push(
            self.health
                .clone()
                .spawn(self.config.schedules.health, token.clone()),
        );

        info!(
            receive_mode = ?self.config.receive_mode,
            store = ?self.store.location(),
            tasks = handles.len(),
            "Connector runtime started"
        );
        *lifecycle = Lifecycle::Running { token, handles };
        Ok(())
    }

    async fn serve_webhooks(
        &self,
        token: CancellationToken,
        handles: &mut Vec<JoinHandle<()>>,
    ) -> Result<()> {
        let port = self.config.webhook_port;
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|source| RuntimeError::Bind { port, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| RuntimeError::Bind { port, source })?;
        *self.webhook_addr.lock() = Some(addr);
        info!(%addr, "Webhook server listening");

        let router = self.router();
        let alive = self.server_alive.clone();
        let server_token = token.clone();
        handles.push(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(server_token.clone().cancelled_owned())
                .await;
            if !server_token.is_cancelled() {
                alive.store(false, Ordering::Release);
            }
            match served {
                Ok(()) => info!("Webhook server stopped"),
                Err(e) => error!(error = %e, "Webhook server failed"),
            }
        }));
        handles.push(tokio::spawn(watch_webhook_server(
            addr.port(),
            self.config.schedules.health.period,
            self.server_alive.clone(),
            token,
        )));
        Ok(())
    }

    /// Cancels every task, waits for them to finish and calls
    /// [`Connector::shutdown`]. Safe to call more than once.
    pub async fn stop(&self) {
        self.halt.cancel();
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);
        if let Lifecycle::Running { token, handles } = previous {
            info!("Stopping connector runtime");
            token.cancel();
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Task ended abnormally during shutdown");
                }
            }
            self.connector.shutdown();
            info!("Connector runtime stopped");
        }
    }

    /// Waits until the runtime is told to stop, then finishes stopping it.
    pub async fn wait(&self) {
        self.halt.cancelled().await;
        self.stop().await;
    }

    /// Evaluates health now without reporting it.
    pub fn is_healthy(&self) -> bool {
        self.health.evaluate().is_ok()
    }

    /// The webhook endpoints, for hosts that serve them themselves.
    pub fn router(&self) -> axum::Router {
        build_router(AppState::new(self.ingestor.clone()))
    }

    /// Where the webhook server is listening, once started in webhook mode.
    pub fn webhook_addr(&self) -> Option<SocketAddr> {
        *self.webhook_addr.lock()
    }

    /// Key/value storage for the integration's own state.
    pub fn kv_store(&self) -> &KeyValueStore {
        &self.kv_store
    }

    /// Totals of processed time groups and reported tags.
    pub fn metrics(&self) -> &Arc<ProcessingMetrics> {
        &self.metrics
    }

    pub fn ledger(&self) -> &Arc<DeliveryLedger> {
        &self.ledger
    }

    pub fn store_location(&self) -> &StoreLocation {
        self.store.location()
    }

    /// The managed configuration fetched most recently.
    pub fn managed_config(&self) -> Option<ManagedConfig> {
        self.managed_config.current()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }
}
