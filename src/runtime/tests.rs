//! End-to-end tests for the runtime: transports, the ledger, acknowledgements
//! and health supervision wired together.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::connector_runtime::watch_webhook_server;
use super::{ConnectorRuntime, RuntimeError};
use crate::clock::ManualClock;
use crate::config::{ConnectorConfig, JobSchedules, ReceiveMode};
use crate::connector::Connector;
use crate::health::ShutdownAction;
use crate::ingest::EventProcessor;
use crate::ledger::{DeliveryStatus, LedgerConfig};
use crate::remote::{HealthFailure, ManagedConfig, WireStatus};
use crate::scheduler::TaskSchedule;
use crate::store::{DurableStore, StoreConfig, StoreError, StoreLocation};
use crate::test_utils::{FakeRemote, RecordingProcessor};
use crate::types::{Outcome, TimeGroup, TimeGroupId};

// ─── Test Helpers ───

struct TestConnector {
    processor: RecordingProcessor,
    tag_syncs: AtomicUsize,
    activity_type_syncs: AtomicUsize,
    tag_sync_delay_ms: AtomicU64,
    tag_sync_after_shutdown: AtomicBool,
    healthy: AtomicBool,
    shutdowns: AtomicUsize,
}

impl TestConnector {
    fn new(processor: RecordingProcessor) -> Self {
        TestConnector {
            processor,
            tag_syncs: AtomicUsize::new(0),
            activity_type_syncs: AtomicUsize::new(0),
            tag_sync_delay_ms: AtomicU64::new(0),
            tag_sync_after_shutdown: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            shutdowns: AtomicUsize::new(0),
        }
    }

    fn succeeding() -> Arc<Self> {
        Arc::new(Self::new(RecordingProcessor::returning(Outcome::Success)))
    }
}

impl EventProcessor for TestConnector {
    fn process(&self, time_group: &TimeGroup) -> anyhow::Result<Outcome> {
        self.processor.process(time_group)
    }
}

impl Connector for TestConnector {
    fn connector_type(&self) -> &str {
        "test-connector"
    }

    async fn sync_tags(&self) -> anyhow::Result<()> {
        self.tag_syncs.fetch_add(1, Ordering::SeqCst);
        let delay = self.tag_sync_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.shutdowns.load(Ordering::SeqCst) > 0 {
            self.tag_sync_after_shutdown.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn sync_activity_types(&self) -> anyhow::Result<()> {
        self.activity_type_syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_health(&self) -> Result<(), HealthFailure> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HealthFailure::new("integration database unreachable"))
        }
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

fn quick(period_ms: u64) -> TaskSchedule {
    TaskSchedule::new(Duration::from_millis(5), Duration::from_millis(period_ms))
}

/// Fast schedules, no acknowledgement grace, health ticks rare enough not
/// to interfere unless a test asks for them.
fn fast_config(mode: ReceiveMode) -> ConnectorConfig {
    ConnectorConfig {
        receive_mode: mode,
        ledger: LedgerConfig::new(),
        schedules: JobSchedules {
            tags: quick(20),
            tags_slow_loop: quick(20),
            activity_types: quick(20),
            activity_types_slow_loop: quick(20),
            managed_config: quick(20),
            ack_sweep: quick(20),
            health: TaskSchedule::from_secs(3600, 3600),
        },
        webhook_port: 0,
        ..ConnectorConfig::new()
    }
}

fn in_memory() -> Arc<DurableStore> {
    Arc::new(DurableStore::open_in_memory().unwrap())
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn id(s: &str) -> TimeGroupId {
    TimeGroupId::new(s)
}

// ─── Long-poll scenarios ───

#[tokio::test]
async fn stale_claim_is_reprocessed_after_restart() {
    let clock = Arc::new(ManualClock::starting_now());
    let remote = Arc::new(FakeRemote::new());
    let connector = TestConnector::succeeding();
    let runtime = ConnectorRuntime::builder(
        fast_config(ReceiveMode::LongPoll),
        remote.clone(),
        connector.clone(),
    )
    .with_clock(clock.clone())
    .with_store(in_memory())
    .build()
    .unwrap();

    // A previous process claimed tg-1 and died six minutes ago.
    runtime
        .ledger()
        .upsert(&id("tg-1"), DeliveryStatus::InProgress, "")
        .unwrap();
    clock.advance(Duration::from_secs(6 * 60));
    remote.push_batch(vec![TimeGroup::new("tg-1")]);

    runtime.start().await.unwrap();
    wait_until("tg-1 to be acknowledged", || {
        runtime.ledger().raw_status(&id("tg-1")).unwrap() == Some(DeliveryStatus::SuccessSent)
    })
    .await;
    runtime.stop().await;

    assert_eq!(connector.processor.seen(), vec![id("tg-1")]);
    // The immediate send and a sweep may both report it before either marks
    // the row; the remote source tolerates duplicates.
    let acks = remote.acknowledgements();
    assert!(!acks.is_empty());
    assert!(
        acks.iter()
            .all(|a| a.time_group_id == id("tg-1") && a.status == WireStatus::Success)
    );
}

#[tokio::test]
async fn live_claim_is_not_reprocessed() {
    let clock = Arc::new(ManualClock::starting_now());
    let remote = Arc::new(FakeRemote::new());
    let connector = TestConnector::succeeding();
    let runtime = ConnectorRuntime::builder(
        fast_config(ReceiveMode::LongPoll),
        remote.clone(),
        connector.clone(),
    )
    .with_clock(clock.clone())
    .with_store(in_memory())
    .build()
    .unwrap();

    runtime
        .ledger()
        .upsert(&id("tg-1"), DeliveryStatus::InProgress, "")
        .unwrap();
    clock.advance(Duration::from_secs(2 * 60));
    remote.push_batch(vec![TimeGroup::new("tg-1")]);

    runtime.start().await.unwrap();
    // The second fetch only starts once the first batch is done.
    wait_until("the batch to be handled", || remote.fetches() >= 2).await;
    runtime.stop().await;

    assert_eq!(connector.processor.calls(), 0);
    assert_eq!(
        runtime.ledger().raw_status(&id("tg-1")).unwrap(),
        Some(DeliveryStatus::InProgress)
    );
}

#[tokio::test]
async fn failed_acknowledgement_is_resent_by_the_sweep() {
    let remote = Arc::new(FakeRemote::new());
    let connector = TestConnector::succeeding();
    let runtime = ConnectorRuntime::builder(
        fast_config(ReceiveMode::LongPoll),
        remote.clone(),
        connector.clone(),
    )
    .with_store(in_memory())
    .build()
    .unwrap();

    remote.fail_acknowledgements(true);
    remote.push_batch(vec![TimeGroup::new("tg-2")]);
    runtime.start().await.unwrap();

    wait_until("tg-2 to be processed", || {
        runtime.ledger().raw_status(&id("tg-2")).unwrap() == Some(DeliveryStatus::Success)
    })
    .await;
    // Give the sweep a few failing rounds.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        runtime.ledger().raw_status(&id("tg-2")).unwrap(),
        Some(DeliveryStatus::Success)
    );

    remote.fail_acknowledgements(false);
    wait_until("tg-2 to be acknowledged", || {
        runtime.ledger().raw_status(&id("tg-2")).unwrap() == Some(DeliveryStatus::SuccessSent)
    })
    .await;
    runtime.stop().await;

    assert_eq!(connector.processor.calls(), 1);
    let acks = remote.acknowledgements();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].status, WireStatus::Success);
}

#[tokio::test]
async fn redelivered_batch_is_processed_once() {
    let remote = Arc::new(FakeRemote::new());
    let connector = TestConnector::succeeding();
    let runtime = ConnectorRuntime::builder(
        fast_config(ReceiveMode::LongPoll),
        remote.clone(),
        connector.clone(),
    )
    .with_store(in_memory())
    .build()
    .unwrap();

    remote.push_batch(vec![TimeGroup::new("tg-1"), TimeGroup::new("tg-2")]);
    remote.push_batch(vec![TimeGroup::new("tg-2"), TimeGroup::new("tg-3")]);
    runtime.start().await.unwrap();

    wait_until("both batches to be handled", || remote.fetches() >= 3).await;
    runtime.stop().await;

    assert_eq!(
        connector.processor.seen(),
        vec![id("tg-1"), id("tg-2"), id("tg-3")]
    );
}

// ─── Jobs ───

#[tokio::test]
async fn sync_jobs_and_managed_config_run() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_managed_config(ManagedConfig {
        expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(6)),
        settings: serde_json::Map::new(),
    });
    let connector = TestConnector::succeeding();
    let runtime = ConnectorRuntime::builder(
        fast_config(ReceiveMode::Disabled),
        remote.clone(),
        connector.clone(),
    )
    .with_store(in_memory())
    .build()
    .unwrap();

    runtime.start().await.unwrap();
    wait_until("sync jobs to run", || {
        connector.tag_syncs.load(Ordering::SeqCst) >= 2
            && connector.activity_type_syncs.load(Ordering::SeqCst) >= 2
    })
    .await;
    wait_until("managed config", || runtime.managed_config().is_some()).await;
    runtime.stop().await;

    // Fetched once; six hours of validity is well clear of renewal.
    assert_eq!(remote.config_fetches(), 1);
    assert_eq!(remote.fetches(), 0);
}

#[tokio::test]
async fn disabled_scans_never_run() {
    let remote = Arc::new(FakeRemote::new());
    let connector = TestConnector::succeeding();
    let config = ConnectorConfig {
        tag_scan: false,
        activity_type_scan: false,
        ..fast_config(ReceiveMode::Disabled)
    };
    let runtime = ConnectorRuntime::builder(config, remote, connector.clone())
        .with_store(in_memory())
        .build()
        .unwrap();

    runtime.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    runtime.stop().await;

    assert_eq!(connector.tag_syncs.load(Ordering::SeqCst), 0);
    assert_eq!(connector.activity_type_syncs.load(Ordering::SeqCst), 0);
    assert!(runtime.is_healthy());
}

// ─── Lifecycle ───

#[tokio::test]
async fn second_start_is_refused() {
    let runtime = ConnectorRuntime::builder(
        fast_config(ReceiveMode::Disabled),
        Arc::new(FakeRemote::new()),
        TestConnector::succeeding(),
    )
    .with_store(in_memory())
    .build()
    .unwrap();

    runtime.start().await.unwrap();
    assert!(matches!(
        runtime.start().await,
        Err(RuntimeError::AlreadyStarted)
    ));
    runtime.stop().await;
    assert!(matches!(
        runtime.start().await,
        Err(RuntimeError::AlreadyStarted)
    ));
}

#[tokio::test]
async fn stop_shuts_the_connector_down_once() {
    let connector = TestConnector::succeeding();
    let runtime = Arc::new(
        ConnectorRuntime::builder(
            fast_config(ReceiveMode::LongPoll),
            Arc::new(FakeRemote::new()),
            connector.clone(),
        )
        .with_store(in_memory())
        .build()
        .unwrap(),
    );

    runtime.start().await.unwrap();
    let waiter = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.wait().await }
    });

    runtime.stop().await;
    runtime.stop().await;
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(connector.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_waits_out_running_sync_before_connector_shutdown() {
    let connector = TestConnector::succeeding();
    connector.tag_sync_delay_ms.store(300, Ordering::SeqCst);
    let runtime = ConnectorRuntime::builder(
        fast_config(ReceiveMode::Disabled),
        Arc::new(FakeRemote::new()),
        connector.clone(),
    )
    .with_store(in_memory())
    .build()
    .unwrap();

    runtime.start().await.unwrap();
    wait_until("a tag sync to start", || {
        connector.tag_syncs.load(Ordering::SeqCst) >= 1
    })
    .await;
    runtime.stop().await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(connector.shutdowns.load(Ordering::SeqCst), 1);
    assert!(!connector.tag_sync_after_shutdown.load(Ordering::SeqCst));
}

#[tokio::test]
async fn repeated_unhealthy_ticks_stop_the_runtime() {
    let remote = Arc::new(FakeRemote::new());
    let connector = TestConnector::succeeding();
    connector.healthy.store(false, Ordering::SeqCst);
    let mut config = fast_config(ReceiveMode::Disabled);
    config.schedules.health = quick(20);
    let runtime = ConnectorRuntime::builder(config, remote.clone(), connector.clone())
        .with_store(in_memory())
        .build()
        .unwrap();

    assert!(!runtime.is_healthy());
    runtime.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), runtime.wait())
        .await
        .unwrap();

    assert_eq!(connector.shutdowns.load(Ordering::SeqCst), 1);
    let failures = remote.health_failures();
    assert!(failures.len() >= 3);
    assert_eq!(failures[0].message, "integration database unreachable");
}

#[tokio::test]
async fn custom_shutdown_action_replaces_stopping() {
    let remote = Arc::new(FakeRemote::new());
    let connector = TestConnector::succeeding();
    connector.healthy.store(false, Ordering::SeqCst);
    let fired = Arc::new(AtomicUsize::new(0));
    let mut config = fast_config(ReceiveMode::Disabled);
    config.schedules.health = quick(20);
    config.health_threshold = 2;
    let runtime = ConnectorRuntime::builder(config, remote, connector.clone())
        .with_store(in_memory())
        .with_shutdown_action(ShutdownAction::new({
            let fired = fired.clone();
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .build()
        .unwrap();

    runtime.start().await.unwrap();
    wait_until("the shutdown action", || fired.load(Ordering::SeqCst) >= 1).await;
    runtime.stop().await;

    assert_eq!(connector.shutdowns.load(Ordering::SeqCst), 1);
}

// ─── Storage ───

#[test]
fn persistent_store_required_without_data_dir_is_an_error() {
    let config = ConnectorConfig {
        store: StoreConfig {
            data_dir: None,
            require_persistent: true,
        },
        ..ConnectorConfig::new()
    };

    let result = ConnectorRuntime::new(
        config,
        Arc::new(FakeRemote::new()),
        TestConnector::succeeding(),
    );

    assert!(matches!(
        result,
        Err(RuntimeError::Store(StoreError::PersistentDirRequired))
    ));
}

#[test]
fn ledger_and_key_values_survive_a_restart() {
    let dir = tempdir().unwrap();
    let config = ConnectorConfig {
        store: StoreConfig {
            data_dir: Some(dir.path().to_path_buf()),
            require_persistent: true,
        },
        ..ConnectorConfig::new()
    };

    {
        let runtime = ConnectorRuntime::new(
            config.clone(),
            Arc::new(FakeRemote::new()),
            TestConnector::succeeding(),
        )
        .unwrap();
        assert!(matches!(
            runtime.store_location(),
            StoreLocation::Persistent(_)
        ));
        runtime.kv_store().put_long("tags.cursor", 42).unwrap();
        runtime
            .ledger()
            .upsert(&id("tg-1"), DeliveryStatus::SuccessSent, "")
            .unwrap();
    }

    let reopened = ConnectorRuntime::new(
        config,
        Arc::new(FakeRemote::new()),
        TestConnector::succeeding(),
    )
    .unwrap();
    assert_eq!(reopened.kv_store().get_long("tags.cursor").unwrap(), Some(42));
    assert_eq!(
        reopened.ledger().raw_status(&id("tg-1")).unwrap(),
        Some(DeliveryStatus::SuccessSent)
    );
}

#[test]
fn default_config_sweeps_fresh_results() {
    let runtime = ConnectorRuntime::builder(
        ConnectorConfig::new(),
        Arc::new(FakeRemote::new()),
        TestConnector::succeeding(),
    )
    .with_store(in_memory())
    .build()
    .unwrap();

    runtime
        .ledger()
        .upsert(&id("tg-2"), DeliveryStatus::PermanentFailure, "boom")
        .unwrap();

    let pending = runtime.ledger().pending_acknowledgements().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_id, id("tg-2"));
}

// ─── Webhook mode ───

#[tokio::test]
async fn webhook_router_processes_posted_time() {
    let remote = Arc::new(FakeRemote::new());
    let connector = TestConnector::succeeding();
    let runtime = ConnectorRuntime::builder(
        fast_config(ReceiveMode::Webhook),
        remote.clone(),
        connector.clone(),
    )
    .with_store(in_memory())
    .build()
    .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/receiveTimePostedEvent")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"groupId":"tg-7"}"#))
        .unwrap();
    let response = runtime.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(connector.processor.seen(), vec![id("tg-7")]);
    assert_eq!(runtime.metrics().stats().processed_time_groups, 1);
    wait_until("tg-7 to be acknowledged", || {
        runtime.ledger().raw_status(&id("tg-7")).unwrap() == Some(DeliveryStatus::SuccessSent)
    })
    .await;
}

#[tokio::test]
async fn webhook_server_answers_ping() {
    let runtime = ConnectorRuntime::builder(
        fast_config(ReceiveMode::Webhook),
        Arc::new(FakeRemote::new()),
        TestConnector::succeeding(),
    )
    .with_store(in_memory())
    .build()
    .unwrap();

    runtime.start().await.unwrap();
    let addr = runtime.webhook_addr().unwrap();
    assert_ne!(addr.port(), 0);

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", addr.port()))
        .await
        .unwrap();
    stream
        .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("pong"));
    assert!(runtime.is_healthy());

    runtime.stop().await;
}

#[tokio::test]
async fn webhook_watch_marks_unreachable_server_down() {
    let port = {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let alive = Arc::new(AtomicBool::new(true));
    let token = CancellationToken::new();

    let watch = tokio::spawn(watch_webhook_server(
        port,
        Duration::from_secs(3600),
        alive.clone(),
        token.clone(),
    ));
    wait_until("the ping to fail", || !alive.load(Ordering::SeqCst)).await;

    token.cancel();
    watch.await.unwrap();
}

#[tokio::test]
async fn webhook_server_stays_healthy_while_answering_pings() {
    let mut config = fast_config(ReceiveMode::Webhook);
    config.schedules.health = TaskSchedule::new(Duration::from_secs(3600), Duration::from_millis(20));
    let runtime = ConnectorRuntime::builder(
        config,
        Arc::new(FakeRemote::new()),
        TestConnector::succeeding(),
    )
    .with_store(in_memory())
    .build()
    .unwrap();

    runtime.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(runtime.is_healthy());
    runtime.stop().await;
}
