use super::*;
use crate::health::HeartbeatMetrics;
use crate::maintenance::{EnableRequest, TriggeredBy};
use crate::testing::{id, test_config, FailingMaintenance, TestPool};
use tempfile::TempDir;
use tokio::time::advance;

fn heartbeat() -> HeartbeatMetrics {
    HeartbeatMetrics {
        memory_usage_mb: 64,
        request_count: 10,
        ..HeartbeatMetrics::default()
    }
}

async fn heartbeat_all_but(pool: &TestPool, skip: WorkerId) {
    for worker in pool.orchestrator.live_worker_ids().await {
        if worker != skip {
            pool.orchestrator.on_heartbeat(worker, heartbeat()).await;
        }
    }
}

fn completed(outcome: RollingRestartOutcome) -> RollingRestartReport {
    match outcome {
        RollingRestartOutcome::Completed(report) => report,
        other => panic!("Expected a completed rolling restart, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_rolling_restart_is_sequential() {
    let pool = TestPool::start(test_config(3)).await;
    pool.runtime.set_drain_delay(Duration::from_millis(300));

    let report = completed(pool.watchdog.graceful_rolling_restart("deploy").await);

    assert_eq!(report.restarted, vec![id(1), id(2), id(3)]);
    assert!(report.timed_out.is_empty());
    assert_eq!(pool.runtime.max_down(), 1);
    assert_eq!(pool.runtime.drains(), vec![id(1), id(2), id(3)]);
    for worker in [id(1), id(2), id(3)] {
        assert_eq!(pool.runtime.spawn_count(worker), 2);
    }
    assert!(!pool.watchdog.is_rolling_restart_in_progress());

    let alerts = pool.alerts();
    assert_eq!(
        alerts.first(),
        Some(&Alert::RollingRestartStarted {
            reason: "deploy".to_string(),
            workers: 3,
        })
    );
    assert_eq!(
        alerts.last(),
        Some(&Alert::RollingRestartCompleted {
            reason: "deploy".to_string(),
            restarted: 3,
            timed_out: 0,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_request_is_a_no_op() {
    let pool = TestPool::start(test_config(3)).await;
    pool.runtime.set_drain_delay(Duration::from_millis(300));

    let watchdog = Arc::clone(&pool.watchdog);
    let first = tokio::spawn(async move { watchdog.graceful_rolling_restart("first").await });
    pool.settle().await;

    assert!(pool.watchdog.is_rolling_restart_in_progress());
    let drains_before = pool.runtime.drains();

    assert_eq!(
        pool.watchdog.graceful_rolling_restart("second").await,
        RollingRestartOutcome::AlreadyInProgress
    );
    assert_eq!(pool.runtime.drains(), drains_before);

    let report = completed(first.await.unwrap());
    assert_eq!(report.reason, "first");
    assert_eq!(report.restarted.len(), 3);
    assert_eq!(pool.runtime.drains().len(), 3);

    let started = pool
        .alerts()
        .into_iter()
        .filter(|alert| matches!(alert, Alert::RollingRestartStarted { .. }))
        .count();
    assert_eq!(started, 1);
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_releases_session() {
    let pool = TestPool::start(test_config(3)).await;
    pool.runtime.set_drain_delay(Duration::from_millis(300));
    pool.runtime.ignore_drain(id(2));

    let report = completed(pool.watchdog.graceful_rolling_restart("deploy").await);

    assert_eq!(report.restarted, vec![id(1), id(2), id(3)]);
    assert_eq!(report.timed_out, vec![id(2)]);
    assert_eq!(pool.runtime.kills(), vec![(id(2), true)]);
    assert_eq!(pool.runtime.max_down(), 1);
    assert!(!pool.watchdog.is_rolling_restart_in_progress());
    assert_eq!(pool.orchestrator.live_count().await, 3);

    // The guard is free for the next session
    let again = completed(pool.watchdog.graceful_rolling_restart("again").await);
    assert_eq!(again.restarted.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_worker_gone_before_its_turn_is_skipped() {
    let pool = TestPool::start(test_config(3)).await;
    pool.runtime.set_drain_delay(Duration::from_millis(300));
    // Worker 3 crash loops away while worker 1 drains
    pool.runtime.fail_spawns(id(3), true);

    let watchdog = Arc::clone(&pool.watchdog);
    let session = tokio::spawn(async move { watchdog.graceful_rolling_restart("deploy").await });
    pool.settle().await;

    assert!(pool.runtime.crash(id(3), 1));
    pool.settle().await;
    assert!(!pool.orchestrator.live_worker_ids().await.contains(&id(3)));

    let report = completed(session.await.unwrap());
    assert_eq!(report.restarted, vec![id(1), id(2)]);
    assert_eq!(report.skipped, vec![id(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_kill_respawns_through_normal_path() {
    let pool = TestPool::start(test_config(3)).await;
    pool.runtime.set_drain_delay(Duration::from_millis(300));

    let watchdog = Arc::clone(&pool.watchdog);
    let session = tokio::spawn(async move { watchdog.graceful_rolling_restart("deploy").await });
    pool.settle().await;

    pool.watchdog.force_kill_worker(id(3)).await.unwrap();
    pool.settle().await;
    assert_eq!(pool.runtime.spawn_count(id(3)), 2);

    let report = completed(session.await.unwrap());
    assert_eq!(report.restarted, vec![id(1), id(2), id(3)]);
    assert_eq!(pool.runtime.spawn_count(id(3)), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_kills_silent_worker() {
    let pool = TestPool::start(test_config(3)).await;

    advance(Duration::from_millis(16_000)).await;
    heartbeat_all_but(&pool, id(2)).await;
    let first = pool.watchdog.run_cycle().await;
    assert!(first.unhealthy.is_empty());
    assert!(first.killed.is_empty());

    advance(Duration::from_millis(2_000)).await;
    heartbeat_all_but(&pool, id(2)).await;
    let second = pool.watchdog.run_cycle().await;
    assert_eq!(second.unhealthy, vec![id(2)]);
    assert_eq!(second.killed, vec![id(2)]);
    assert_eq!(second.system_health, HealthStatus::Unhealthy);
    assert!(second.maintenance_escalated);

    pool.settle().await;
    assert_eq!(pool.runtime.kills(), vec![(id(2), true)]);
    assert_eq!(pool.runtime.spawn_count(id(2)), 2);
    assert_eq!(
        pool.health.read().await.status(id(2)),
        Some(HealthStatus::Healthy)
    );

    // Maintenance stays on after health recovers
    let state = pool.maintenance.state().await;
    assert!(state.enabled);
    assert_eq!(state.triggered_by, Some(TriggeredBy::Watchdog));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_survives_failing_maintenance() {
    let maintenance = Arc::new(FailingMaintenance::new());
    let pool = TestPool::start_with_maintenance(test_config(3), maintenance.clone()).await;

    advance(Duration::from_millis(16_000)).await;
    heartbeat_all_but(&pool, id(2)).await;
    pool.watchdog.run_cycle().await;

    advance(Duration::from_millis(2_000)).await;
    heartbeat_all_but(&pool, id(2)).await;
    let report = pool.watchdog.run_cycle().await;

    assert_eq!(report.killed, vec![id(2)]);
    assert_eq!(report.system_health, HealthStatus::Unhealthy);
    assert!(!report.maintenance_escalated);
    assert!(!report.maintenance_auto_disabled);
    assert!(maintenance.enable_calls() >= 1);
    assert_eq!(maintenance.auto_disable_calls(), 2);

    pool.settle().await;
    assert_eq!(pool.runtime.spawn_count(id(2)), 2);
    assert!(!pool
        .alerts()
        .iter()
        .any(|alert| matches!(alert, Alert::MaintenanceActivated { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_periodic_loop_keeps_ticking_after_cycle_errors() {
    let maintenance = Arc::new(FailingMaintenance::new());
    let pool = TestPool::start_with_maintenance(test_config(2), maintenance.clone()).await;
    let handle = pool.watchdog.start();

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(maintenance.auto_disable_calls(), 5);
    assert!(pool.watchdog.is_monitoring());
    assert!(!handle.is_finished());

    pool.watchdog.stop();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_degraded_alert_is_edge_triggered() {
    let pool = TestPool::start(test_config(2)).await;

    pool.orchestrator
        .on_heartbeat(
            id(1),
            HeartbeatMetrics {
                event_loop_lag_ms: 250,
                ..heartbeat()
            },
        )
        .await;

    let report = pool.watchdog.run_cycle().await;
    assert_eq!(report.system_health, HealthStatus::Degraded);
    assert!(!report.maintenance_escalated);
    pool.watchdog.run_cycle().await;

    let degraded: Vec<Alert> = pool
        .alerts()
        .into_iter()
        .filter(|alert| matches!(alert, Alert::SystemHealthDegraded { .. }))
        .collect();
    assert_eq!(
        degraded,
        vec![Alert::SystemHealthDegraded {
            status: HealthStatus::Degraded,
            unhealthy: Vec::new(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cycle_polls_auto_disable() {
    let pool = TestPool::start(test_config(1)).await;
    pool.maintenance
        .enable(EnableRequest::admin("expired", Some(0)))
        .await
        .unwrap();

    assert!(pool.watchdog.run_cycle().await.maintenance_auto_disabled);
    assert!(!pool.watchdog.run_cycle().await.maintenance_auto_disabled);
    assert!(!pool.maintenance.state().await.enabled);
}

#[tokio::test(start_paused = true)]
async fn test_manual_restart_and_kill() {
    let pool = TestPool::start(test_config(2)).await;
    pool.runtime.set_drain_delay(Duration::from_millis(100));

    assert_eq!(
        pool.watchdog.restart_worker(id(1)).await.unwrap(),
        DrainOutcome::Exited
    );
    pool.settle().await;
    assert_eq!(pool.runtime.spawn_count(id(1)), 2);

    pool.watchdog.force_kill_worker(id(2)).await.unwrap();
    pool.settle().await;
    assert_eq!(pool.runtime.spawn_count(id(2)), 2);

    assert!(matches!(
        pool.watchdog.restart_worker(id(7)).await,
        Err(VigilError::WorkerNotFound(_))
    ));
    assert!(matches!(
        pool.watchdog.force_kill_worker(id(7)).await,
        Err(VigilError::WorkerNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_get_status() {
    let pool = TestPool::start(test_config(2)).await;
    pool.orchestrator.on_heartbeat(id(1), heartbeat()).await;

    let status = pool.watchdog.get_status().await;
    assert!(!status.monitoring);
    assert!(!status.rolling_restart_in_progress);
    assert!(!status.maintenance_enabled);
    assert_eq!(status.system_health, HealthStatus::Healthy);
    assert_eq!(status.workers.len(), 2);
    assert_eq!(status.workers[0].health.id, id(1));
    assert_eq!(status.workers[0].health.metrics.memory_usage_mb, 64);
    assert_eq!(status.workers[0].state, Some(WorkerState::Running));
    assert!(status.workers[1].pid.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_status_file_written_each_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("status.json");

    let pool = TestPool::start(test_config(2)).await;
    let watchdog = Watchdog::new(
        Arc::new(test_config(2)),
        Arc::clone(&pool.orchestrator),
        pool.maintenance.clone(),
        Alerter::new(),
    )
    .with_status_file(&path);

    watchdog.run_cycle().await;

    let status: WatchdogStatus = JsonStore::new(&path).load().unwrap().unwrap();
    assert_eq!(status.workers.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_loop_runs_until_stopped() {
    let pool = TestPool::start(test_config(2)).await;
    let handle = pool.watchdog.start();
    assert!(pool.watchdog.is_monitoring());

    // Nobody heartbeats: two cycles past the timeout kill the whole pool
    tokio::time::sleep(Duration::from_millis(20_000)).await;
    pool.settle().await;
    assert!(pool.runtime.kills().len() >= 2);

    pool.watchdog.stop();
    handle.await.unwrap();
    assert!(!pool.watchdog.is_monitoring());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_refuses_new_sessions() {
    let pool = TestPool::start(test_config(3)).await;
    pool.runtime.set_drain_delay(Duration::from_millis(100));

    pool.watchdog.shutdown().await;

    assert_eq!(pool.orchestrator.live_count().await, 0);
    assert_eq!(
        pool.watchdog.graceful_rolling_restart("late").await,
        RollingRestartOutcome::ShuttingDown
    );
    assert!(matches!(
        pool.watchdog.restart_worker(id(1)).await,
        Err(VigilError::ShuttingDown)
    ));
}
