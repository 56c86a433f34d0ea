//! Connection pool behaviour against the in-memory executor: backoff timing,
//! health-check-then-reconnect, device-class timeouts and per-target
//! serialization.

use std::sync::Arc;
use std::time::Duration;

use labcheck_core::fakes::{FakeExecutor, FakeReply};
use labcheck_core::{ConnectionPool, DeviceClass, PoolConfig, PoolError, TargetSpec};
use tokio::time::Instant;

fn pool(exec: &FakeExecutor) -> ConnectionPool {
    ConnectionPool::new(Arc::new(exec.clone()), PoolConfig::default())
}

#[tokio::test(start_paused = true)]
async fn unreachable_target_fails_after_exactly_six_seconds() {
    let exec = FakeExecutor::new();
    exec.host("servera").set_unreachable(true);
    let pool = pool(&exec);

    let start = Instant::now();
    let err = pool.acquire(&TargetSpec::new("servera")).await.unwrap_err();

    assert_eq!(start.elapsed(), Duration::from_secs(6));
    match err {
        PoolError::Connectivity { target, attempts, .. } => {
            assert_eq!(target, "servera");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected connectivity error, got {other:?}"),
    }
    assert_eq!(exec.host("servera").connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_connect_failure_recovers_after_first_backoff() {
    let exec = FakeExecutor::new();
    exec.host("servera").fail_connects(1);
    let pool = pool(&exec);

    let start = Instant::now();
    let conn = pool.acquire(&TargetSpec::new("servera")).await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(conn.device_class(), DeviceClass::Linux);
    assert_eq!(exec.host("servera").connect_attempts(), 2);
}

#[tokio::test]
async fn pooled_session_is_health_checked_and_reused() {
    let exec = FakeExecutor::new();
    let pool = pool(&exec);
    let target = TargetSpec::new("servera");

    pool.acquire(&target).await.unwrap();
    pool.acquire(&target).await.unwrap();

    assert_eq!(exec.host("servera").connect_attempts(), 1);
    assert_eq!(exec.count("servera", "true"), 1);
    assert_eq!(pool.pooled_targets().await, vec!["servera"]);
}

#[tokio::test]
async fn failed_health_check_triggers_one_reconnect() {
    let exec = FakeExecutor::new();
    let pool = pool(&exec);
    let target = TargetSpec::new("servera");

    pool.acquire(&target).await.unwrap();
    exec.host("servera").fail_health_checks(1);
    pool.acquire(&target).await.unwrap();

    assert_eq!(exec.host("servera").connect_attempts(), 2);
    // Pooled check failed, fresh session's check passed.
    assert_eq!(exec.count("servera", "true"), 2);
    // Class is kept across the reconnect.
    assert_eq!(exec.count("servera", "uname -s"), 1);
}

#[tokio::test]
async fn failed_reconnect_evicts_and_acquires_fresh() {
    let exec = FakeExecutor::new();
    let pool = pool(&exec);
    let target = TargetSpec::new("servera");

    pool.acquire(&target).await.unwrap();
    exec.host("servera").fail_health_checks(2);
    let conn = pool.acquire(&target).await.unwrap();

    assert_eq!(conn.device_class(), DeviceClass::Linux);
    assert_eq!(exec.host("servera").connect_attempts(), 3);
    assert_eq!(exec.count("servera", "uname -s"), 2);
}

#[tokio::test]
async fn lost_session_is_evicted_and_reported_as_connectivity() {
    let exec = FakeExecutor::new();
    let pool = pool(&exec);
    let conn = pool.acquire(&TargetSpec::new("servera")).await.unwrap();

    exec.host("servera").break_sessions();
    let err = pool
        .run(&conn, "hostname", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(err.is_connectivity());
    assert!(pool.pooled_targets().await.is_empty());

    // The next acquisition opens a fresh session.
    let out = pool
        .run_on(&TargetSpec::new("servera"), "hostname", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(out.success());
}

#[tokio::test(start_paused = true)]
async fn timed_out_command_retries_once_at_double_scaled_timeout() {
    let exec = FakeExecutor::new();
    exec.host("r1").on(|cmd| match cmd {
        "show tech-support" => FakeReply::Hang,
        _ => FakeReply::ok(""),
    });
    let pool = pool(&exec);
    let target = TargetSpec::new("r1").with_class(DeviceClass::Cisco);

    let start = Instant::now();
    let err = pool
        .run_on(&target, "show tech-support", Duration::from_secs(10))
        .await
        .unwrap_err();

    // 10s x 2.0 = 20s, then one retry at 40s.
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    match err {
        PoolError::CommandTimeout { timeout_ms, command, .. } => {
            assert_eq!(timeout_ms, 40_000);
            assert_eq!(command, "show tech-support");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(exec.count("r1", "show tech-support"), 2);
}

#[tokio::test]
async fn undeclared_class_is_negotiated_from_banner() {
    let exec = FakeExecutor::new();
    exec.host("vsrx").on(|cmd| match cmd {
        "uname -s" => FakeReply::fail(127, "unknown command"),
        "show version" => FakeReply::ok("Hostname: vsrx\nModel: vsrx\nJunos: 21.2R3\n"),
        _ => FakeReply::ok(""),
    });
    let pool = pool(&exec);

    let conn = pool.acquire(&TargetSpec::new("vsrx")).await.unwrap();
    assert_eq!(conn.device_class(), DeviceClass::Juniper);
    assert_eq!(conn.timeout_multiplier(), 2.5);
}

#[tokio::test(start_paused = true)]
async fn commands_on_one_target_never_interleave() {
    let exec = FakeExecutor::new();
    exec.host("servera").with_latency(Duration::from_millis(100));
    exec.host("serverb").with_latency(Duration::from_millis(100));
    let pool = Arc::new(pool(&exec));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let pool = Arc::clone(&pool);
        let host = if i % 2 == 0 { "servera" } else { "serverb" };
        tasks.push(tokio::spawn(async move {
            pool.run_on(&TargetSpec::new(host), &format!("step {i}"), Duration::from_secs(5))
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().success());
    }

    assert_eq!(exec.host("servera").max_in_flight(), 1);
    assert_eq!(exec.host("serverb").max_in_flight(), 1);
    assert_eq!(exec.host("servera").connect_attempts(), 1);
}

#[tokio::test]
async fn evict_all_drops_every_session() {
    let exec = FakeExecutor::new();
    let pool = pool(&exec);
    pool.acquire(&TargetSpec::new("servera")).await.unwrap();
    pool.acquire(&TargetSpec::new("serverb")).await.unwrap();
    assert_eq!(pool.pooled_targets().await, vec!["servera", "serverb"]);

    pool.evict_all().await;
    assert!(pool.pooled_targets().await.is_empty());
}
