mod common;

use std::time::Duration;

use tokio::time::Instant;

use common::{Harness, PORT, drain, expect_event};
use procvisor::{EventKind, Phase, ProbeOutcome, RuntimeError, StartError};

#[tokio::test(start_paused = true)]
async fn start_resolves_on_marker_and_health_follows() {
    let mut h = Harness::new(|_| {});
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;
    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Healthy);
    assert_eq!(status.pid, Some(child.pid));
    assert_eq!(status.restart_count, 0);
    assert!(status.is_healthy);
    assert!(status.last_healthy_at.is_none());

    let spawned = expect_event(&mut events, EventKind::ProcessSpawned).await;
    assert_eq!(spawned.pid, Some(child.pid));
    expect_event(&mut events, EventKind::StartupSucceeded).await;

    // grace is 5s
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.probe.calls(), 1);
    let status = h.sup.status().await.unwrap();
    assert!(status.is_healthy);
    assert!(status.last_healthy_at.is_some());
    assert!(!drain(&mut events).contains(&EventKind::HealthRestored));
}

#[tokio::test(start_paused = true)]
async fn restart_budget_is_bounded() {
    let mut h = Harness::new(|cfg| {
        cfg.max_restarts = 2;
        cfg.health_grace = Duration::from_secs(3600);
    });
    let mut events = h.sup.subscribe();

    let mut child = h.start_ready().await;
    for expected in 1..=2 {
        child.exit(1);
        let scheduled = expect_event(&mut events, EventKind::RestartScheduled).await;
        assert_eq!(scheduled.restart_count, Some(expected));
        assert_eq!(scheduled.delay_ms, Some(3000));
        assert_eq!(scheduled.reason.as_deref(), Some("exit code 1"));

        child = h.next_child().await;
        child.ready();
        let restarted = expect_event(&mut events, EventKind::ServerRestarted).await;
        assert_eq!(restarted.restart_count, Some(expected));
    }

    child.exit(1);
    let fatal = expect_event(&mut events, EventKind::MaxRestartsReached).await;
    assert_eq!(fatal.restart_count, Some(2));

    match h.sup.wait_fatal().await {
        RuntimeError::MaxRestartsReached { max, reason } => {
            assert_eq!(max, 2);
            assert_eq!(reason, "exit code 1");
        }
        other => panic!("unexpected {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.no_new_child());
    assert_eq!(h.spawner.spawned(), 3);
    assert_eq!(h.spawner.max_live(), 1);

    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Fatal);
    assert_eq!(status.pid, None);
    assert_eq!(h.sup.start().await, Err(StartError::Fatal));
}

#[tokio::test(start_paused = true)]
async fn passing_health_checks_between_crashes_do_not_lift_the_bound() {
    let mut h = Harness::new(|cfg| cfg.max_restarts = 2);
    let mut events = h.sup.subscribe();
    let mut history = h.sup.subscribe();

    let mut child = h.start_ready().await;
    for expected in 1..=2 {
        tokio::time::sleep(Duration::from_secs(6)).await;
        child.exit(1);
        let scheduled = expect_event(&mut events, EventKind::RestartScheduled).await;
        assert_eq!(scheduled.restart_count, Some(expected));

        child = h.next_child().await;
        child.ready();
        expect_event(&mut events, EventKind::ServerRestarted).await;
        assert_eq!(h.sup.status().await.unwrap().restart_count, expected);
    }

    tokio::time::sleep(Duration::from_secs(6)).await;
    child.exit(1);
    let fatal = expect_event(&mut events, EventKind::MaxRestartsReached).await;
    assert_eq!(fatal.restart_count, Some(2));

    assert_eq!(h.probe.calls(), 3);
    assert!(!drain(&mut history).contains(&EventKind::HealthRestored));
    assert_eq!(h.spawner.spawned(), 3);
    assert_eq!(h.sup.status().await.unwrap().phase, Phase::Fatal);
}

#[tokio::test(start_paused = true)]
async fn startup_timeout_rejects_start() {
    let mut h = Harness::new(|cfg| cfg.startup_timeout = Duration::from_secs(5));

    let t0 = Instant::now();
    let start = h.start();
    let child = h.next_child().await;

    let err = start.await.unwrap().unwrap_err();
    let elapsed = t0.elapsed();
    assert!(err.is_timeout());
    assert_eq!(
        err,
        StartError::Timeout {
            timeout: Duration::from_secs(5)
        }
    );
    assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(5100), "{elapsed:?}");

    assert!(child.was_terminated());
    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(status.restart_count, 0);
}

#[tokio::test(start_paused = true)]
async fn recurring_errors_trigger_crash_without_exit() {
    let mut h = Harness::new(|_| {});
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;
    for _ in 0..3 {
        child.stdout("Error: consul agent unreachable");
    }

    let crash = expect_event(&mut events, EventKind::CrashDetected).await;
    assert_eq!(crash.reason.as_deref(), Some("multiple recurring errors"));
    assert_eq!(crash.restart_count, Some(0));

    let scheduled = expect_event(&mut events, EventKind::RestartScheduled).await;
    assert_eq!(scheduled.restart_count, Some(1));
    let next = h.next_child().await;
    assert!(child.was_terminated());
    assert_ne!(next.pid, child.pid);
}

#[tokio::test(start_paused = true)]
async fn clean_line_resets_recurring_counter() {
    let mut h = Harness::new(|_| {});
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;
    child.stdout("Error: consul agent unreachable");
    child.stdout("Error: consul agent unreachable");
    child.stdout("GET /api/items 200");
    child.stdout("error talking to Consul");
    child.stdout("ERROR consul timeout");

    let status = h.sup.status().await.unwrap();
    assert_eq!(status.recurring_error_count, 2);
    assert_eq!(status.phase, Phase::Healthy);
    assert!(!drain(&mut events).contains(&EventKind::CrashDetected));
}

#[tokio::test(start_paused = true)]
async fn ready_restart_keeps_count_across_passing_checks() {
    let mut h = Harness::new(|_| {});
    let mut events = h.sup.subscribe();

    let first = h.start_ready().await;
    first.exit(1);

    let _second = {
        let child = h.next_child().await;
        child.ready();
        child
    };
    expect_event(&mut events, EventKind::ServerRestarted).await;
    let status = h.sup.status().await.unwrap();
    assert_eq!(status.restart_count, 1);
    assert!(status.is_healthy);

    // probes at 5s, 15s and 25s after the restart
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.probe.calls(), 3);
    let status = h.sup.status().await.unwrap();
    assert_eq!(status.restart_count, 1);
    assert!(status.is_healthy);
    assert!(!drain(&mut events).contains(&EventKind::HealthRestored));
    assert_eq!(h.spawner.spawned(), 2);
}

#[tokio::test(start_paused = true)]
async fn passing_check_after_failed_restart_resets_count() {
    let mut h = Harness::new(|cfg| cfg.startup_timeout = Duration::from_secs(5));
    let mut events = h.sup.subscribe();

    let a = h.start_ready().await;
    a.exit(1);

    let b = h.next_child().await;
    let failed = expect_event(&mut events, EventKind::RestartFailed).await;
    assert_eq!(failed.restart_count, Some(1));
    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Crashed);
    assert_eq!(status.restart_count, 1);
    assert!(!status.is_healthy);

    let restored = expect_event(&mut events, EventKind::HealthRestored).await;
    assert_eq!(restored.restart_count, Some(1));
    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Healthy);
    assert_eq!(status.restart_count, 0);
    assert!(status.is_healthy);
    assert_eq!(status.pid, Some(b.pid));

    let kinds = drain(&mut events);
    assert!(!kinds.contains(&EventKind::RestartScheduled));
    assert!(b.is_alive());
    assert_eq!(h.spawner.spawned(), 2);
}

#[tokio::test(start_paused = true)]
async fn port_in_use_during_startup_fails_fast() {
    let mut h = Harness::new(|_| {});

    let t0 = Instant::now();
    let start = h.start();
    let child = h.next_child().await;
    child.stderr("Error: listen EADDRINUSE: address already in use :::3001");

    let err = start.await.unwrap().unwrap_err();
    assert_eq!(err, StartError::PortInUse { port: PORT });
    assert!(t0.elapsed() < Duration::from_secs(1));

    let status = h.sup.status().await.unwrap();
    assert_eq!(status.restart_count, 0);
    assert_eq!(status.phase, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn port_in_use_after_startup_is_only_logged() {
    let mut h = Harness::new(|_| {});
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;
    child.stderr("EADDRINUSE");

    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Healthy);
    assert!(child.is_alive());
    assert!(!drain(&mut events).contains(&EventKind::CrashDetected));
}

#[tokio::test(start_paused = true)]
async fn missing_module_is_fatal_without_restart() {
    let mut h = Harness::new(|_| {});
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;
    child.stderr("Error: Cannot find module 'express'");

    let fatal = expect_event(&mut events, EventKind::FatalError).await;
    assert_eq!(
        fatal.reason.as_deref(),
        Some("Error: Cannot find module 'express'")
    );
    match h.sup.wait_fatal().await {
        RuntimeError::Unrecoverable { reason } => {
            assert_eq!(reason, "Error: Cannot find module 'express'");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(child.was_terminated());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.no_new_child());
    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Fatal);
    assert_eq!(status.restart_count, 0);
    assert!(!drain(&mut events).contains(&EventKind::RestartScheduled));
}

#[tokio::test(start_paused = true)]
async fn missing_module_during_startup_rejects_start() {
    let mut h = Harness::new(|_| {});

    let start = h.start();
    let child = h.next_child().await;
    child.stderr("Error: Cannot find module './routes'");

    let err = start.await.unwrap().unwrap_err();
    assert_eq!(err.as_label(), "start_unrecoverable");
    assert!(child.was_terminated());
    assert_eq!(h.sup.status().await.unwrap().phase, Phase::Fatal);
    assert_eq!(h.sup.start().await, Err(StartError::Fatal));
}

#[tokio::test(start_paused = true)]
async fn out_of_memory_restarts_without_waiting_for_exit() {
    let mut h = Harness::new(|_| {});
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;
    child.stderr("FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory");

    let crash = expect_event(&mut events, EventKind::CrashDetected).await;
    assert!(crash.reason.as_deref().unwrap().contains("out of memory"));
    let scheduled = expect_event(&mut events, EventKind::RestartScheduled).await;
    assert_eq!(scheduled.restart_count, Some(1));

    let next = h.next_child().await;
    assert!(child.was_terminated());
    assert_ne!(next.pid, child.pid);
}

#[tokio::test(start_paused = true)]
async fn out_of_memory_during_startup_fails_the_attempt() {
    let mut h = Harness::new(|_| {});

    let start = h.start();
    let child = h.next_child().await;
    child.stderr("fatal: out of memory");

    let err = start.await.unwrap().unwrap_err();
    assert!(matches!(err, StartError::Crashed { .. }));
    assert!(child.was_terminated());
    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(status.restart_count, 0);
}

#[tokio::test(start_paused = true)]
async fn clean_exit_is_not_restarted() {
    let mut h = Harness::new(|_| {});
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;
    child.exit(0);

    let exited = expect_event(&mut events, EventKind::ProcessExited).await;
    assert_eq!(exited.exit_code, Some(0));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.no_new_child());
    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Exited);
    assert_eq!(status.restart_count, 0);
    assert!(!drain(&mut events).contains(&EventKind::CrashDetected));
}

#[tokio::test(start_paused = true)]
async fn failed_probe_restarts_service() {
    let mut h = Harness::new(|_| {});
    h.probe.always(ProbeOutcome::Status(503));
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;

    let failed = expect_event(&mut events, EventKind::HealthCheckFailed).await;
    assert_eq!(
        failed.reason.as_deref(),
        Some("health check failed: status 503")
    );
    let crash = expect_event(&mut events, EventKind::CrashDetected).await;
    assert_eq!(crash.reason.as_deref(), Some("health check failure"));
    expect_event(&mut events, EventKind::RestartScheduled).await;

    let next = h.next_child().await;
    assert!(child.was_terminated());
    assert_ne!(next.pid, child.pid);
}

#[tokio::test(start_paused = true)]
async fn stubborn_child_is_killed_after_grace() {
    let mut h = Harness::new(|_| {});
    h.probe.always(ProbeOutcome::TimedOut);
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;
    child.ignore_sigterm();

    expect_event(&mut events, EventKind::CrashDetected).await;
    let crashed_at = Instant::now();
    let _next = h.next_child().await;

    assert!(child.was_terminated());
    assert!(child.was_killed());
    // terminate_grace (1s) + restart delay (3s)
    assert!(crashed_at.elapsed() >= Duration::from_secs(4));
    assert_eq!(h.spawner.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_monitoring() {
    let mut h = Harness::new(|_| {});
    let mut events = h.sup.subscribe();

    let child = h.start_ready().await;
    h.sup.stop().await;

    expect_event(&mut events, EventKind::Stopped).await;
    assert!(child.was_terminated());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.probe.calls(), 0);
    assert!(h.no_new_child());

    let status = h.sup.status().await.unwrap();
    assert_eq!(status.phase, Phase::Stopped);
    assert_eq!(status.pid, None);
    assert!(!status.is_healthy);
}

#[tokio::test(start_paused = true)]
async fn stop_during_startup_rejects_pending_start() {
    let mut h = Harness::new(|_| {});

    let start = h.start();
    let child = h.next_child().await;
    h.sup.stop().await;

    assert_eq!(start.await.unwrap(), Err(StartError::Stopped));
    assert!(child.was_terminated());
}

#[tokio::test(start_paused = true)]
async fn probe_in_flight_during_restart_is_ignored() {
    let mut h = Harness::new(|cfg| cfg.health_grace = Duration::from_secs(1));
    h.probe.slow(Duration::from_secs(2));
    h.probe.push(ProbeOutcome::Status(500));
    let mut events = h.sup.subscribe();

    let _first = h.start_ready().await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.probe.calls(), 1);

    let _second = h.start_ready().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let kinds = drain(&mut events);
    assert!(!kinds.contains(&EventKind::HealthCheckFailed));
    assert!(!kinds.contains(&EventKind::CrashDetected));
    assert_eq!(h.probe.calls(), 2);
    let status = h.sup.status().await.unwrap();
    assert!(status.is_healthy);
    assert!(status.last_healthy_at.is_some());
    assert_eq!(h.spawner.spawned(), 2);
}

#[tokio::test(start_paused = true)]
async fn second_start_supersedes_pending_one() {
    let mut h = Harness::new(|_| {});

    let first = h.start();
    let a = h.next_child().await;
    let second = h.start();
    let b = h.next_child().await;
    b.ready();

    assert_eq!(first.await.unwrap(), Err(StartError::Superseded));
    assert_eq!(second.await.unwrap(), Ok(()));
    assert!(a.was_terminated());
    assert_eq!(h.spawner.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_is_reported_and_recoverable() {
    let mut h = Harness::new(|_| {});
    h.spawner.fail_next();

    let err = h.sup.start().await.unwrap_err();
    assert!(matches!(err, StartError::Spawn { .. }));
    assert_eq!(err.as_label(), "start_spawn_failed");
    assert_eq!(h.sup.status().await.unwrap().phase, Phase::Idle);

    h.start_ready().await;
    assert_eq!(h.sup.status().await.unwrap().phase, Phase::Healthy);
}

#[tokio::test(start_paused = true)]
async fn stray_processes_on_port_are_reaped() {
    let mut h = Harness::new(|_| {});
    h.reaper.set_strays(vec![std::process::id(), 4242]);
    let mut events = h.sup.subscribe();

    h.start_ready().await;

    let reaped = expect_event(&mut events, EventKind::PortReaped).await;
    assert_eq!(reaped.pid, Some(4242));
    assert_eq!(reaped.port, Some(PORT));
    assert_eq!(h.reaper.killed(), vec![4242]);
    assert!(h.reaper.lookups() >= 1);
}

#[tokio::test(start_paused = true)]
async fn failed_restart_is_recovered_by_health_poller() {
    let mut h = Harness::new(|cfg| cfg.startup_timeout = Duration::from_secs(5));
    h.probe.always(ProbeOutcome::Unreachable("connection refused".into()));
    let mut events = h.sup.subscribe();

    let a = h.start_ready().await;
    a.exit(1);

    let b = h.next_child().await;
    let failed = expect_event(&mut events, EventKind::RestartFailed).await;
    assert_eq!(failed.restart_count, Some(1));
    assert_eq!(h.sup.status().await.unwrap().phase, Phase::Crashed);

    let crash = expect_event(&mut events, EventKind::CrashDetected).await;
    assert_eq!(crash.reason.as_deref(), Some("health check failure"));
    let scheduled = expect_event(&mut events, EventKind::RestartScheduled).await;
    assert_eq!(scheduled.restart_count, Some(2));

    let _c = h.next_child().await;
    assert!(b.was_terminated());
    assert_eq!(h.spawner.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_terminates_the_child() {
    let mut h = Harness::new(|_| {});
    let child = h.start_ready().await;

    drop(h);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(child.was_terminated());
}
