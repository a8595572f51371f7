use crate::tests::scripts::{
    counting_service, crashing_service, marker_on_shutdown_service, ready_service,
    silent_service, test_config,
};
use crate::tests::{FAKE_PROCESS_NAME, FakeReaper, free_port_pair};
use crate::{
    ServiceState, Supervisor, SupervisorError, SupervisorNotice, SupervisorResult, is_alive,
};

use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use googletest::assert_that;
use googletest::prelude::{anything, elements_are, eq, err, is_empty, none, ok, some};
use serial_test::serial;
use sidecar_config::Config;
use tempfile::TempDir;

fn supervisor_with(config: Config, reaper: Arc<FakeReaper>) -> Supervisor {
    Supervisor::new(config, reaper).unwrap()
}

fn supervisor_for(executable: &Path, port: u16) -> (Supervisor, Arc<FakeReaper>) {
    let reaper = Arc::new(FakeReaper::default());
    let supervisor = supervisor_with(test_config(executable, port), Arc::clone(&reaper));
    (supervisor, reaper)
}

async fn stop_quietly(supervisor: &Supervisor) {
    let _ = supervisor.stop().await;
}

// =========================================================================
// Start
// =========================================================================

#[tokio::test]
#[serial]
async fn given_service_printing_marker_when_started_then_running_on_default_port() {
    // Given
    let dir = TempDir::new().unwrap();
    let port = free_port_pair();
    let (supervisor, reaper) = supervisor_for(&ready_service(&dir), port);
    let mut notices = supervisor.notices();

    // When
    let result = supervisor.start(None).await;

    // Then
    assert_that!(result, ok(eq(&ServiceState::Running { port })));
    assert_that!(supervisor.current_port().await, eq(port));
    assert!(supervisor.is_running().await);
    assert!(supervisor.is_ready(Duration::from_millis(100)).await);
    assert_that!(reaper.port_calls(), is_empty());

    let notice = notices.try_recv().unwrap();
    assert!(matches!(notice, SupervisorNotice::InstanceReady { port: p, .. } if p == port));

    stop_quietly(&supervisor).await;
}

#[tokio::test]
#[serial]
async fn given_running_service_when_started_again_then_same_instance_kept() {
    // Given
    let dir = TempDir::new().unwrap();
    let port = free_port_pair();
    let (supervisor, _reaper) = supervisor_for(&ready_service(&dir), port);
    supervisor.start(None).await.unwrap();
    let first_pid = supervisor.pid().await;

    // When
    let result = supervisor.start(None).await;

    // Then
    assert_that!(result, ok(eq(&ServiceState::Running { port })));
    assert_that!(supervisor.pid().await, eq(first_pid));

    stop_quietly(&supervisor).await;
}

#[tokio::test]
#[serial]
async fn given_concurrent_starts_when_both_complete_then_one_process_spawned() {
    // Given
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("launches.txt");
    let port = free_port_pair();
    let (supervisor, _reaper) = supervisor_for(&counting_service(&dir, &counter), port);

    // When
    let (first, second) = tokio::join!(supervisor.start(None), supervisor.start(None));

    // Then
    assert_that!(first, ok(eq(&ServiceState::Running { port })));
    assert_that!(second, ok(eq(&ServiceState::Running { port })));
    let launches = std::fs::read_to_string(&counter).unwrap();
    assert_that!(launches.lines().count(), eq(1));

    stop_quietly(&supervisor).await;
}

#[tokio::test]
#[serial]
async fn given_explicit_port_when_started_then_that_port_used() {
    // Given
    let dir = TempDir::new().unwrap();
    let default_port = free_port_pair();
    let explicit = free_port_pair();
    let (supervisor, _reaper) = supervisor_for(&ready_service(&dir), default_port);

    // When
    let result = supervisor.start(Some(explicit)).await;

    // Then
    assert_that!(result, ok(eq(&ServiceState::Running { port: explicit })));

    stop_quietly(&supervisor).await;
}

#[tokio::test]
#[serial]
async fn given_missing_executable_when_started_then_binary_not_found() {
    // Given
    let dir = TempDir::new().unwrap();
    let (supervisor, _reaper) = supervisor_for(&dir.path().join("nope"), free_port_pair());

    // When
    let result = supervisor.start(None).await;

    // Then
    assert!(matches!(result, Err(SupervisorError::BinaryNotFound { .. })));
    assert!(matches!(supervisor.state(), ServiceState::Failed { .. }));
}

#[tokio::test]
#[serial]
async fn given_service_crashing_on_boot_when_started_then_early_exit_reported() {
    // Given
    let dir = TempDir::new().unwrap();
    let (supervisor, _reaper) = supervisor_for(&crashing_service(&dir), free_port_pair());

    // When
    let result = supervisor.start(None).await;

    // Then
    match result {
        Err(SupervisorError::EarlyExit { exit, .. }) => assert_that!(exit.code, some(eq(3))),
        other => panic!("expected EarlyExit, got {other:?}"),
    }
    assert!(matches!(supervisor.state(), ServiceState::Failed { .. }));
    assert_that!(supervisor.pid().await, none());
}

#[tokio::test]
#[serial]
async fn given_service_never_ready_when_started_then_timeout_and_stop_cleans_up() {
    // Given
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&silent_service(&dir), free_port_pair());
    config.readiness.max_attempts = 3;
    config.readiness.interval_ms = 50;
    config.readiness.probe_timeout_ms = 50;
    let supervisor = supervisor_with(config, Arc::new(FakeReaper::default()));

    // When
    let result = supervisor.start(None).await;

    // Then
    assert!(matches!(
        result,
        Err(SupervisorError::ReadinessTimeout { attempts: 3, .. })
    ));
    assert!(matches!(supervisor.state(), ServiceState::Failed { .. }));
    let pid = supervisor.pid().await.expect("handle is retained after a timeout");
    assert!(is_alive(pid));

    let stopped = supervisor.stop().await;
    assert_that!(stopped, ok(eq(&true)));
    assert_that!(supervisor.state(), eq(&ServiceState::Stopped));
    assert!(!is_alive(pid));
}

#[tokio::test]
#[serial]
async fn given_triggered_shutdown_when_started_then_cancelled_without_launch() {
    // Given
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("launches.txt");
    let (supervisor, _reaper) =
        supervisor_for(&counting_service(&dir, &counter), free_port_pair());
    supervisor.shutdown_signal().trigger();

    // When
    let result = supervisor.start(None).await;

    // Then
    assert!(matches!(result, Err(SupervisorError::Cancelled { .. })));
    assert!(!counter.exists());
}

#[tokio::test]
#[serial]
async fn given_shutdown_during_readiness_wait_when_started_then_cancelled_and_retained() {
    // Given
    let dir = TempDir::new().unwrap();
    let (supervisor, _reaper) = supervisor_for(&silent_service(&dir), free_port_pair());
    let shutdown = supervisor.shutdown_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.trigger();
    });

    // When
    let result = supervisor.start(None).await;

    // Then
    assert!(matches!(result, Err(SupervisorError::Cancelled { .. })));
    assert!(supervisor.pid().await.is_some());
    assert_that!(supervisor.stop().await, ok(eq(&true)));
}

// =========================================================================
// Port conflicts
// =========================================================================

#[tokio::test]
#[serial]
async fn given_default_port_held_and_unreapable_when_started_then_next_port_used() {
    // Given
    let dir = TempDir::new().unwrap();
    let port = free_port_pair();
    let holder = TcpListener::bind(("127.0.0.1", port)).unwrap();
    let reaper = Arc::new(FakeReaper::stubborn(holder));
    let supervisor = supervisor_with(test_config(&ready_service(&dir), port), Arc::clone(&reaper));

    // When
    let result = supervisor.start(None).await;

    // Then
    assert_that!(result, ok(eq(&ServiceState::Running { port: port + 1 })));
    assert_that!(reaper.port_calls(), elements_are![eq(&port)]);
    assert_that!(
        reaper.name_calls(),
        elements_are![eq(&FAKE_PROCESS_NAME.to_string())]
    );
    assert_that!(supervisor.current_port().await, eq(port + 1));

    stop_quietly(&supervisor).await;
}

#[tokio::test]
#[serial]
async fn given_default_port_held_when_by_port_reap_frees_it_then_default_port_used() {
    // Given
    let dir = TempDir::new().unwrap();
    let port = free_port_pair();
    let holder = TcpListener::bind(("127.0.0.1", port)).unwrap();
    let reaper = Arc::new(FakeReaper::releasing_on_port_kill(holder));
    let supervisor = supervisor_with(test_config(&ready_service(&dir), port), Arc::clone(&reaper));

    // When
    let result = supervisor.start(None).await;

    // Then
    assert_that!(result, ok(eq(&ServiceState::Running { port })));
    assert_that!(reaper.port_calls(), elements_are![eq(&port)]);
    assert_that!(reaper.name_calls(), is_empty());

    stop_quietly(&supervisor).await;
}

#[tokio::test]
#[serial]
async fn given_whole_range_held_when_started_then_port_conflict_unresolved() {
    // Given
    let dir = TempDir::new().unwrap();
    let port = free_port_pair();
    let _first = TcpListener::bind(("127.0.0.1", port)).unwrap();
    let _second = TcpListener::bind(("127.0.0.1", port + 1)).unwrap();
    let (supervisor, reaper) = supervisor_for(&ready_service(&dir), port);

    // When
    let result = supervisor.start(None).await;

    // Then
    match result {
        Err(SupervisorError::PortConflictUnresolved { start, end, .. }) => {
            assert_that!(start, eq(port));
            assert_that!(end, eq(port + 1));
        }
        other => panic!("expected PortConflictUnresolved, got {other:?}"),
    }
    assert_that!(reaper.port_calls(), elements_are![eq(&port), eq(&(port + 1))]);
    assert!(matches!(supervisor.state(), ServiceState::Failed { .. }));
}

// =========================================================================
// Stop, restart and liveness
// =========================================================================

#[tokio::test]
#[serial]
async fn given_idle_supervisor_when_stopped_then_true_and_still_idle() {
    // Given
    let dir = TempDir::new().unwrap();
    let (supervisor, reaper) = supervisor_for(&ready_service(&dir), free_port_pair());

    // When
    let result = supervisor.stop().await;

    // Then
    assert_that!(result, ok(eq(&true)));
    assert_that!(supervisor.state(), eq(&ServiceState::Idle));
    assert_that!(reaper.name_calls(), is_empty());
}

#[tokio::test]
#[serial]
async fn given_running_service_when_stopped_then_process_gone_and_exit_clean() {
    // Given
    let dir = TempDir::new().unwrap();
    let (supervisor, _reaper) = supervisor_for(&ready_service(&dir), free_port_pair());
    supervisor.start(None).await.unwrap();
    let pid = supervisor.pid().await.unwrap();
    let mut notices = supervisor.notices();

    // When
    let result = supervisor.stop().await;

    // Then
    assert_that!(result, ok(eq(&true)));
    assert_that!(supervisor.state(), eq(&ServiceState::Stopped));
    assert!(!is_alive(pid));
    assert!(!supervisor.is_ready(Duration::from_millis(50)).await);
    let exit = supervisor.last_exit().await.expect("exit recorded");
    assert!(exit.is_clean(true));
    assert!(!matches!(
        notices.try_recv(),
        Ok(SupervisorNotice::AnomalousExit { .. })
    ));

    // A second stop is a no-op
    assert_that!(supervisor.stop().await, ok(eq(&true)));
}

#[tokio::test]
#[serial]
async fn given_service_printing_marker_while_stopping_when_stopped_then_not_ready_again() {
    // Given
    let dir = TempDir::new().unwrap();
    let (supervisor, _reaper) =
        supervisor_for(&marker_on_shutdown_service(&dir), free_port_pair());
    supervisor.start(None).await.unwrap();
    let mut notices = supervisor.notices();

    // When
    let result = supervisor.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Then
    assert_that!(result, ok(eq(&true)));
    assert_that!(supervisor.state(), eq(&ServiceState::Stopped));
    assert!(!supervisor.is_ready(Duration::from_millis(50)).await);
    while let Ok(notice) = notices.try_recv() {
        assert!(
            !matches!(notice, SupervisorNotice::InstanceReady { .. }),
            "ready notice after stop: {notice:?}"
        );
    }
}

#[tokio::test]
#[serial]
async fn given_running_service_when_restarted_then_new_instance_running() {
    // Given
    let dir = TempDir::new().unwrap();
    let port = free_port_pair();
    let (supervisor, _reaper) = supervisor_for(&ready_service(&dir), port);
    supervisor.start(None).await.unwrap();
    let first_pid = supervisor.pid().await.unwrap();

    // When
    let result = supervisor.restart(None).await;

    // Then
    assert_that!(result, ok(eq(&ServiceState::Running { port })));
    let second_pid = supervisor.pid().await.unwrap();
    assert_ne!(first_pid, second_pid);
    assert!(!is_alive(first_pid));

    stop_quietly(&supervisor).await;
}

#[tokio::test]
#[serial]
async fn given_process_killed_externally_when_checked_then_stopped_and_anomaly_noticed() {
    // Given
    let dir = TempDir::new().unwrap();
    let (supervisor, _reaper) = supervisor_for(&ready_service(&dir), free_port_pair());
    supervisor.start(None).await.unwrap();
    let pid = supervisor.pid().await.unwrap();
    let mut notices = supervisor.notices();
    let mut states = supervisor.subscribe();

    // When
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    )
    .unwrap();
    let settled = tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ServiceState::Stopped),
    )
    .await;

    // Then
    assert!(settled.is_ok(), "supervisor should notice the exit");
    assert!(!supervisor.is_running().await);
    let notice = notices.recv().await.unwrap();
    assert!(matches!(notice, SupervisorNotice::AnomalousExit { pid: p, .. } if p == pid));
    assert_that!(
        supervisor.last_exit().await.and_then(|exit| exit.signal),
        some(eq(libc::SIGKILL))
    );
}

#[tokio::test]
#[serial]
async fn given_failed_start_with_retained_process_when_started_again_then_old_process_reaped() {
    // Given
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&silent_service(&dir), free_port_pair());
    config.readiness.max_attempts = 2;
    config.readiness.interval_ms = 50;
    config.readiness.probe_timeout_ms = 50;
    let supervisor = supervisor_with(config, Arc::new(FakeReaper::default()));
    let _ = supervisor.start(None).await;
    let retained = supervisor.pid().await.unwrap();

    // When
    let result: SupervisorResult<ServiceState> = supervisor.start(None).await;

    // Then
    assert_that!(result, err(anything()));
    assert!(!is_alive(retained));

    stop_quietly(&supervisor).await;
}

// =========================================================================
// Stale instance cleanup
// =========================================================================

#[tokio::test]
#[serial]
async fn given_idle_supervisor_when_cleaning_stale_instances_then_reaped_by_name() {
    // Given
    let dir = TempDir::new().unwrap();
    let (supervisor, reaper) = supervisor_for(&ready_service(&dir), free_port_pair());

    // When
    let outcome = supervisor.cleanup_stale_previous_instances().await.unwrap();

    // Then
    assert!(outcome.succeeded);
    assert_that!(
        reaper.name_calls(),
        elements_are![eq(&FAKE_PROCESS_NAME.to_string())]
    );
}

#[tokio::test]
#[serial]
async fn given_running_instance_when_cleaning_stale_instances_then_refused() {
    // Given
    let dir = TempDir::new().unwrap();
    let (supervisor, reaper) = supervisor_for(&ready_service(&dir), free_port_pair());
    supervisor.start(None).await.unwrap();

    // When
    let outcome = supervisor.cleanup_stale_previous_instances().await.unwrap();

    // Then
    assert!(!outcome.succeeded);
    assert_that!(reaper.name_calls(), is_empty());

    stop_quietly(&supervisor).await;
}

#[tokio::test]
#[serial]
async fn given_broken_reaper_when_cleaning_stale_instances_then_error() {
    let dir = TempDir::new().unwrap();
    let supervisor = supervisor_with(
        test_config(&ready_service(&dir), free_port_pair()),
        Arc::new(FakeReaper::broken()),
    );

    let result = supervisor.cleanup_stale_previous_instances().await;

    assert_that!(result, err(anything()));
}

#[test]
fn given_invalid_config_when_constructed_then_config_error() {
    let mut config = test_config(Path::new("/unused"), 23450);
    config.readiness.max_attempts = 0;

    let result = Supervisor::new(config, Arc::new(FakeReaper::default()));

    assert!(matches!(result, Err(SupervisorError::Config { .. })));
}
