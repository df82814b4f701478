//! Integration tests for daemon shutdown

mod common;

use std::sync::Arc;
use std::time::Duration;

use berthd::container::RestartPolicy;
use berthd::persist::Store;
use berthd::runtime::TaskStatus;
use berthd::Daemon;
use tokio::time::Instant;

use common::{record, Harness};

/// Restore a daemon with `ids` started by the restart pass
async fn restored_with_running(h: &Harness, ids: &[&str]) -> Arc<Daemon> {
    for id in ids {
        let mut rec = record(id, &format!("/{}", id));
        rec.host_config.restart_policy = RestartPolicy::always();
        rec.state.has_been_started_before = true;
        h.write(&rec).await;
    }
    let daemon = h.daemon();
    daemon.restore().await.unwrap();
    daemon
}

#[tokio::test]
async fn test_shutdown_timeout_is_longest() {
    let mut h = Harness::new();
    h.config.shutdown_timeout = 15;

    let mut slow = record("t1", "/slow");
    slow.config.stop_timeout = Some(30);
    h.write(&slow).await;
    h.write(&record("t2", "/default")).await;

    let daemon = h.daemon();
    daemon.restore().await.unwrap();

    assert_eq!(daemon.shutdown_timeout().await, Some(Duration::from_secs(35)));
}

#[tokio::test]
async fn test_shutdown_timeout_configured_floor() {
    let mut h = Harness::new();
    h.config.shutdown_timeout = 60;
    h.write(&record("t1", "/default")).await;

    let daemon = h.daemon();
    daemon.restore().await.unwrap();

    assert_eq!(daemon.shutdown_timeout().await, Some(Duration::from_secs(60)));
}

#[tokio::test]
async fn test_negative_timeout_waits_forever() {
    let mut h = Harness::new();
    h.config.shutdown_timeout = -1;
    let daemon = h.daemon();
    assert_eq!(daemon.shutdown_timeout().await, None);

    let h = Harness::new();
    let mut forever = record("t1", "/forever");
    forever.config.stop_timeout = Some(-1);
    h.write(&forever).await;
    h.write(&record("t2", "/default")).await;
    let daemon = h.daemon();
    daemon.restore().await.unwrap();
    assert_eq!(daemon.shutdown_timeout().await, None);
}

#[tokio::test]
async fn test_shutdown_stops_containers_then_services() {
    let h = Harness::new();
    let daemon = restored_with_running(&h, &["w1", "w2"]).await;
    assert!(!daemon.is_shutting_down());

    daemon.shutdown().await;

    assert!(daemon.is_shutting_down());
    assert!(h.events.contains("stop:w1"));
    assert!(h.events.contains("stop:w2"));
    assert!(h.events.contains("cleanup:mnt-w1"));
    assert!(h.events.contains("cleanup:mnt-w2"));

    let order = [
        "teardown:volumes",
        "image-shutdown",
        "teardown:metrics",
        "teardown:plugins",
        "network-stop",
        "runtime-close",
        "teardown:metadata",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|e| h.events.position(e).unwrap_or_else(|| panic!("missing {}", e)))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    let last_stop = h.events.position("stop:w1").max(h.events.position("stop:w2"));
    assert!(last_stop.unwrap() < positions[0]);

    for id in ["w1", "w2"] {
        let container = daemon.containers().get(id).unwrap();
        assert!(!container.lock().await.state.is_running());
    }
}

#[tokio::test]
async fn test_shutdown_tears_down_cluster() {
    let h = Harness::new();
    let daemon = h.daemon();
    daemon.restore().await.unwrap();
    daemon.joins_cluster(h.cluster());

    daemon.shutdown().await;

    let image = h.events.position("image-shutdown").unwrap();
    let cluster = h.events.position("teardown:cluster").unwrap();
    let metrics = h.events.position("teardown:metrics").unwrap();
    assert!(image < cluster);
    assert!(cluster < metrics);
}

#[tokio::test]
async fn test_shutdown_without_cluster() {
    let h = Harness::new();
    let daemon = h.daemon();
    daemon.restore().await.unwrap();

    daemon.shutdown().await;

    assert!(!h.events.contains("teardown:cluster"));
    assert!(h.events.contains("teardown:metadata"));
}

#[tokio::test]
async fn test_live_restore_leaves_containers_running() {
    let mut h = Harness::new();
    h.config.live_restore = true;
    let mut rec = record("l1", "/web");
    rec.state.set_running(100);
    h.write(&rec).await;
    h.runtime.add_task("l1", TaskStatus::Running, 0);

    let daemon = h.daemon();
    daemon.restore().await.unwrap();
    daemon.shutdown().await;

    assert!(daemon.is_shutting_down());
    assert!(h.events.contains("teardown:metrics"));
    assert!(!h.events.contains("stop:l1"));
    assert!(!h.events.contains("image-shutdown"));
    assert!(!h.events.contains("network-stop"));
    assert!(!h.events.contains("runtime-close"));
    assert!(!h.events.contains("teardown:metadata"));

    let container = daemon.containers().get("l1").unwrap();
    assert!(container.lock().await.state.is_running());
}

#[tokio::test]
async fn test_live_restore_nothing_running() {
    let mut h = Harness::new();
    h.config.live_restore = true;
    h.write(&record("l1", "/idle")).await;

    let daemon = h.daemon();
    daemon.restore().await.unwrap();
    daemon.shutdown().await;

    assert!(h.events.contains("image-shutdown"));
    assert!(h.events.contains("network-stop"));
    assert!(h.events.contains("runtime-close"));
    assert!(h.events.contains("teardown:metadata"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_gives_up_after_timeout() {
    let mut h = Harness::new();
    h.config.shutdown_timeout = 1;

    let mut rec = record("s1", "/stubborn");
    rec.host_config.restart_policy = RestartPolicy::always();
    rec.state.has_been_started_before = true;
    rec.config.stop_timeout = Some(1);
    h.write(&rec).await;

    let daemon = h.daemon();
    daemon.restore().await.unwrap();
    h.ops.set_stop_delay(Duration::from_secs(60));

    assert_eq!(daemon.shutdown_timeout().await, Some(Duration::from_secs(6)));

    let before = Instant::now();
    daemon.shutdown().await;
    let took = before.elapsed();

    assert!(took >= Duration::from_secs(6));
    assert!(took < Duration::from_secs(60));
    assert!(h.events.contains("stop:s1"));
    // Never got to the layer cleanup, but the services still went down
    assert!(!h.events.contains("cleanup:mnt-s1"));
    assert!(h.events.contains("teardown:metadata"));
}

#[tokio::test]
async fn test_failed_teardown_does_not_stop_sequence() {
    let h = Harness::new();
    let store: Arc<dyn Store> = Arc::new(h.store());
    let services = h
        .services_with_store(store)
        .with_volumes(h.failing_teardown("volumes"))
        .with_plugins(h.failing_teardown("plugins"));
    let daemon = Daemon::new(h.config.clone(), services);
    daemon.restore().await.unwrap();

    daemon.shutdown().await;

    assert!(h.events.contains("teardown:volumes"));
    assert!(h.events.contains("image-shutdown"));
    assert!(h.events.contains("teardown:plugins"));
    assert!(h.events.contains("network-stop"));
    assert!(h.events.contains("runtime-close"));
    assert!(h.events.contains("teardown:metadata"));
}

#[tokio::test]
async fn test_container_still_running_after_stop() {
    let h = Harness::new();
    let daemon = restored_with_running(&h, &["r1"]).await;
    h.ops.ignore_stop();

    let container = daemon.containers().get("r1").unwrap();
    assert!(daemon.shutdown_container(&container).await.is_err());

    daemon.shutdown().await;
    // Mounts of a container that didn't stop are left alone
    assert!(!h.events.contains("cleanup:mnt-r1"));
    assert!(h.events.contains("teardown:metadata"));
}
