mod common;

use common::{register_worker_service, spawn_worker, test_registry};
use gridcast::client::DispatchClient;
use gridcast::heartbeat::HeartbeatMonitor;
use gridcast::registry::job::JobStatus;
use gridcast::registry::lifecycle::JobSpec;
use gridcast::store::JobStore;

#[tokio::test]
async fn responsive_services_stay_online() {
    let (registry, store) = test_registry();
    let worker = spawn_worker(204, 200).await;
    register_worker_service(&registry, "svcA", &worker.base_url, 4.0).await;

    let mut monitor = HeartbeatMonitor::new(registry.clone(), DispatchClient::new());
    monitor.check_services().await;
    monitor.check_services().await;

    assert_eq!(worker.ping_hits(), 2);
    let service = store.service("svcA", &worker.base_url).await.unwrap().unwrap();
    assert!(service.online);
}

#[tokio::test]
async fn two_failed_probes_unregister_the_service() {
    let (registry, store) = test_registry();
    let worker = spawn_worker(204, 500).await;
    register_worker_service(&registry, "svcA", &worker.base_url, 4.0).await;

    // A job the service was running when it went dark.
    let mut job = registry
        .create_job(JobSpec::new("svcA", "run").host(&worker.base_url))
        .await
        .unwrap();
    job.status = JobStatus::Running;
    job.processor_host = Some(worker.base_url.clone());
    let job = registry.update_job(job).await.unwrap();

    let mut monitor = HeartbeatMonitor::new(registry.clone(), DispatchClient::new());

    // First strike: the service goes on the watch list but stays online.
    monitor.check_services().await;
    let service = store.service("svcA", &worker.base_url).await.unwrap().unwrap();
    assert!(service.online);
    let job_after_first = registry.job(job.id).await.unwrap();
    assert_eq!(job_after_first.status, JobStatus::Running);

    // Second strike: unregistered, and the lost job is rescheduled.
    monitor.check_services().await;
    let service = store.service("svcA", &worker.base_url).await.unwrap().unwrap();
    assert!(!service.online);
    let job = registry.job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Restart);
    assert!(job.processor_host.is_none());
}

#[tokio::test]
async fn two_failed_probes_fail_pinned_jobs() {
    let (registry, _store) = test_registry();
    let worker = spawn_worker(204, 500).await;
    register_worker_service(&registry, "svcA", &worker.base_url, 4.0).await;

    let mut job = registry
        .create_job(
            JobSpec::new("svcA", "run")
                .host(&worker.base_url)
                .dispatchable(false),
        )
        .await
        .unwrap();
    job.status = JobStatus::Running;
    let job = registry.update_job(job).await.unwrap();

    let mut monitor = HeartbeatMonitor::new(registry.clone(), DispatchClient::new());
    monitor.check_services().await;
    monitor.check_services().await;

    let job = registry.job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn recovered_service_is_taken_off_the_watch_list() {
    let (registry, store) = test_registry();
    let worker = spawn_worker(204, 500).await;
    register_worker_service(&registry, "svcA", &worker.base_url, 4.0).await;

    let mut monitor = HeartbeatMonitor::new(registry.clone(), DispatchClient::new());
    monitor.check_services().await;

    // The service answers again before the second strike.
    worker.set_ping_status(200);
    monitor.check_services().await;
    monitor.check_services().await;

    let service = store.service("svcA", &worker.base_url).await.unwrap().unwrap();
    assert!(service.online);
}

#[tokio::test]
async fn offline_service_is_restored_when_it_answers() {
    let (registry, store) = test_registry();
    let worker = spawn_worker(204, 200).await;
    register_worker_service(&registry, "svcA", &worker.base_url, 4.0).await;

    // Taken offline earlier, host still online.
    registry
        .unregister_service("svcA", &worker.base_url)
        .await
        .unwrap();
    let service = store.service("svcA", &worker.base_url).await.unwrap().unwrap();
    assert!(!service.online);

    let mut monitor = HeartbeatMonitor::new(registry.clone(), DispatchClient::new());
    monitor.check_services().await;

    let service = store.service("svcA", &worker.base_url).await.unwrap().unwrap();
    assert!(service.online);
    assert!(service.job_producer);
}

#[tokio::test]
async fn services_in_maintenance_are_not_probed() {
    let (registry, _store) = test_registry();
    let worker = spawn_worker(204, 200).await;
    register_worker_service(&registry, "svcA", &worker.base_url, 4.0).await;
    registry
        .set_maintenance_status(&worker.base_url, true)
        .await
        .unwrap();

    let mut monitor = HeartbeatMonitor::new(registry.clone(), DispatchClient::new());
    monitor.check_services().await;

    assert_eq!(worker.ping_hits(), 0);
}

#[tokio::test]
async fn non_producers_are_not_probed() {
    let (registry, _store) = test_registry();
    let worker = spawn_worker(204, 200).await;
    registry
        .register_host(&worker.base_url, "127.0.0.1", 0, 4, 4.0)
        .await
        .unwrap();
    registry
        .register_service("svcA", &worker.base_url, "/work", false)
        .await
        .unwrap();

    let mut monitor = HeartbeatMonitor::new(registry.clone(), DispatchClient::new());
    monitor.check_services().await;

    assert_eq!(worker.ping_hits(), 0);
}
