mod common;

use common::{register_worker_service, test_registry, LOCAL_HOST};
use gridcast::registry::job::JobStatus;
use gridcast::registry::lifecycle::JobSpec;

const OTHER_HOST: &str = "http://worker1.test";

#[tokio::test]
async fn orphaned_local_jobs_are_canceled_on_startup() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", LOCAL_HOST, 4.0).await;

    let instantiated = registry
        .create_job(JobSpec::new("svcA", "run").dispatchable(false))
        .await
        .unwrap();

    let mut running = registry
        .create_job(JobSpec::new("svcA", "run").dispatchable(false))
        .await
        .unwrap();
    running.status = JobStatus::Running;
    let running = registry.update_job(running).await.unwrap();

    // The process died here. On restart, the orphans are cancelled.
    registry.clean_undispatchable_jobs().await;

    assert_eq!(
        registry.job(instantiated.id).await.unwrap().status,
        JobStatus::Canceled
    );
    assert_eq!(
        registry.job(running.id).await.unwrap().status,
        JobStatus::Canceled
    );
}

#[tokio::test]
async fn jobs_on_other_hosts_are_left_alone() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", OTHER_HOST, 4.0).await;

    let remote = registry
        .create_job(
            JobSpec::new("svcA", "run")
                .host(OTHER_HOST)
                .dispatchable(false),
        )
        .await
        .unwrap();

    registry.clean_undispatchable_jobs().await;

    assert_eq!(
        registry.job(remote.id).await.unwrap().status,
        JobStatus::Instantiated
    );
}

#[tokio::test]
async fn dispatchable_jobs_on_the_local_host_are_also_swept() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", LOCAL_HOST, 4.0).await;

    let mut dispatched = registry
        .create_job(JobSpec::new("svcA", "run"))
        .await
        .unwrap();
    dispatched.status = JobStatus::Running;
    dispatched.processor_host = Some(LOCAL_HOST.to_string());
    let dispatched = registry.update_job(dispatched).await.unwrap();

    registry.clean_undispatchable_jobs().await;

    assert_eq!(
        registry.job(dispatched.id).await.unwrap().status,
        JobStatus::Canceled
    );
}

#[tokio::test]
async fn terminal_jobs_are_untouched_by_recovery() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", LOCAL_HOST, 4.0).await;

    let mut finished = registry
        .create_job(JobSpec::new("svcA", "run").dispatchable(false))
        .await
        .unwrap();
    finished.status = JobStatus::Finished;
    let finished = registry.update_job(finished).await.unwrap();

    registry.clean_undispatchable_jobs().await;

    assert_eq!(
        registry.job(finished.id).await.unwrap().status,
        JobStatus::Finished
    );
}
