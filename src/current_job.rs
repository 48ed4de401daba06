//! Task-local current-job context.
//!
//! While a job is being dispatched, the dispatcher makes it available to
//! everything running inside the dispatch future. A service creating a
//! child job without naming a parent inherits the current job, so parent
//! links do not need explicit plumbing through every call site. The scope
//! guarantees the value is released on all exit paths.

use std::future::Future;

use crate::registry::job::Job;

tokio::task_local! {
    static CURRENT_JOB: Option<Job>;
}

/// Run `future` with the given job as the current job of the task.
pub async fn with_current_job<F>(job: Option<Job>, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_JOB.scope(job, future).await
}

/// The job currently being dispatched by this task, if any.
pub fn current_job() -> Option<Job> {
    CURRENT_JOB
        .try_with(|job| job.clone())
        .ok()
        .flatten()
}
