use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service type of the workflow engine. Workflow jobs are scheduled by the
/// workflow service itself and are treated specially by the dispatcher and
/// the load accounting.
pub const TYPE_WORKFLOW: &str = "com.gridcast.workflow";

/// Operation that resumes a workflow at its current operation.
pub const START_OPERATION: &str = "START_OPERATION";

/// Operation that starts a new workflow instance.
pub const START_WORKFLOW: &str = "START_WORKFLOW";

/// Operation that resumes a paused workflow.
pub const RESUME: &str = "RESUME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Instantiated,
    Queued,
    Dispatching,
    Running,
    Paused,
    Finished,
    Failed,
    Canceled,
    Restart,
    Waiting,
}

/// Statuses that count a job's load against its processor host.
pub const JOB_STATUSES_INFLUENCING_LOAD_BALANCING: [JobStatus; 4] = [
    JobStatus::Queued,
    JobStatus::Dispatching,
    JobStatus::Running,
    JobStatus::Waiting,
];

impl JobStatus {
    /// Wire ordinal, stable across releases. The exchange format carries
    /// ordinals rather than names.
    pub fn ordinal(&self) -> i32 {
        match self {
            JobStatus::Instantiated => 0,
            JobStatus::Queued => 1,
            JobStatus::Dispatching => 2,
            JobStatus::Running => 3,
            JobStatus::Paused => 4,
            JobStatus::Finished => 5,
            JobStatus::Failed => 6,
            JobStatus::Canceled => 7,
            JobStatus::Restart => 8,
            JobStatus::Waiting => 9,
        }
    }

    pub fn from_ordinal(ordinal: i32) -> Option<JobStatus> {
        match ordinal {
            0 => Some(JobStatus::Instantiated),
            1 => Some(JobStatus::Queued),
            2 => Some(JobStatus::Dispatching),
            3 => Some(JobStatus::Running),
            4 => Some(JobStatus::Paused),
            5 => Some(JobStatus::Finished),
            6 => Some(JobStatus::Failed),
            7 => Some(JobStatus::Canceled),
            8 => Some(JobStatus::Restart),
            9 => Some(JobStatus::Waiting),
            _ => None,
        }
    }

    /// Terminal statuses never transition again (except RESTART re-entry,
    /// which is driven by the registration sweep, not by workers).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn influences_load(&self) -> bool {
        JOB_STATUSES_INFLUENCING_LOAD_BALANCING.contains(self)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Instantiated => write!(f, "instantiated"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Dispatching => write!(f, "dispatching"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Paused => write!(f, "paused"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Canceled => write!(f, "canceled"),
            JobStatus::Restart => write!(f, "restart"),
            JobStatus::Waiting => write!(f, "waiting"),
        }
    }
}

/// Why a job ended up FAILED. DATA failures are caused by the job's input
/// and never count against the health of the executing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailureReason {
    #[default]
    None,
    Data,
    Processing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned identifier, 0 until persisted.
    pub id: i64,
    pub job_type: String,
    pub operation: String,
    pub arguments: Vec<String>,
    pub payload: Option<String>,
    pub status: JobStatus,
    pub failure_reason: FailureReason,
    /// Whether the dispatcher picks the execution host. Non-dispatchable
    /// jobs are pinned to the service that created them.
    pub dispatchable: bool,
    pub job_load: f32,
    /// Optimistic-lock counter, bumped by the store on every update.
    pub version: i64,
    pub creator: String,
    pub organization: String,
    /// Host of the service that created this job.
    pub creator_host: String,
    /// Host of the service currently executing this job, if any.
    pub processor_host: Option<String>,
    pub parent: Option<i64>,
    pub root: Option<i64>,
    pub blocking_job: Option<i64>,
    pub blocked_jobs: Vec<i64>,
    pub date_created: DateTime<Utc>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,
    /// Milliseconds spent between creation and start.
    pub queue_time: Option<i64>,
    /// Milliseconds spent between start and completion.
    pub run_time: Option<i64>,
    /// Where this job can be fetched as XML.
    pub uri: Option<String>,
}

impl Job {
    pub fn new(
        job_type: impl Into<String>,
        operation: impl Into<String>,
        creator: impl Into<String>,
        organization: impl Into<String>,
        creator_host: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            job_type: job_type.into(),
            operation: operation.into(),
            arguments: Vec::new(),
            payload: None,
            status: JobStatus::Instantiated,
            failure_reason: FailureReason::None,
            dispatchable: true,
            job_load: 1.0,
            version: 0,
            creator: creator.into(),
            organization: organization.into(),
            creator_host: creator_host.into(),
            processor_host: None,
            parent: None,
            root: None,
            blocking_job: None,
            blocked_jobs: Vec::new(),
            date_created: Utc::now(),
            date_started: None,
            date_completed: None,
            queue_time: None,
            run_time: None,
            uri: None,
        }
    }

    /// Stable identifier of this job's computational intent. Jobs with the
    /// same type, operation and arguments share a signature, which the
    /// service-health state machine uses to correlate failures across hosts.
    pub fn signature(&self) -> i64 {
        // FNV-1a, folded over the fields with a separator byte so that
        // ("ab", "c") and ("a", "bc") hash differently.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut eat = |bytes: &[u8]| {
            for b in bytes {
                hash ^= u64::from(*b);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
            hash ^= 0x1f;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        };
        eat(self.job_type.as_bytes());
        eat(self.operation.as_bytes());
        for argument in &self.arguments {
            eat(argument.as_bytes());
        }
        hash as i64
    }
}
