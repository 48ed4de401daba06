//! Round-trippable job exchange format.
//!
//! Jobs travel to workers as an XML document inside the dispatch request
//! body. The document is self-contained: a worker can parse it, execute
//! the operation and post the updated job back without access to the
//! registry's store. Parent and root references use the `-1` sentinel for
//! "absent" so the document never carries optional reference elements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::registry::job::{FailureReason, Job, JobStatus};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "job")]
struct JobXml {
    id: i64,
    #[serde(rename = "jobType")]
    job_type: String,
    operation: String,
    #[serde(default)]
    arguments: Arguments,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    /// Status ordinal, stable across releases.
    status: i32,
    version: i64,
    creator: String,
    organization: String,
    dispatchable: bool,
    #[serde(rename = "jobLoad")]
    job_load: f32,
    #[serde(rename = "dateCreated")]
    date_created: DateTime<Utc>,
    #[serde(rename = "dateStarted", default, skip_serializing_if = "Option::is_none")]
    date_started: Option<DateTime<Utc>>,
    #[serde(
        rename = "dateCompleted",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    date_completed: Option<DateTime<Utc>>,
    #[serde(rename = "parentId")]
    parent_id: i64,
    #[serde(rename = "rootId")]
    root_id: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Arguments {
    #[serde(rename = "argument", default)]
    argument: Vec<String>,
}

/// Serialize a job for the dispatch wire protocol.
pub fn to_xml(job: &Job) -> Result<String> {
    let document = JobXml {
        id: job.id,
        job_type: job.job_type.clone(),
        operation: job.operation.clone(),
        arguments: Arguments {
            argument: job.arguments.clone(),
        },
        payload: job.payload.clone(),
        status: job.status.ordinal(),
        version: job.version,
        creator: job.creator.clone(),
        organization: job.organization.clone(),
        dispatchable: job.dispatchable,
        job_load: job.job_load,
        date_created: job.date_created,
        date_started: job.date_started,
        date_completed: job.date_completed,
        parent_id: job.parent.unwrap_or(-1),
        root_id: job.root.unwrap_or(-1),
    };
    serde_xml_rs::to_string(&document).map_err(|e| RegistryError::Wire(e.to_string()))
}

/// Parse a job from the dispatch wire protocol.
pub fn from_xml(xml: &str) -> Result<Job> {
    let document: JobXml =
        serde_xml_rs::from_str(xml).map_err(|e| RegistryError::Wire(e.to_string()))?;
    let status = JobStatus::from_ordinal(document.status)
        .ok_or_else(|| RegistryError::Wire(format!("unknown status ordinal {}", document.status)))?;
    Ok(Job {
        id: document.id,
        job_type: document.job_type,
        operation: document.operation,
        arguments: document.arguments.argument,
        payload: document.payload,
        status,
        failure_reason: FailureReason::None,
        dispatchable: document.dispatchable,
        job_load: document.job_load,
        version: document.version,
        creator: document.creator,
        organization: document.organization,
        creator_host: String::new(),
        processor_host: None,
        parent: (document.parent_id >= 0).then_some(document.parent_id),
        root: (document.root_id >= 0).then_some(document.root_id),
        blocking_job: None,
        blocked_jobs: Vec::new(),
        date_created: document.date_created,
        date_started: document.date_started,
        date_completed: document.date_completed,
        queue_time: None,
        run_time: None,
        uri: None,
    })
}
