// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Helpers for the batch jobs the AIM controllers run.
//!
//! Both discovery jobs (`AIMServiceTemplate`) and download jobs (`AIMModelCache`)
//! are plain `batch/v1` Jobs. Their progress is read from the job's conditions and
//! counters; only the result of a finished discovery job comes from its pod log.

use crate::constants::{DISCOVERY_BASE_BACKOFF_SECS, DISCOVERY_MAX_BACKOFF_SECS};
use crate::crd::{AIMStatus, DiscoveryState};
use crate::reconcilers::health::ComponentHealth;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use std::time::Duration;

const JOB_CONDITION_COMPLETE: &str = "Complete";
const JOB_CONDITION_FAILED: &str = "Failed";

fn has_condition(job: &Job, condition_type: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == condition_type && c.status == "True")
        })
}

/// Whether the job finished successfully.
#[must_use]
pub fn is_job_succeeded(job: &Job) -> bool {
    has_condition(job, JOB_CONDITION_COMPLETE)
}

/// Whether the job finished unsuccessfully.
#[must_use]
pub fn is_job_failed(job: &Job) -> bool {
    has_condition(job, JOB_CONDITION_FAILED)
}

/// Whether the job finished, successfully or not.
#[must_use]
pub fn is_job_complete(job: &Job) -> bool {
    is_job_succeeded(job) || is_job_failed(job)
}

/// Whether the job has running pods.
#[must_use]
pub fn is_job_active(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.active)
        .is_some_and(|active| active > 0)
}

/// Human-readable failure reason of a failed job.
///
/// Prefers the `Failed` condition's message over its reason.
#[must_use]
pub fn job_failure_reason(job: &Job) -> String {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == JOB_CONDITION_FAILED && c.status == "True")
        })
        .and_then(|c| {
            c.message
                .clone()
                .filter(|m| !m.is_empty())
                .or_else(|| c.reason.clone().filter(|r| !r.is_empty()))
        })
        .unwrap_or_else(|| "Unknown failure".to_string())
}

/// When the job object was created.
#[must_use]
pub fn job_created_at(job: &Job) -> Option<DateTime<Utc>> {
    job.metadata
        .creation_timestamp
        .as_ref()
        .and_then(|t| DateTime::from_timestamp(t.0.as_second(), t.0.subsec_nanosecond() as u32))
}

/// The most recently created job. Jobs without a creation timestamp sort first.
#[must_use]
pub fn newest_job(jobs: Vec<Job>) -> Option<Job> {
    jobs.into_iter().max_by_key(job_created_at)
}

/// Health of a job the resource created.
///
/// A finished job is `Ready` or `Failed`, a job with running pods is `Progressing`,
/// anything else (pods not scheduled yet) is `Pending`.
#[must_use]
pub fn job_health(
    job: &Job,
    succeeded_reason: &str,
    failed_reason: &str,
    running_reason: &str,
) -> ComponentHealth {
    let name = job.metadata.name.as_deref().unwrap_or_default();
    if is_job_succeeded(job) {
        ComponentHealth::new(
            "job",
            AIMStatus::Ready,
            succeeded_reason,
            format!("Job {name} completed"),
        )
    } else if is_job_failed(job) {
        ComponentHealth::new("job", AIMStatus::Failed, failed_reason, job_failure_reason(job))
    } else if is_job_active(job) {
        ComponentHealth::new(
            "job",
            AIMStatus::Progressing,
            running_reason,
            format!("Job {name} is running"),
        )
    } else {
        ComponentHealth::new(
            "job",
            AIMStatus::Pending,
            running_reason,
            format!("Job {name} is waiting for pods"),
        )
    }
}

/// Delay before retry number `attempts + 1` of a failed operation.
///
/// `base * 2^(attempts - 1)`, capped at the maximum. Zero attempts means no delay.
#[must_use]
pub fn calculate_backoff_duration(attempts: i32) -> Duration {
    if attempts <= 0 {
        return Duration::ZERO;
    }
    let exponent = u32::try_from(attempts - 1).unwrap_or(u32::MAX).min(16);
    let secs = DISCOVERY_BASE_BACKOFF_SECS
        .saturating_mul(1u64 << exponent)
        .min(DISCOVERY_MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// Time left before another discovery attempt is allowed, or `None` if one may
/// start now.
///
/// There is no wait without a recorded failure. A last attempt time that cannot
/// be parsed does not block.
#[must_use]
pub fn discovery_backoff_remaining(
    state: Option<&DiscoveryState>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let state = state.filter(|s| s.attempts > 0)?;
    let last_attempt = state
        .last_attempt_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())?
        .with_timezone(&Utc);

    let backoff = chrono::Duration::from_std(calculate_backoff_duration(state.attempts)).ok()?;
    let remaining = (last_attempt + backoff) - now;
    remaining
        .to_std()
        .ok()
        .filter(|remaining| !remaining.is_zero())
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod jobs_tests;
