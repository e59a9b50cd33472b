// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `AIMServiceTemplate` reconciliation.
//!
//! A template needs to know which model artifacts its runtime loads. They are either
//! listed inline in `spec.modelSources` or found by a discovery job that runs the
//! model image in dry-run mode and prints a JSON result.
//!
//! # Discovery
//!
//! Discovery jobs are expensive, so they are admitted through the cluster-wide
//! [`DiscoverySemaphore`]. A template that cannot get a slot polls every few seconds.
//! A failed job is retried with exponential backoff tracked in `status.discovery`;
//! a change to any discovery input resets the attempt counter. A job whose pod
//! cannot pull its image never fails on its own, so it is deleted and counted as a
//! failed attempt.
//!
//! The job name embeds a hash of every input that shapes the job, so a spec change
//! produces a new job instead of an update of an immutable one. A job left over
//! from older inputs is deleted.
//!
//! # Caching
//!
//! With `spec.caching.enabled`, a ready template gets a shared `AIMTemplateCache`
//! named after it. The cache carries no owner reference and is found again through
//! its `templateName`.

use crate::constants::{
    DISCOVERY_BACKPRESSURE_REQUEUE_SECS, DISCOVERY_CONTAINER_NAME, DISCOVERY_JOB_BACKOFF_LIMIT,
    DISCOVERY_JOB_HASH_BYTES, DISCOVERY_JOB_PREFIX, DISCOVERY_JOB_RUN_AS_USER,
    DISCOVERY_JOB_TTL_SECS, FIELD_MANAGER_SERVICE_TEMPLATE, KUBERNETES_NAME_MAX_LENGTH,
};
use crate::context::Context;
use crate::crd::{
    best_of, AIMModelSource, AIMServiceTemplate, AIMServiceTemplateStatus, AIMStatus,
    AIMTemplateCache, AIMTemplateCacheSpec, DiscoveryState, ResolvedReference,
};
use crate::errors::PipelineError;
use crate::labels::{
    AIM_TEMPLATE_LABEL, AIM_TEMPLATE_UID_LABEL, COMPONENT_DISCOVERY, FINALIZER_SERVICE_TEMPLATE,
    K8S_COMPONENT, K8S_MANAGED_BY, K8S_PART_OF, MANAGED_BY_SERVICE_TEMPLATE, PART_OF_AIM_ENGINE,
};
use crate::naming::sanitize_label_value;
use crate::reconcilers::fetch::{fetch_list, FetchResult};
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
use crate::reconcilers::health::{aggregate_status, first_unhealthy, ComponentHealth};
use crate::reconcilers::jobs::{
    discovery_backoff_remaining, is_job_active, is_job_complete, is_job_failed,
    is_job_succeeded, job_created_at, job_failure_reason, job_health, newest_job,
};
use crate::reconcilers::pipeline::{DomainReconciler, Pipeline, PlanResult, RunOutcome};
use crate::reconcilers::pods::{
    is_image_pull_failure, list_job_pods, pods_health, succeeded_pod, COMPONENT_PODS,
};
use crate::reconcilers::resources::{DesiredObject, StaleObject};
use crate::reconcilers::semaphore::{job_key, DiscoverySemaphore};
use crate::reconcilers::status::ConditionManager;
use crate::status_reasons::{
    CONDITION_TYPE_DISCOVERED, CONDITION_TYPE_PROGRESSING, REASON_AWAITING_DISCOVERY,
    REASON_DISCOVERY_FAILED, REASON_DISCOVERY_JOB_CREATED, REASON_DISCOVERY_RUNNING,
    REASON_DISCOVERY_SUCCEEDED, REASON_DISCOVERY_THROTTLED, REASON_INLINE_MODEL_SOURCES,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EnvVar, Pod, PodSecurityContext, PodSpec, PodTemplateSpec,
    SeccompProfile, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ListParams, LogParams};
use kube::{Api, Client, ResourceExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Component name of the discovery job's health record.
const COMPONENT_DISCOVERY_JOB: &str = "discovery-job";
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

// ============================================================================
// Discovery job
// ============================================================================

/// Length-prefixed so that adjacent fields can never run into each other.
fn push_hash_field(input: &mut String, value: &str) {
    let _ = write!(input, "{}:{value}", value.len());
}

/// Hex-encoded prefix of the SHA-256 over every input that shapes the discovery job.
#[must_use]
pub fn discovery_spec_hash(template: &AIMServiceTemplate) -> String {
    let spec = &template.spec;
    let mut input = String::new();
    push_hash_field(&mut input, &spec.model_name);
    push_hash_field(&mut input, &spec.image);
    push_hash_field(&mut input, spec.service_account_name.as_deref().unwrap_or_default());
    push_hash_field(&mut input, &spec.env.len().to_string());
    for env in &spec.env {
        push_hash_field(&mut input, &env.name);
        push_hash_field(&mut input, env.value.as_deref().unwrap_or_default());
    }
    push_hash_field(&mut input, &spec.image_pull_secrets.len().to_string());
    for secret in &spec.image_pull_secrets {
        push_hash_field(&mut input, &secret.name);
    }

    let digest = Sha256::digest(input.as_bytes());
    digest
        .iter()
        .take(DISCOVERY_JOB_HASH_BYTES)
        .fold(String::with_capacity(DISCOVERY_JOB_HASH_BYTES * 2), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

/// `discover-<template>-<hash>`, with the template part cut so the name fits in 63
/// characters.
#[must_use]
pub fn discovery_job_name(template_name: &str, spec_hash: &str) -> String {
    let reserved = DISCOVERY_JOB_PREFIX.len() + 1 + spec_hash.len();
    let max_template = KUBERNETES_NAME_MAX_LENGTH.saturating_sub(reserved);
    let truncated: String = template_name.chars().take(max_template).collect();
    format!("{DISCOVERY_JOB_PREFIX}{truncated}-{spec_hash}")
}

fn discovery_labels(template: &AIMServiceTemplate) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_COMPONENT.to_string(), COMPONENT_DISCOVERY.to_string());
    labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_SERVICE_TEMPLATE.to_string());
    labels.insert(K8S_PART_OF.to_string(), PART_OF_AIM_ENGINE.to_string());
    labels.insert(AIM_TEMPLATE_LABEL.to_string(), template.name_any());
    labels
}

/// Build the discovery job for a template.
///
/// The job never retries its pod; retries are driven by the controller with
/// backoff so that a broken image does not hold a discovery slot for long.
#[must_use]
pub fn build_discovery_job(template: &AIMServiceTemplate) -> Job {
    let spec_hash = discovery_spec_hash(template);

    let mut env = vec![
        EnvVar {
            name: "AIM_LOG_LEVEL_ROOT".to_string(),
            value: Some("CRITICAL".to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "AIM_LOG_LEVEL".to_string(),
            value: Some("CRITICAL".to_string()),
            ..Default::default()
        },
    ];
    env.extend(template.spec.env.iter().cloned());

    let pull_secrets = if template.spec.image_pull_secrets.is_empty() {
        None
    } else {
        Some(template.spec.image_pull_secrets.clone())
    };

    let mut pod_labels = BTreeMap::new();
    pod_labels.insert(AIM_TEMPLATE_LABEL.to_string(), template.name_any());

    Job {
        metadata: ObjectMeta {
            name: Some(discovery_job_name(&template.name_any(), &spec_hash)),
            namespace: template.namespace(),
            labels: Some(discovery_labels(template)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(DISCOVERY_JOB_BACKOFF_LIMIT),
            ttl_seconds_after_finished: Some(DISCOVERY_JOB_TTL_SECS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    image_pull_secrets: pull_secrets,
                    service_account_name: template.spec.service_account_name.clone(),
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(true),
                        run_as_user: Some(DISCOVERY_JOB_RUN_AS_USER),
                        seccomp_profile: Some(SeccompProfile {
                            type_: "RuntimeDefault".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    containers: vec![Container {
                        name: DISCOVERY_CONTAINER_NAME.to_string(),
                        image: Some(template.spec.image.clone()),
                        args: Some(vec!["dry-run".to_string(), "--format=json".to_string()]),
                        env: Some(env),
                        security_context: Some(SecurityContext {
                            allow_privilege_escalation: Some(false),
                            run_as_non_root: Some(true),
                            capabilities: Some(Capabilities {
                                drop: Some(vec!["ALL".to_string()]),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Discovery output
// ============================================================================

/// Why a discovery job's output could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryOutputError {
    #[error("discovery output does not contain a JSON result array")]
    NoResults,

    #[error("discovery output contains an empty result array")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct DiscoveryResult {
    #[serde(default)]
    models: Vec<DiscoveredModel>,
}

#[derive(Debug, Deserialize)]
struct DiscoveredModel {
    name: String,
    source: String,
    #[serde(default)]
    size_gb: f64,
}

/// Model size in GiB as a binary quantity. Sizes that are not positive are dropped.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantity_from_gib(size_gb: f64) -> Option<Quantity> {
    if !size_gb.is_finite() || size_gb <= 0.0 {
        return None;
    }
    let bytes = (size_gb * BYTES_PER_GIB) as u64;
    if bytes == 0 {
        return None;
    }
    let formatted = [("Gi", 1u64 << 30), ("Mi", 1 << 20), ("Ki", 1 << 10)]
        .iter()
        .find(|(_, unit)| bytes % unit == 0)
        .map_or_else(|| bytes.to_string(), |(suffix, unit)| format!("{}{suffix}", bytes / unit));
    Some(Quantity(formatted))
}

fn parse_results(json: &str) -> Option<Vec<DiscoveryResult>> {
    serde_json::from_str::<Vec<DiscoveryResult>>(json).ok()
}

/// Last JSON array in `logs` that parses as a non-empty discovery result list.
fn last_result_array(logs: &str) -> Option<Vec<DiscoveryResult>> {
    let end = logs.rfind(']')?;
    let candidate = &logs[..=end];
    candidate
        .match_indices('[')
        .rev()
        .find_map(|(start, _)| parse_results(&candidate[start..]).filter(|r| !r.is_empty()))
}

/// Extract the model sources from a discovery container's log.
///
/// The log is normally one JSON array. When the image also prints other output, the
/// last JSON array that parses as a result list is used. Only the first result
/// is read.
///
/// # Errors
///
/// Returns [`DiscoveryOutputError`] when no result can be found.
pub fn parse_discovery_output(logs: &str) -> Result<Vec<AIMModelSource>, DiscoveryOutputError> {
    let results = parse_results(logs.trim())
        .or_else(|| last_result_array(logs))
        .ok_or(DiscoveryOutputError::NoResults)?;

    let first = results.into_iter().next().ok_or(DiscoveryOutputError::Empty)?;
    Ok(first
        .models
        .into_iter()
        .map(|model| AIMModelSource {
            name: model.name,
            source_uri: model.source,
            size: quantity_from_gib(model.size_gb),
        })
        .collect())
}

// ============================================================================
// Fetch / Observe
// ============================================================================

/// Raw reads for one template.
#[derive(Debug)]
pub struct ServiceTemplateFetched {
    /// Newest discovery job for the template. `NotFound` when discovery is not needed.
    pub job: FetchResult<Job>,
    /// Pods of that job. Empty when there is no job or they cannot be listed.
    pub pods: Vec<Pod>,
    /// Log of the discovery container, read once the job succeeded.
    pub discovery_logs: Option<String>,
    /// Template caches in the namespace.
    pub template_caches: Vec<AIMTemplateCache>,
    pub now: DateTime<Utc>,
}

/// Where a template stands in discovery.
#[derive(Clone, Debug, PartialEq)]
pub enum DiscoveryPhase {
    /// Model sources are listed in `spec.modelSources`.
    Inline,
    /// Discovery finished on an earlier pass.
    Complete,
    /// No job exists and a new attempt may start.
    Needed,
    /// The last attempt failed and the retry delay has not elapsed.
    BackingOff { remaining: Duration, attempts: i32 },
    /// The job exists and has not finished.
    Running { job_name: String, active: bool },
    /// The job succeeded but its output could not be read yet.
    AwaitingOutput { job_name: String },
    /// The job succeeded and its output was parsed.
    Succeeded {
        job_name: String,
        sources: Vec<AIMModelSource>,
    },
    /// The job succeeded but printed no usable result.
    OutputInvalid { job_name: String, message: String },
    /// The job failed, or its pods can never start.
    Failed {
        job_name: String,
        /// Condition reason.
        reason: String,
        message: String,
        created_at: Option<DateTime<Utc>>,
        /// `false` when the job is still running but stuck, so the plan deletes it.
        job_finished: bool,
    },
}

impl DiscoveryPhase {
    /// Whether discovery no longer needs a slot.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Inline
                | Self::Complete
                | Self::Succeeded { .. }
                | Self::OutputInvalid { .. }
                | Self::Failed { .. }
        )
    }
}

/// What the controller knows about one template.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceTemplateObservation {
    pub phase: DiscoveryPhase,
    /// Semaphore key of the template.
    pub job_key: String,
    pub spec_hash: String,
    /// Name the discovery job for the current inputs has.
    pub job_name: String,
    /// A discovery job created for older inputs.
    pub stale_job: Option<String>,
    /// Model sources known so far.
    pub model_sources: Vec<AIMModelSource>,
    pub caching_enabled: bool,
    /// Best template cache warming this template.
    pub template_cache: Option<ResolvedReference>,
    /// Health of the current discovery job: its pods first (while it runs), then
    /// the job itself. Empty when no job for the current inputs exists.
    pub health: Vec<ComponentHealth>,
    pub now: DateTime<Utc>,
}

impl ServiceTemplateObservation {
    /// Whether the template has its model sources this pass.
    #[must_use]
    pub fn sources_known(&self) -> bool {
        matches!(
            self.phase,
            DiscoveryPhase::Inline | DiscoveryPhase::Complete | DiscoveryPhase::Succeeded { .. }
        )
    }

    /// Overall status. `slot_held` tells whether a discovery job was admitted.
    #[must_use]
    pub fn overall(&self, slot_held: bool) -> AIMStatus {
        match &self.phase {
            DiscoveryPhase::Inline | DiscoveryPhase::Complete | DiscoveryPhase::Succeeded { .. } => {
                AIMStatus::Ready
            }
            DiscoveryPhase::Running { .. } => aggregate_status(&self.health),
            DiscoveryPhase::AwaitingOutput { .. } => AIMStatus::Progressing,
            DiscoveryPhase::Needed if slot_held => AIMStatus::Progressing,
            DiscoveryPhase::Needed => AIMStatus::Pending,
            DiscoveryPhase::BackingOff { .. }
            | DiscoveryPhase::OutputInvalid { .. }
            | DiscoveryPhase::Failed { .. } => AIMStatus::Failed,
        }
    }
}

/// Whether the controller has to look at discovery jobs for `template`.
#[must_use]
pub fn needs_discovery(template: &AIMServiceTemplate) -> bool {
    if !template.spec.model_sources.is_empty() {
        return false;
    }
    !discovery_complete(template)
}

fn discovery_complete(template: &AIMServiceTemplate) -> bool {
    template
        .status
        .as_ref()
        .is_some_and(|s| s.status == AIMStatus::Ready && !s.model_sources.is_empty())
}

/// Discovery bookkeeping that still applies to the current inputs.
///
/// Attempts counted against other inputs are forgotten.
#[must_use]
pub fn current_discovery_state(
    template: &AIMServiceTemplate,
    spec_hash: &str,
) -> Option<DiscoveryState> {
    template
        .status
        .as_ref()
        .and_then(|s| s.discovery.clone())
        .filter(|state| state.spec_hash.as_deref().is_none_or(|h| h == spec_hash))
}

fn best_template_cache(
    template: &AIMServiceTemplate,
    caches: &[AIMTemplateCache],
) -> Option<ResolvedReference> {
    let name = template.name_any();
    let matching: Vec<&AIMTemplateCache> = caches
        .iter()
        .filter(|tc| tc.spec.template_name == name)
        .collect();
    let status_of = |tc: &AIMTemplateCache| tc.status.as_ref().map(|s| s.status).unwrap_or_default();
    let best_status = best_of(matching.iter().map(|tc| status_of(*tc)))?;
    let best = matching.into_iter().find(|tc| status_of(*tc) == best_status)?;
    Some(ResolvedReference {
        name: best.name_any(),
        uid: best.uid().unwrap_or_default(),
        key: name,
        status: best_status,
    })
}

fn observe_job(
    job: &Job,
    discovery_logs: Option<&str>,
    pods: Option<&ComponentHealth>,
) -> DiscoveryPhase {
    let job_name = job.name_any();
    if is_job_succeeded(job) {
        match discovery_logs {
            None => DiscoveryPhase::AwaitingOutput { job_name },
            Some(logs) => match parse_discovery_output(logs) {
                Ok(sources) => DiscoveryPhase::Succeeded { job_name, sources },
                Err(err) => DiscoveryPhase::OutputInvalid {
                    job_name,
                    message: err.to_string(),
                },
            },
        }
    } else if is_job_failed(job) {
        DiscoveryPhase::Failed {
            job_name,
            reason: REASON_DISCOVERY_FAILED.to_string(),
            message: job_failure_reason(job),
            created_at: job_created_at(job),
            job_finished: true,
        }
    } else if let Some(pods) = pods.filter(|h| is_image_pull_failure(h)) {
        DiscoveryPhase::Failed {
            job_name,
            reason: pods.reason.clone(),
            message: pods.message.clone(),
            created_at: job_created_at(job),
            job_finished: false,
        }
    } else {
        DiscoveryPhase::Running {
            job_name,
            active: is_job_active(job),
        }
    }
}

/// Work out the discovery phase and cache binding of a template.
#[must_use]
pub fn observe_service_template(
    template: &AIMServiceTemplate,
    fetched: &ServiceTemplateFetched,
) -> ServiceTemplateObservation {
    let name = template.name_any();
    let spec_hash = discovery_spec_hash(template);
    let job_name = discovery_job_name(&name, &spec_hash);
    let persisted_sources = template
        .status
        .as_ref()
        .map(|s| s.model_sources.clone())
        .unwrap_or_default();

    let current_job = fetched.job.value().filter(|job| job.name_any() == job_name);
    let stale_job = fetched
        .job
        .value()
        .map(ResourceExt::name_any)
        .filter(|existing| *existing != job_name);

    let discovering = template.spec.model_sources.is_empty() && !discovery_complete(template);
    let mut health = Vec::new();
    if let Some(job) = current_job.filter(|_| discovering) {
        if !fetched.pods.is_empty() && !is_job_complete(job) {
            health.push(pods_health(&fetched.pods));
        }
        health.push(fetched.job.to_downstream_health(COMPONENT_DISCOVERY_JOB, |j| {
            job_health(
                j,
                REASON_DISCOVERY_SUCCEEDED,
                REASON_DISCOVERY_FAILED,
                REASON_DISCOVERY_RUNNING,
            )
        }));
    }
    let pods = health.iter().find(|h| h.component == COMPONENT_PODS);

    let (phase, model_sources) = if !template.spec.model_sources.is_empty() {
        (DiscoveryPhase::Inline, template.spec.model_sources.clone())
    } else if discovery_complete(template) {
        (DiscoveryPhase::Complete, persisted_sources)
    } else if let Some(job) = current_job {
        let phase = observe_job(job, fetched.discovery_logs.as_deref(), pods);
        let sources = match &phase {
            DiscoveryPhase::Succeeded { sources, .. } => sources.clone(),
            _ => persisted_sources,
        };
        (phase, sources)
    } else {
        let state = current_discovery_state(template, &spec_hash);
        let phase = match discovery_backoff_remaining(state.as_ref(), fetched.now) {
            Some(remaining) => DiscoveryPhase::BackingOff {
                remaining,
                attempts: state.map_or(0, |s| s.attempts),
            },
            None => DiscoveryPhase::Needed,
        };
        (phase, persisted_sources)
    };

    let caching_enabled = template.spec.caching.as_ref().is_some_and(|c| c.enabled);

    ServiceTemplateObservation {
        phase,
        job_key: job_key(&template.namespace().unwrap_or_default(), &name),
        spec_hash,
        job_name,
        stale_job,
        model_sources,
        caching_enabled,
        template_cache: best_template_cache(template, &fetched.template_caches),
        health,
        now: fetched.now,
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Build the shared template cache for a ready template.
#[must_use]
pub fn build_template_cache(template: &AIMServiceTemplate) -> AIMTemplateCache {
    let name = template.name_any();
    let mut labels = BTreeMap::new();
    labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_SERVICE_TEMPLATE.to_string());
    labels.insert(K8S_PART_OF.to_string(), PART_OF_AIM_ENGINE.to_string());
    labels.insert(AIM_TEMPLATE_LABEL.to_string(), sanitize_label_value(&name));
    if let Some(uid) = template.uid() {
        labels.insert(AIM_TEMPLATE_UID_LABEL.to_string(), uid);
    }

    let caching = template.spec.caching.as_ref();
    let mut cache = AIMTemplateCache::new(
        &name,
        AIMTemplateCacheSpec {
            template_name: name.clone(),
            storage_class_name: caching.and_then(|c| c.storage_class_name.clone()),
            env: template.spec.env.clone(),
            image_pull_secrets: template.spec.image_pull_secrets.clone(),
        },
    );
    cache.metadata.namespace = template.namespace();
    cache.metadata.labels = Some(labels);
    cache
}

/// Desired children of a template, taking a discovery slot when a job must start.
///
/// Finished discovery gives its slot back. A slot held while backing off, with no
/// job left, is an orphan and is released.
///
/// # Errors
///
/// Returns an error if a child cannot be serialized.
pub fn plan_service_template(
    template: &AIMServiceTemplate,
    observation: &ServiceTemplateObservation,
    semaphore: &Arc<DiscoverySemaphore>,
) -> Result<PlanResult, PipelineError> {
    let mut plan = PlanResult::empty();
    let key = &observation.job_key;

    if let Some(stale) = &observation.stale_job {
        debug!(job = %stale, "Deleting discovery job built from older inputs");
        plan.delete.push(StaleObject::of::<Job>(stale.clone()));
    }
    if let DiscoveryPhase::Failed {
        job_name,
        message,
        job_finished: false,
        ..
    } = &observation.phase
    {
        info!(job = %job_name, reason = %message, "Deleting discovery job whose pods cannot start");
        plan.delete.push(StaleObject::of::<Job>(job_name.clone()));
    }

    if observation.phase.is_finished() && semaphore.release(key) {
        debug!(key = %key, "Released discovery slot");
    }

    match &observation.phase {
        DiscoveryPhase::BackingOff { remaining, .. } => {
            semaphore.release_orphaned_slot(key, false, false);
            plan = plan.requeue_after(*remaining);
        }
        DiscoveryPhase::Needed => match semaphore.acquire_guard(key) {
            Some(guard) => {
                info!(key = %key, job = %observation.job_name, "Admitted discovery job");
                plan = plan.with(DesiredObject::owned(&build_discovery_job(template))?);
                plan.slot = Some(guard);
            }
            None => {
                debug!(
                    key = %key,
                    capacity = semaphore.capacity(),
                    "Discovery slots exhausted, polling"
                );
                plan = plan.requeue_after(Duration::from_secs(DISCOVERY_BACKPRESSURE_REQUEUE_SECS));
            }
        },
        _ => {}
    }

    if observation.caching_enabled
        && observation.sources_known()
        && !observation.model_sources.is_empty()
        && observation.template_cache.is_none()
    {
        plan = plan.with(DesiredObject::shared(&build_template_cache(template))?);
    }

    Ok(plan)
}

// ============================================================================
// DecorateStatus
// ============================================================================

/// Count a failed job once, however many passes observe it.
fn record_failure(
    state: &mut DiscoveryState,
    job_name: &str,
    reason: &str,
    created_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) {
    let last_attempt = state
        .last_attempt_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    let is_new = match (last_attempt, created_at) {
        (None, _) => true,
        (Some(last), Some(created)) => created > last,
        (Some(_), None) => state.last_job_name.as_deref() != Some(job_name),
    };
    if is_new {
        state.attempts += 1;
        state.last_attempt_time = Some(now.to_rfc3339());
        state.last_failure_reason = Some(reason.to_string());
    }
    state.last_job_name = Some(job_name.to_string());
}

/// Project the observation onto status and conditions.
///
/// `slot_held` tells whether the template holds a discovery slot after the plan ran.
pub fn decorate_service_template(
    template: &AIMServiceTemplate,
    observation: &ServiceTemplateObservation,
    slot_held: bool,
    status: &mut AIMServiceTemplateStatus,
    conditions: &mut ConditionManager,
) {
    let mut state = current_discovery_state(template, &observation.spec_hash).unwrap_or_default();
    state.spec_hash = Some(observation.spec_hash.clone());

    match &observation.phase {
        DiscoveryPhase::Inline => {
            conditions.mark_true(
                CONDITION_TYPE_DISCOVERED,
                REASON_INLINE_MODEL_SOURCES,
                "Model sources provided in spec",
            );
            conditions.mark_false(
                CONDITION_TYPE_PROGRESSING,
                REASON_INLINE_MODEL_SOURCES,
                "Discovery not needed",
            );
        }
        DiscoveryPhase::Complete => {
            conditions.mark_true(
                CONDITION_TYPE_DISCOVERED,
                REASON_DISCOVERY_SUCCEEDED,
                "Model sources discovered",
            );
            conditions.mark_false(
                CONDITION_TYPE_PROGRESSING,
                REASON_DISCOVERY_SUCCEEDED,
                "Discovery finished",
            );
        }
        DiscoveryPhase::Succeeded { job_name, sources } => {
            state.last_job_name = Some(job_name.clone());
            conditions.mark_true(
                CONDITION_TYPE_DISCOVERED,
                REASON_DISCOVERY_SUCCEEDED,
                &format!("Discovery job {job_name} found {} model sources", sources.len()),
            );
            conditions.mark_false(
                CONDITION_TYPE_PROGRESSING,
                REASON_DISCOVERY_SUCCEEDED,
                "Discovery finished",
            );
        }
        DiscoveryPhase::Running { job_name, active } => {
            state.last_job_name = Some(job_name.clone());
            let pods = first_unhealthy(&observation.health).filter(|h| h.component == COMPONENT_PODS);
            let (reason, message) = match pods {
                Some(pods) => (
                    pods.reason.as_str(),
                    format!("Discovery job {job_name}: {}", pods.message),
                ),
                None if *active => (
                    REASON_DISCOVERY_RUNNING,
                    format!("Discovery job {job_name} is running"),
                ),
                None => (
                    REASON_DISCOVERY_RUNNING,
                    format!("Discovery job {job_name} is waiting for pods"),
                ),
            };
            conditions.mark_false(CONDITION_TYPE_DISCOVERED, reason, &message);
            conditions.mark_true(CONDITION_TYPE_PROGRESSING, reason, &message);
        }
        DiscoveryPhase::AwaitingOutput { job_name } => {
            state.last_job_name = Some(job_name.clone());
            let message = format!("Waiting for the output of discovery job {job_name}");
            conditions.mark_false(CONDITION_TYPE_DISCOVERED, REASON_DISCOVERY_RUNNING, &message);
            conditions.mark_true(CONDITION_TYPE_PROGRESSING, REASON_DISCOVERY_RUNNING, &message);
        }
        DiscoveryPhase::OutputInvalid { job_name, message } => {
            state.last_job_name = Some(job_name.clone());
            let message = format!("Discovery job {job_name} succeeded but {message}");
            conditions.mark_false(CONDITION_TYPE_DISCOVERED, REASON_DISCOVERY_FAILED, &message);
            conditions.mark_false(CONDITION_TYPE_PROGRESSING, REASON_DISCOVERY_FAILED, &message);
        }
        DiscoveryPhase::Failed {
            job_name,
            reason,
            message,
            created_at,
            ..
        } => {
            record_failure(&mut state, job_name, message, *created_at, observation.now);
            let message = format!(
                "Discovery job {job_name} failed (attempt {}): {message}",
                state.attempts
            );
            conditions.mark_false(CONDITION_TYPE_DISCOVERED, reason, &message);
            conditions.mark_false(CONDITION_TYPE_PROGRESSING, reason, &message);
        }
        DiscoveryPhase::BackingOff {
            remaining,
            attempts,
        } => {
            let message = format!(
                "Waiting {}s before retry (attempt {attempts} failed)",
                remaining.as_secs().max(1)
            );
            conditions.mark_false(CONDITION_TYPE_DISCOVERED, REASON_AWAITING_DISCOVERY, &message);
            conditions.mark_false(CONDITION_TYPE_PROGRESSING, REASON_AWAITING_DISCOVERY, &message);
        }
        DiscoveryPhase::Needed if slot_held => {
            let message = format!("Discovery job {} created", observation.job_name);
            conditions.mark_false(CONDITION_TYPE_DISCOVERED, REASON_DISCOVERY_JOB_CREATED, &message);
            conditions.mark_true(CONDITION_TYPE_PROGRESSING, REASON_DISCOVERY_JOB_CREATED, &message);
        }
        DiscoveryPhase::Needed => {
            let message = "Every discovery slot is in use, waiting for one to free up";
            conditions.mark_false(CONDITION_TYPE_DISCOVERED, REASON_DISCOVERY_THROTTLED, message);
            conditions.mark_false(CONDITION_TYPE_PROGRESSING, REASON_DISCOVERY_THROTTLED, message);
        }
    }

    status.discovery = match observation.phase {
        DiscoveryPhase::Inline => None,
        _ => Some(state),
    };
    status.model_sources = observation.model_sources.clone();
    status.template_cache = observation.template_cache.clone();
    status.status = observation.overall(slot_held);
}

// ============================================================================
// Reconciler
// ============================================================================

/// [`DomainReconciler`] for `AIMServiceTemplate`.
pub struct ServiceTemplateReconciler {
    client: Client,
    semaphore: Arc<DiscoverySemaphore>,
}

impl ServiceTemplateReconciler {
    #[must_use]
    pub fn new(client: Client, semaphore: Arc<DiscoverySemaphore>) -> Self {
        Self { client, semaphore }
    }

    /// Log of the discovery container of a succeeded job.
    ///
    /// `None` when no succeeded pod is left or the log cannot be read; the next
    /// pass tries again.
    async fn discovery_logs(&self, namespace: &str, pods: &[Pod]) -> Option<String> {
        let pod = succeeded_pod(pods)?;
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(DISCOVERY_CONTAINER_NAME.to_string()),
            ..Default::default()
        };
        match pod_api.logs(&pod.name_any(), &params).await {
            Ok(logs) => Some(logs),
            Err(err) => {
                warn!(pod = %pod.name_any(), error = %err, "Failed to read discovery output");
                None
            }
        }
    }
}

#[async_trait]
impl DomainReconciler for ServiceTemplateReconciler {
    type Resource = AIMServiceTemplate;
    type Status = AIMServiceTemplateStatus;
    type Fetched = ServiceTemplateFetched;
    type Observation = ServiceTemplateObservation;

    fn field_manager(&self) -> &'static str {
        FIELD_MANAGER_SERVICE_TEMPLATE
    }

    fn required_conditions(&self) -> &'static [&'static str] {
        &[CONDITION_TYPE_DISCOVERED]
    }

    fn status(resource: &AIMServiceTemplate) -> Option<&AIMServiceTemplateStatus> {
        resource.status.as_ref()
    }

    async fn fetch(&self, template: &AIMServiceTemplate) -> Result<ServiceTemplateFetched, PipelineError> {
        let namespace = template.namespace().unwrap_or_default();
        let name = template.name_any();

        let mut job = FetchResult::NotFound;
        let mut pods = Vec::new();
        let mut discovery_logs = None;
        if needs_discovery(template) {
            let job_api: Api<Job> = Api::namespaced(self.client.clone(), &namespace);
            let params = ListParams::default().labels(&format!(
                "{AIM_TEMPLATE_LABEL}={name},{K8S_COMPONENT}={COMPONENT_DISCOVERY}"
            ));
            job = match fetch_list(&job_api, &params).await {
                FetchResult::Found(jobs) => newest_job(jobs).map_or(FetchResult::NotFound, FetchResult::Found),
                FetchResult::NotFound => FetchResult::NotFound,
                FetchResult::Failed(source) => {
                    return Err(PipelineError::Fetch {
                        what: "discovery jobs".to_string(),
                        source,
                    })
                }
            };

            if let Some(found) = job.value() {
                pods = list_job_pods(&self.client, &namespace, &found.name_any()).await;
                if is_job_succeeded(found) {
                    discovery_logs = self.discovery_logs(&namespace, &pods).await;
                }
            }
        }

        let mut template_caches = Vec::new();
        if template.spec.caching.as_ref().is_some_and(|c| c.enabled) {
            let cache_api: Api<AIMTemplateCache> = Api::namespaced(self.client.clone(), &namespace);
            template_caches = match fetch_list(&cache_api, &ListParams::default()).await {
                FetchResult::Found(items) => items,
                FetchResult::NotFound => Vec::new(),
                FetchResult::Failed(source) => {
                    return Err(PipelineError::Fetch {
                        what: "template caches".to_string(),
                        source,
                    })
                }
            };
        }

        Ok(ServiceTemplateFetched {
            job,
            pods,
            discovery_logs,
            template_caches,
            now: Utc::now(),
        })
    }

    fn observe(
        &self,
        template: &AIMServiceTemplate,
        fetched: ServiceTemplateFetched,
    ) -> ServiceTemplateObservation {
        observe_service_template(template, &fetched)
    }

    fn plan(
        &self,
        template: &AIMServiceTemplate,
        observation: &ServiceTemplateObservation,
    ) -> Result<PlanResult, PipelineError> {
        plan_service_template(template, observation, &self.semaphore)
    }

    fn decorate_status(
        &self,
        template: &AIMServiceTemplate,
        observation: &ServiceTemplateObservation,
        status: &mut AIMServiceTemplateStatus,
        conditions: &mut ConditionManager,
    ) {
        let slot_held = self.semaphore.is_held(&observation.job_key);
        decorate_service_template(template, observation, slot_held, status, conditions);
    }
}

#[async_trait]
impl FinalizerCleanup for AIMServiceTemplate {
    async fn cleanup(&self, ctx: &Context) -> Result<()> {
        let key = job_key(&self.namespace().unwrap_or_default(), &self.name_any());
        if ctx.semaphore.release(&key) {
            info!(key = %key, "Released discovery slot of deleted template");
        }
        Ok(())
    }
}

/// Run one reconcile pass over a template.
///
/// A template being deleted gives back its discovery slot and loses its finalizer;
/// `None` is returned for that pass.
///
/// # Errors
///
/// Returns an error if the finalizer cannot be managed, or if a required read, an
/// apply or the status patch fails. Pipeline failures keep their
/// [`PipelineError`] type inside the `anyhow::Error`.
pub async fn reconcile_aimservicetemplate(
    ctx: &Context,
    template: &AIMServiceTemplate,
) -> Result<Option<RunOutcome>> {
    if template.metadata.deletion_timestamp.is_some() {
        handle_deletion(ctx, template, FINALIZER_SERVICE_TEMPLATE).await?;
        return Ok(None);
    }

    ensure_finalizer(&ctx.client, template, FINALIZER_SERVICE_TEMPLATE).await?;

    let outcome = Pipeline::new(
        ServiceTemplateReconciler::new(ctx.client.clone(), Arc::clone(&ctx.semaphore)),
        ctx.writer(),
        ctx.reconcile_timeout,
    )
    .run(template)
    .await?;
    Ok(Some(outcome))
}

#[cfg(test)]
#[path = "aimservicetemplate_tests.rs"]
mod aimservicetemplate_tests;
