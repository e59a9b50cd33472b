// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `AIMModelCache` reconciliation.
//!
//! A model cache owns two children:
//!
//! - a PVC (`<name>-cache`) sized from `spec.size`, created once and never updated
//!   because storage class and size are immutable after provisioning
//! - a download job (`<name>-cache-download`) that pulls `spec.sourceUri` into the
//!   PVC, created once the PVC is bound (or pending on a `WaitForFirstConsumer`
//!   storage class, where the job's pod triggers binding)
//!
//! The cache is `Ready` when the PVC is bound and the download job succeeded.

use crate::constants::{
    CACHE_MOUNT_PATH, DEFAULT_DOWNLOAD_IMAGE, DOWNLOAD_JOB_BACKOFF_LIMIT, DOWNLOAD_JOB_RUN_AS_USER,
    DOWNLOAD_JOB_TTL_SECS, FIELD_MANAGER_MODEL_CACHE, SUPPORTED_SOURCE_SCHEMES,
};
use crate::context::Context;
use crate::crd::{AIMModelCache, AIMModelCacheStatus, AIMStatus};
use crate::errors::PipelineError;
use crate::labels::{
    AIM_MODEL_CACHE_LABEL, AIM_SOURCE_MODEL_LABEL, COMPONENT_MODEL_CACHE, K8S_COMPONENT,
    K8S_MANAGED_BY, K8S_PART_OF, MANAGED_BY_MODEL_CACHE, PART_OF_AIM_ENGINE,
};
use crate::naming::{generate_derived_name, sanitize_label_value};
use crate::reconcilers::fetch::{fetch_optional, FetchResult};
use crate::reconcilers::health::{aggregate_status, ComponentHealth};
use crate::reconcilers::jobs::{
    is_job_complete, is_job_failed, is_job_succeeded, job_failure_reason, job_health,
};
use crate::reconcilers::pipeline::{DomainReconciler, Pipeline, PlanResult, RunOutcome};
use crate::reconcilers::pods::{list_job_pods, pods_health, COMPONENT_PODS};
use crate::reconcilers::resources::DesiredObject;
use crate::reconcilers::status::ConditionManager;
use crate::status_reasons::{
    CONDITION_TYPE_DOWNLOADED, CONDITION_TYPE_FAILURE, CONDITION_TYPE_PROGRESSING,
    CONDITION_TYPE_STORAGE_READY, REASON_DOWNLOADING, REASON_DOWNLOAD_FAILED,
    REASON_INVALID_SOURCE_URI, REASON_NO_FAILURE, REASON_PVC_BOUND, REASON_PVC_LOST,
    REASON_PVC_PENDING, REASON_PVC_PROVISIONING, REASON_WARM,
};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, PersistentVolumeClaim, Pod,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec,
    PodTemplateSpec, SecurityContext, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

const PVC_PHASE_BOUND: &str = "Bound";
const PVC_PHASE_PENDING: &str = "Pending";
const PVC_PHASE_LOST: &str = "Lost";
const BINDING_MODE_WAIT_FOR_FIRST_CONSUMER: &str = "WaitForFirstConsumer";

const COMPONENT_PVC: &str = "pvc";
const COMPONENT_DOWNLOAD_JOB: &str = "download-job";
const TMP_VOLUME_SIZE: &str = "500Mi";

/// Why a `sourceUri` cannot be downloaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceUriError {
    #[error("sourceUri {uri:?} is not a valid URL: {reason}")]
    Malformed { uri: String, reason: String },

    #[error("sourceUri scheme {scheme:?} is not supported (expected one of: hf, s3)")]
    UnsupportedScheme { scheme: String },

    #[error("sourceUri {uri:?} does not name a model")]
    MissingModel { uri: String },
}

/// Check that `uri` is an `hf://` or `s3://` URL naming a model.
///
/// # Errors
///
/// Returns a [`SourceUriError`] describing the first problem found.
pub fn validate_source_uri(uri: &str) -> Result<(), SourceUriError> {
    let parsed = Url::parse(uri).map_err(|err| SourceUriError::Malformed {
        uri: uri.to_string(),
        reason: err.to_string(),
    })?;

    if !SUPPORTED_SOURCE_SCHEMES.contains(&parsed.scheme()) {
        return Err(SourceUriError::UnsupportedScheme {
            scheme: parsed.scheme().to_string(),
        });
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(SourceUriError::MissingModel {
            uri: uri.to_string(),
        });
    }
    Ok(())
}

/// Model part of a source URI (`hf://amd/Llama-3.1-8B` gives `amd/Llama-3.1-8B`).
#[must_use]
pub fn model_from_source_uri(uri: &str) -> &str {
    uri.split_once("://").map_or(uri, |(_, rest)| rest)
}

/// Name of the PVC holding the cache.
///
/// # Errors
///
/// Returns an error if `cache_name` is empty.
pub fn pvc_name(cache_name: &str) -> Result<String, PipelineError> {
    generate_derived_name(&[cache_name, "cache"], &[])
        .map_err(|err| PipelineError::Invariant(err.to_string()))
}

/// Name of the download job.
///
/// # Errors
///
/// Returns an error if `cache_name` is empty.
pub fn download_job_name(cache_name: &str) -> Result<String, PipelineError> {
    generate_derived_name(&[cache_name, "cache-download"], &[])
        .map_err(|err| PipelineError::Invariant(err.to_string()))
}

fn cache_labels(cache: &AIMModelCache) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_MODEL_CACHE.to_string());
    labels.insert(K8S_PART_OF.to_string(), PART_OF_AIM_ENGINE.to_string());
    labels.insert(K8S_COMPONENT.to_string(), COMPONENT_MODEL_CACHE.to_string());
    labels.insert(
        AIM_MODEL_CACHE_LABEL.to_string(),
        sanitize_label_value(&cache.name_any()),
    );
    labels
}

/// Build the cache PVC.
///
/// # Errors
///
/// Returns an error if the PVC name cannot be derived.
pub fn build_pvc(cache: &AIMModelCache) -> Result<PersistentVolumeClaim, PipelineError> {
    let mut labels = cache_labels(cache);
    labels.insert(
        AIM_SOURCE_MODEL_LABEL.to_string(),
        sanitize_label_value(model_from_source_uri(&cache.spec.source_uri)),
    );

    let storage_class_name = cache
        .spec
        .storage_class_name
        .clone()
        .filter(|sc| !sc.is_empty());

    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(pvc_name(&cache.name_any())?),
            namespace: cache.namespace(),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    cache.spec.size.clone(),
                )])),
                ..Default::default()
            }),
            storage_class_name,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Shell script run by the download container.
fn download_script(source_uri: &str) -> String {
    format!(
        r#"python /storage-initializer/scripts/initializer-entrypoint {source_uri} {CACHE_MOUNT_PATH} &&
(
echo "Cleaning up HF cache to save space..."
rm -rf {CACHE_MOUNT_PATH}/.hf/xet/*/chunk-cache 2>/dev/null || true
rm -rf {CACHE_MOUNT_PATH}/.hf/xet/*/staging 2>/dev/null || true
echo "Final storage usage:"
du -sh {CACHE_MOUNT_PATH}
)"#
    )
}

/// Build the download job.
///
/// User env vars come first; the fixed download settings follow them.
///
/// # Errors
///
/// Returns an error if the job or PVC name cannot be derived.
pub fn build_download_job(cache: &AIMModelCache) -> Result<Job, PipelineError> {
    let name = cache.name_any();
    let image = cache
        .spec
        .model_download_image
        .clone()
        .filter(|image| !image.is_empty())
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_IMAGE.to_string());

    let mut env = cache.spec.env.clone();
    for (key, value) in [
        ("HF_HUB_DISABLE_XET", "1".to_string()),
        ("HF_HOME", format!("{CACHE_MOUNT_PATH}/.hf")),
        ("UMASK", "0022".to_string()),
    ] {
        env.push(EnvVar {
            name: key.to_string(),
            value: Some(value),
            ..Default::default()
        });
    }

    let pull_secrets = if cache.spec.image_pull_secrets.is_empty() {
        None
    } else {
        Some(cache.spec.image_pull_secrets.clone())
    };

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(download_job_name(&name)?),
            namespace: cache.namespace(),
            labels: Some(cache_labels(cache)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(DOWNLOAD_JOB_BACKOFF_LIMIT),
            ttl_seconds_after_finished: Some(DOWNLOAD_JOB_TTL_SECS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(cache_labels(cache)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    security_context: Some(PodSecurityContext {
                        run_as_user: Some(DOWNLOAD_JOB_RUN_AS_USER),
                        run_as_group: Some(DOWNLOAD_JOB_RUN_AS_USER),
                        fs_group: Some(DOWNLOAD_JOB_RUN_AS_USER),
                        run_as_non_root: Some(true),
                        ..Default::default()
                    }),
                    image_pull_secrets: pull_secrets,
                    volumes: Some(vec![
                        Volume {
                            name: "cache".to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: pvc_name(&name)?,
                                read_only: None,
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "tmp".to_string(),
                            empty_dir: Some(EmptyDirVolumeSource {
                                size_limit: Some(Quantity(TMP_VOLUME_SIZE.to_string())),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    containers: vec![Container {
                        name: "model-download".to_string(),
                        image: Some(image),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        security_context: Some(SecurityContext {
                            run_as_user: Some(DOWNLOAD_JOB_RUN_AS_USER),
                            run_as_group: Some(DOWNLOAD_JOB_RUN_AS_USER),
                            ..Default::default()
                        }),
                        env: Some(env),
                        command: Some(vec!["/bin/sh".to_string()]),
                        args: Some(vec![
                            "-c".to_string(),
                            download_script(&cache.spec.source_uri),
                        ]),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: "cache".to_string(),
                                mount_path: CACHE_MOUNT_PATH.to_string(),
                                ..Default::default()
                            },
                            VolumeMount {
                                name: "tmp".to_string(),
                                mount_path: "/tmp".to_string(),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

// ============================================================================
// Fetch / Observe
// ============================================================================

/// Raw reads for one model cache.
#[derive(Debug)]
pub struct ModelCacheFetched {
    pub pvc: FetchResult<PersistentVolumeClaim>,
    pub job: FetchResult<Job>,
    /// Pods of the download job while it runs.
    pub pods: Vec<Pod>,
    /// Storage class of the PVC. Read failures are tolerated.
    pub storage_class: FetchResult<StorageClass>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PvcObservation {
    pub name: Option<String>,
    pub phase: Option<String>,
}

impl PvcObservation {
    #[must_use]
    pub fn found(&self) -> bool {
        self.name.is_some()
    }

    #[must_use]
    pub fn bound(&self) -> bool {
        self.phase.as_deref() == Some(PVC_PHASE_BOUND)
    }

    #[must_use]
    pub fn pending(&self) -> bool {
        self.phase.as_deref() == Some(PVC_PHASE_PENDING)
    }

    #[must_use]
    pub fn lost(&self) -> bool {
        self.phase.as_deref() == Some(PVC_PHASE_LOST)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadObservation {
    pub found: bool,
    pub succeeded: bool,
    pub failed: bool,
    pub failure_message: Option<String>,
}

/// What the controller knows about one model cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelCacheObservation {
    pub source_error: Option<SourceUriError>,
    pub pvc: PvcObservation,
    pub download: DownloadObservation,
    pub wait_for_first_consumer: bool,
    /// The PVC, the download job once it exists or may be created, then the job's
    /// pods while it runs.
    pub health: Vec<ComponentHealth>,
}

impl ModelCacheObservation {
    /// Whether the download job may be created now.
    #[must_use]
    pub fn can_create_job(&self) -> bool {
        self.source_error.is_none()
            && (self.pvc.bound() || (self.pvc.pending() && self.wait_for_first_consumer))
    }

    #[must_use]
    pub fn ready(&self) -> bool {
        self.pvc.bound() && self.download.succeeded
    }

    #[must_use]
    pub fn health_of(&self, component: &str) -> Option<&ComponentHealth> {
        self.health.iter().find(|h| h.component == component)
    }

    /// A pod of the download job that can never finish.
    #[must_use]
    pub fn pod_failure(&self) -> Option<&ComponentHealth> {
        self.health_of(COMPONENT_PODS)
            .filter(|h| h.state == AIMStatus::Failed)
    }

    /// Overall status of the cache.
    ///
    /// The worst of the child health records. A `Pending` result is raised to
    /// `Progressing` while the controller is still creating children: the PVC is
    /// not bound yet (and not lost), or the download job is about to be created.
    #[must_use]
    pub fn overall(&self) -> AIMStatus {
        if self.source_error.is_some() {
            return AIMStatus::Failed;
        }
        if self.ready() {
            return AIMStatus::Ready;
        }
        let status = aggregate_status(&self.health);
        let creating = !self.pvc.lost()
            && (!self.pvc.bound() || (!self.download.found && self.can_create_job()));
        if status == AIMStatus::Pending && creating {
            AIMStatus::Progressing
        } else {
            status
        }
    }
}

/// Health of the cache's PVC.
#[must_use]
pub fn pvc_health(pvc: &PersistentVolumeClaim) -> ComponentHealth {
    match pvc.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some(PVC_PHASE_BOUND) => ComponentHealth::ready(COMPONENT_PVC, REASON_PVC_BOUND),
        Some(PVC_PHASE_PENDING) => ComponentHealth::new(
            COMPONENT_PVC,
            AIMStatus::Progressing,
            REASON_PVC_PROVISIONING,
            "PVC is provisioning",
        ),
        Some(PVC_PHASE_LOST) => ComponentHealth::new(
            COMPONENT_PVC,
            AIMStatus::Pending,
            REASON_PVC_LOST,
            "PVC lost",
        ),
        other => ComponentHealth::new(COMPONENT_PVC, AIMStatus::Unset, other.unwrap_or("Unknown"), ""),
    }
}

/// Turn raw reads into an observation.
#[must_use]
pub fn observe_model_cache(cache: &AIMModelCache, fetched: ModelCacheFetched) -> ModelCacheObservation {
    let pvc = fetched
        .pvc
        .value()
        .map(|pvc| PvcObservation {
            name: pvc.metadata.name.clone(),
            phase: pvc.status.as_ref().and_then(|s| s.phase.clone()),
        })
        .unwrap_or_default();

    let download = fetched
        .job
        .value()
        .map(|job| DownloadObservation {
            found: true,
            succeeded: is_job_succeeded(job)
                || job
                    .status
                    .as_ref()
                    .and_then(|s| s.succeeded)
                    .is_some_and(|n| n > 0),
            failed: is_job_failed(job),
            failure_message: is_job_failed(job).then(|| job_failure_reason(job)),
        })
        .unwrap_or_default();

    let wait_for_first_consumer = fetched.storage_class.value().is_some_and(|sc| {
        sc.volume_binding_mode.as_deref() == Some(BINDING_MODE_WAIT_FOR_FIRST_CONSUMER)
    });

    let mut observation = ModelCacheObservation {
        source_error: validate_source_uri(&cache.spec.source_uri).err(),
        pvc,
        download,
        wait_for_first_consumer,
        health: Vec::new(),
    };

    let mut health = vec![fetched.pvc.to_downstream_health(COMPONENT_PVC, pvc_health)];
    if observation.download.found || observation.can_create_job() {
        health.push(fetched.job.to_downstream_health(COMPONENT_DOWNLOAD_JOB, |job| {
            job_health(job, REASON_WARM, REASON_DOWNLOAD_FAILED, REASON_DOWNLOADING)
        }));
    }
    let running = fetched.job.value().is_some_and(|job| !is_job_complete(job));
    if running && !fetched.pods.is_empty() {
        health.push(pods_health(&fetched.pods));
    }
    observation.health = health;
    observation
}

// ============================================================================
// Plan / Decorate
// ============================================================================

/// Children that should exist. Existing PVCs are never re-planned.
///
/// # Errors
///
/// Returns an error if a child cannot be built.
pub fn plan_model_cache(
    cache: &AIMModelCache,
    observation: &ModelCacheObservation,
) -> Result<PlanResult, PipelineError> {
    let mut plan = PlanResult::empty();
    if observation.source_error.is_some() {
        return Ok(plan);
    }

    if !observation.pvc.found() {
        plan = plan.with(DesiredObject::owned(&build_pvc(cache)?)?);
    }
    if observation.can_create_job() && !observation.download.found {
        debug!(
            name = %cache.name_any(),
            wait_for_first_consumer = observation.wait_for_first_consumer,
            "Planning download job"
        );
        plan = plan.with(DesiredObject::owned(&build_download_job(cache)?)?);
    }
    Ok(plan)
}

fn project_storage(conditions: &mut ConditionManager, observation: &ModelCacheObservation) {
    match observation.health_of(COMPONENT_PVC) {
        Some(health) if observation.pvc.found() => {
            conditions.set_from_health(CONDITION_TYPE_STORAGE_READY, health);
        }
        _ => conditions.mark_false(
            CONDITION_TYPE_STORAGE_READY,
            REASON_PVC_PENDING,
            "PVC not created yet",
        ),
    }
}

fn project_download(conditions: &mut ConditionManager, observation: &ModelCacheObservation) {
    let download = &observation.download;
    if let Some(err) = &observation.source_error {
        conditions.mark_false(
            CONDITION_TYPE_DOWNLOADED,
            REASON_INVALID_SOURCE_URI,
            &err.to_string(),
        );
    } else if download.succeeded {
        conditions.mark_true(CONDITION_TYPE_DOWNLOADED, REASON_WARM, "");
    } else if let Some(pods) = observation.pod_failure() {
        conditions.set_from_health(CONDITION_TYPE_DOWNLOADED, pods);
    } else if let Some(job) = observation
        .health_of(COMPONENT_DOWNLOAD_JOB)
        .filter(|_| download.found)
    {
        conditions.set_from_health(CONDITION_TYPE_DOWNLOADED, job);
    } else if observation.can_create_job() {
        conditions.mark_false(CONDITION_TYPE_DOWNLOADED, REASON_DOWNLOADING, "");
    } else {
        conditions.mark_false(
            CONDITION_TYPE_DOWNLOADED,
            REASON_PVC_PENDING,
            "Waiting for storage before downloading",
        );
    }
}

/// Project the observation onto status and conditions.
pub fn decorate_model_cache(
    observation: &ModelCacheObservation,
    status: &mut AIMModelCacheStatus,
    conditions: &mut ConditionManager,
) {
    project_storage(conditions, observation);
    project_download(conditions, observation);

    match observation.overall() {
        AIMStatus::Progressing => {
            let reason = if observation.pvc.bound() || observation.can_create_job() {
                REASON_DOWNLOADING
            } else {
                REASON_PVC_PENDING
            };
            conditions.mark_true(CONDITION_TYPE_PROGRESSING, reason, "");
        }
        _ => conditions.mark_false(CONDITION_TYPE_PROGRESSING, REASON_NO_FAILURE, ""),
    }

    if let Some(err) = &observation.source_error {
        conditions.mark_true(CONDITION_TYPE_FAILURE, REASON_INVALID_SOURCE_URI, &err.to_string());
    } else if observation.pvc.lost() {
        conditions.mark_true(CONDITION_TYPE_FAILURE, REASON_PVC_LOST, "PVC lost");
    } else if observation.download.failed {
        conditions.mark_true(
            CONDITION_TYPE_FAILURE,
            REASON_DOWNLOAD_FAILED,
            observation
                .download
                .failure_message
                .as_deref()
                .unwrap_or_default(),
        );
    } else if let Some(pods) = observation.pod_failure() {
        conditions.mark_true(CONDITION_TYPE_FAILURE, &pods.reason, &pods.message);
    } else {
        conditions.mark_false(CONDITION_TYPE_FAILURE, REASON_NO_FAILURE, "");
    }

    if observation.pvc.found() {
        status.persistent_volume_claim = observation.pvc.name.clone();
    }
    status.status = observation.overall();
}

// ============================================================================
// Reconciler
// ============================================================================

/// [`DomainReconciler`] for `AIMModelCache`.
pub struct ModelCacheReconciler {
    client: Client,
}

impl ModelCacheReconciler {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn fetch_error(what: &str) -> impl FnOnce(kube::Error) -> PipelineError + '_ {
    move |source| PipelineError::Fetch {
        what: what.to_string(),
        source,
    }
}

#[async_trait]
impl DomainReconciler for ModelCacheReconciler {
    type Resource = AIMModelCache;
    type Status = AIMModelCacheStatus;
    type Fetched = ModelCacheFetched;
    type Observation = ModelCacheObservation;

    fn field_manager(&self) -> &'static str {
        FIELD_MANAGER_MODEL_CACHE
    }

    fn required_conditions(&self) -> &'static [&'static str] {
        &[CONDITION_TYPE_STORAGE_READY, CONDITION_TYPE_DOWNLOADED]
    }

    fn status(resource: &AIMModelCache) -> Option<&AIMModelCacheStatus> {
        resource.status.as_ref()
    }

    async fn fetch(&self, cache: &AIMModelCache) -> Result<ModelCacheFetched, PipelineError> {
        let namespace = cache.namespace().unwrap_or_default();
        let name = cache.name_any();

        let pvc_api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);
        let pvc = fetch_optional(&pvc_api, &pvc_name(&name)?)
            .await
            .required()
            .map_err(fetch_error("pvc"))?;

        let job_api: Api<Job> = Api::namespaced(self.client.clone(), &namespace);
        let job = fetch_optional(&job_api, &download_job_name(&name)?)
            .await
            .required()
            .map_err(fetch_error("download job"))?;

        let mut pods = Vec::new();
        if let Some(running) = job.value().filter(|j| !is_job_complete(j)) {
            pods = list_job_pods(&self.client, &namespace, &running.name_any()).await;
        }

        let storage_class_name = pvc
            .value()
            .and_then(|pvc| pvc.spec.as_ref())
            .and_then(|spec| spec.storage_class_name.clone());
        let storage_class = match storage_class_name {
            Some(sc) => {
                let sc_api: Api<StorageClass> = Api::all(self.client.clone());
                fetch_optional(&sc_api, &sc).await
            }
            None => FetchResult::NotFound,
        };

        Ok(ModelCacheFetched {
            pvc,
            job,
            pods,
            storage_class,
        })
    }

    fn observe(&self, cache: &AIMModelCache, fetched: ModelCacheFetched) -> ModelCacheObservation {
        observe_model_cache(cache, fetched)
    }

    fn plan(
        &self,
        cache: &AIMModelCache,
        observation: &ModelCacheObservation,
    ) -> Result<PlanResult, PipelineError> {
        plan_model_cache(cache, observation)
    }

    fn decorate_status(
        &self,
        _cache: &AIMModelCache,
        observation: &ModelCacheObservation,
        status: &mut AIMModelCacheStatus,
        conditions: &mut ConditionManager,
    ) {
        decorate_model_cache(observation, status, conditions);
    }
}

/// Run one reconcile pass over a model cache.
///
/// # Errors
///
/// Returns an error if a required read, an apply or the status patch fails.
pub async fn reconcile_aimmodelcache(
    ctx: &Context,
    cache: &AIMModelCache,
) -> Result<RunOutcome, PipelineError> {
    Pipeline::new(
        ModelCacheReconciler::new(ctx.client.clone()),
        ctx.writer(),
        ctx.reconcile_timeout,
    )
    .run(cache)
    .await
}

#[cfg(test)]
#[path = "aimmodelcache_tests.rs"]
mod aimmodelcache_tests;
