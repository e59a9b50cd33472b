// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Health of the pods a job runs.
//!
//! A job only counts its active pods. A pod that can never start, most often
//! because its image cannot be pulled, stays "active" forever, so the controllers
//! also read the pods behind the jobs they run.

use crate::crd::AIMStatus;
use crate::reconcilers::fetch::{fetch_list, FetchResult};
use crate::reconcilers::health::{ComponentHealth, DependencyType};
use crate::status_reasons::{
    REASON_IMAGE_NOT_FOUND, REASON_IMAGE_PULL_AUTH_FAILURE, REASON_IMAGE_PULL_BACK_OFF,
    REASON_NO_PODS, REASON_PODS_PENDING, REASON_PODS_PROGRESSING, REASON_PODS_RUNNING,
    REASON_POD_FAILED,
};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tracing::warn;

/// Component name of pod health records.
pub const COMPONENT_PODS: &str = "pods";

/// Label the job controller puts on the pods it creates.
pub const JOB_NAME_LABEL: &str = "job-name";

pub const POD_PHASE_PENDING: &str = "Pending";
pub const POD_PHASE_RUNNING: &str = "Running";
pub const POD_PHASE_SUCCEEDED: &str = "Succeeded";
pub const POD_PHASE_FAILED: &str = "Failed";

/// Container waiting reasons that mean the image could not be pulled.
const IMAGE_PULL_WAITING_REASONS: &[&str] = &["ImagePullBackOff", "ErrImagePull"];

const AUTH_INDICATORS: &[&str] = &[
    "unauthorized",
    "authentication required",
    "authentication failed",
    "401",
    "403",
    "forbidden",
    "denied",
    "permission denied",
    "access denied",
    "credentials",
    "authentication",
];

const NOT_FOUND_INDICATORS: &[&str] = &[
    "not found",
    "404",
    "manifest unknown",
    "name unknown",
    "image not found",
    "no such",
];

/// Why an image could not be pulled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImagePullErrorKind {
    /// The registry rejected the credentials, or none were given.
    Auth,
    /// The repository or tag does not exist.
    NotFound,
    /// Anything else: network trouble, rate limits, a registry outage.
    BackOff,
}

impl ImagePullErrorKind {
    /// Condition reason for this kind of pull error.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Auth => REASON_IMAGE_PULL_AUTH_FAILURE,
            Self::NotFound => REASON_IMAGE_NOT_FOUND,
            Self::BackOff => REASON_IMAGE_PULL_BACK_OFF,
        }
    }
}

/// Classify a registry error message.
///
/// Authentication indicators are checked before not-found ones, since registries
/// commonly answer "not found" for private images the caller may not see.
#[must_use]
pub fn categorize_registry_message(message: &str) -> ImagePullErrorKind {
    let lower = message.to_lowercase();
    if AUTH_INDICATORS.iter().any(|i| lower.contains(i)) {
        ImagePullErrorKind::Auth
    } else if NOT_FOUND_INDICATORS.iter().any(|i| lower.contains(i)) {
        ImagePullErrorKind::NotFound
    } else {
        ImagePullErrorKind::BackOff
    }
}

/// An image pull error on one container of a pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagePullError {
    pub container: String,
    pub kind: ImagePullErrorKind,
    pub message: String,
}

/// First image pull error of a pod, init containers first.
#[must_use]
pub fn image_pull_error(pod: &Pod) -> Option<ImagePullError> {
    let status = pod.status.as_ref()?;
    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .find_map(|container| {
            let waiting = container.state.as_ref()?.waiting.as_ref()?;
            let reason = waiting.reason.as_deref()?;
            if !IMAGE_PULL_WAITING_REASONS.contains(&reason) {
                return None;
            }
            let message = waiting
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| reason.to_string());
            Some(ImagePullError {
                container: container.name.clone(),
                kind: categorize_registry_message(&message),
                message,
            })
        })
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or_default()
}

fn has_phase(pods: &[Pod], phase: &str) -> bool {
    pods.iter().any(|pod| pod_phase(pod) == phase)
}

/// A pod of the job that completed successfully.
#[must_use]
pub fn succeeded_pod(pods: &[Pod]) -> Option<&Pod> {
    pods.iter().find(|pod| pod_phase(pod) == POD_PHASE_SUCCEEDED)
}

/// Health of the pods of one job.
///
/// An image pull error on any pod is `Failed`. A failed pod is `Failed` unless a
/// replacement is already running. A running or succeeded pod is `Ready`, a pod
/// still being scheduled is `Pending`. No pods at all is `Pending`.
#[must_use]
pub fn pods_health(pods: &[Pod]) -> ComponentHealth {
    let health = if pods.is_empty() {
        ComponentHealth::new(
            COMPONENT_PODS,
            AIMStatus::Pending,
            REASON_NO_PODS,
            "No pods created yet",
        )
    } else if let Some(error) = pods.iter().find_map(image_pull_error) {
        ComponentHealth::new(
            COMPONENT_PODS,
            AIMStatus::Failed,
            error.kind.reason(),
            format!("Container {}: {}", error.container, error.message),
        )
    } else if has_phase(pods, POD_PHASE_RUNNING) || has_phase(pods, POD_PHASE_SUCCEEDED) {
        ComponentHealth::ready(COMPONENT_PODS, REASON_PODS_RUNNING)
    } else if let Some(failed) = pods.iter().find(|pod| pod_phase(pod) == POD_PHASE_FAILED) {
        let detail = failed
            .status
            .as_ref()
            .and_then(|s| s.message.clone().or_else(|| s.reason.clone()))
            .unwrap_or_else(|| "unknown reason".to_string());
        ComponentHealth::new(
            COMPONENT_PODS,
            AIMStatus::Failed,
            REASON_POD_FAILED,
            format!("Pod {} failed: {detail}", failed.name_any()),
        )
    } else if has_phase(pods, POD_PHASE_PENDING) {
        ComponentHealth::new(
            COMPONENT_PODS,
            AIMStatus::Pending,
            REASON_PODS_PENDING,
            "Pods are pending",
        )
    } else {
        ComponentHealth::new(
            COMPONENT_PODS,
            AIMStatus::Progressing,
            REASON_PODS_PROGRESSING,
            "Pods are starting",
        )
    };
    health.with_dependency_type(DependencyType::Downstream)
}

/// Whether a health record is an image that can never be pulled as configured.
#[must_use]
pub fn is_image_pull_failure(health: &ComponentHealth) -> bool {
    health.state == AIMStatus::Failed
        && [
            REASON_IMAGE_PULL_BACK_OFF,
            REASON_IMAGE_PULL_AUTH_FAILURE,
            REASON_IMAGE_NOT_FOUND,
        ]
        .contains(&health.reason.as_str())
}

/// Pods of one job.
///
/// Pod health only sharpens what the job reports, so a failed read is logged and
/// treated as no pods.
pub async fn list_job_pods(client: &Client, namespace: &str, job_name: &str) -> Vec<Pod> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&format!("{JOB_NAME_LABEL}={job_name}"));
    match fetch_list(&api, &params).await {
        FetchResult::Found(pods) => pods,
        FetchResult::NotFound => Vec::new(),
        FetchResult::Failed(err) => {
            warn!(job = %job_name, error = %err, "Failed to list job pods");
            Vec::new()
        }
    }
}

#[cfg(test)]
#[path = "pods_tests.rs"]
mod pods_tests;
