// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for AI model-serving workloads.
//!
//! This module defines the Kubernetes Custom Resource Definitions reconciled by the
//! AIM engine, plus the status lattice and condition types shared by all of them.
//!
//! # Resource Types
//!
//! - [`AIMServiceTemplate`] - A model + runtime profile; runs a discovery job to learn
//!   which model artifacts it needs
//! - [`AIMTemplateCache`] - Warms every model source of a template by binding it to a
//!   ready [`AIMModelCache`], creating the missing ones
//! - [`AIMModelCache`] - Downloads one model into a persistent volume claim
//!
//! # Status Lattice
//!
//! Every resource reports an overall [`AIMStatus`]. The lattice is totally ordered
//! (`Failed < Pending < Progressing < Ready`) so dependency health can be reduced
//! with "worst of" and candidate caches ranked with "best of".
//!
//! # Example: Declaring a Template Cache
//!
//! ```rust,no_run
//! use aim_engine::crd::AIMTemplateCacheSpec;
//!
//! let spec = AIMTemplateCacheSpec {
//!     template_name: "llama-3-8b-mi300x".to_string(),
//!     storage_class_name: Some("fast-rwx".to_string()),
//!     env: vec![],
//!     image_pull_secrets: vec![],
//! };
//! ```

use k8s_openapi::api::core::v1::{EnvVar, LocalObjectReference};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Status Lattice
// ============================================================================

/// Overall status of an AIM resource.
///
/// `Unset` is the value a resource carries before any controller has reported on it.
/// It is a distinct variant (serialized as the empty string) but ranks equal to
/// `Failed` in [`AIMStatus::compare`], so an unreported dependency can never win a
/// "best of" comparison or hide a failure in a "worst of" comparison.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AIMStatus {
    /// No status has been reported yet.
    #[default]
    #[serde(rename = "")]
    Unset,
    /// A terminal failure was observed.
    Failed,
    /// Waiting for dependencies or for work to start.
    Pending,
    /// Work toward the desired state is underway.
    Progressing,
    /// The resource is usable.
    Ready,
}

impl AIMStatus {
    /// Priority of this status in the lattice. Higher is better.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Unset | Self::Failed => 0,
            Self::Pending => 1,
            Self::Progressing => 2,
            Self::Ready => 3,
        }
    }

    /// Total order over statuses, with `Unset` ranked equal to `Failed`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use aim_engine::crd::AIMStatus;
    /// use std::cmp::Ordering;
    ///
    /// assert_eq!(AIMStatus::Ready.compare(AIMStatus::Pending), Ordering::Greater);
    /// assert_eq!(AIMStatus::Unset.compare(AIMStatus::Failed), Ordering::Equal);
    /// ```
    #[must_use]
    pub fn compare(self, other: Self) -> Ordering {
        self.priority().cmp(&other.priority())
    }

    /// Whether a controller has reported this status.
    #[must_use]
    pub const fn is_set(self) -> bool {
        !matches!(self, Self::Unset)
    }

    /// The string form persisted in `status.status`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::Failed => "Failed",
            Self::Pending => "Pending",
            Self::Progressing => "Progressing",
            Self::Ready => "Ready",
        }
    }
}

impl fmt::Display for AIMStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Worst status of a set, or `None` for an empty set.
///
/// Always returns one of the input elements. Callers must treat `None` (zero
/// dependencies) explicitly; there is no neutral element that means "ready".
pub fn worst_of<I>(statuses: I) -> Option<AIMStatus>
where
    I: IntoIterator<Item = AIMStatus>,
{
    statuses.into_iter().fold(None, |worst, status| match worst {
        Some(current) if current.compare(status) != Ordering::Greater => Some(current),
        _ => Some(status),
    })
}

/// Best status of a set, or `None` for an empty set. Ties keep the first element seen.
pub fn best_of<I>(statuses: I) -> Option<AIMStatus>
where
    I: IntoIterator<Item = AIMStatus>,
{
    statuses.into_iter().fold(None, |best, status| match best {
        Some(current) if current.compare(status) != Ordering::Less => Some(current),
        _ => Some(status),
    })
}

// ============================================================================
// Shared Status Types
// ============================================================================

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. Common types include: Ready, Progressing, Failure.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// A flat record of one best-match binding.
///
/// Persisted on the owning object so the binding can be reconstructed on the next
/// reconcile and read by other controllers without following object references.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedReference {
    /// Name of the bound object.
    pub name: String,

    /// UID of the bound object.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// Logical dependency key the object was bound for (e.g. the model source name).
    pub key: String,

    /// Status of the bound object when the binding was computed.
    #[serde(default)]
    pub status: AIMStatus,
}

/// One model artifact required by a template.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AIMModelSource {
    /// Logical name of the model (e.g. `amd/Llama-3.1-8B-Instruct`).
    pub name: String,

    /// Where the model is downloaded from (`hf://...` or `s3://...`).
    pub source_uri: String,

    /// Storage needed for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,
}

/// Status accessors shared by every AIM status struct.
///
/// The reconciliation pipeline works on any resource whose status implements this
/// trait.
pub trait StatusWithConditions:
    Clone + Default + fmt::Debug + Serialize + for<'de> Deserialize<'de> + Send + Sync
{
    /// Conditions currently set on the status.
    fn conditions(&self) -> &[Condition];

    /// Replace the conditions list.
    fn set_conditions(&mut self, conditions: Vec<Condition>);

    /// Overall status enum.
    fn overall(&self) -> AIMStatus;

    /// Set the overall status enum.
    fn set_overall(&mut self, status: AIMStatus);

    /// Set the generation this status was computed from.
    fn set_observed_generation(&mut self, generation: Option<i64>);
}

macro_rules! impl_status_with_conditions {
    ($status:ty) => {
        impl StatusWithConditions for $status {
            fn conditions(&self) -> &[Condition] {
                &self.conditions
            }

            fn set_conditions(&mut self, conditions: Vec<Condition>) {
                self.conditions = conditions;
            }

            fn overall(&self) -> AIMStatus {
                self.status
            }

            fn set_overall(&mut self, status: AIMStatus) {
                self.status = status;
            }

            fn set_observed_generation(&mut self, generation: Option<i64>) {
                self.observed_generation = generation;
            }
        }
    };
}

// ============================================================================
// AIMModelCache
// ============================================================================

/// `AIMModelCache` downloads one model into a persistent volume claim.
///
/// The controller creates a PVC and a download job, both owned by the cache. Model
/// caches are usually created by an [`AIMTemplateCache`] but may also be declared
/// directly.
///
/// # Example
///
/// ```yaml
/// apiVersion: aim.eai.amd.com/v1alpha1
/// kind: AIMModelCache
/// metadata:
///   name: llama-3-1-8b-instruct
///   namespace: models
/// spec:
///   sourceUri: hf://amd/Llama-3.1-8B-Instruct
///   storageClassName: fast-rwx
///   size: 40Gi
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMModelCache",
    namespaced,
    shortname = "aimmc",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.sourceUri"}"#,
    doc = "AIMModelCache downloads a single model from a source URI into a persistent volume claim so that serving workloads can mount it."
)]
#[kube(status = "AIMModelCacheStatus")]
#[serde(rename_all = "camelCase")]
pub struct AIMModelCacheSpec {
    /// Where the model is downloaded from. Supported schemes: `hf`, `s3`.
    #[schemars(regex(pattern = r"^(hf|s3)://[^ ]+$"))]
    pub source_uri: String,

    /// Storage class of the cache volume. Empty uses the cluster default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Requested size of the cache volume.
    pub size: Quantity,

    /// Extra environment variables for the download job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Image used to download the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_download_image: Option<String>,

    /// Pull secrets for the download image.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// `AIMModelCache` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AIMModelCacheStatus {
    /// Overall status.
    #[serde(default)]
    pub status: AIMStatus,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Name of the PVC holding the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<String>,
}

impl_status_with_conditions!(AIMModelCacheStatus);

// ============================================================================
// AIMTemplateCache
// ============================================================================

/// `AIMTemplateCache` ensures every model source of a template is cached.
///
/// Each model source of the referenced template is bound to the best matching
/// [`AIMModelCache`] in the namespace (same source URI, compatible storage class).
/// Sources with no usable cache get a new `AIMModelCache` owned by the template cache.
///
/// # Example
///
/// ```yaml
/// apiVersion: aim.eai.amd.com/v1alpha1
/// kind: AIMTemplateCache
/// metadata:
///   name: llama-3-8b-mi300x
///   namespace: models
/// spec:
///   templateName: llama-3-8b-mi300x
///   storageClassName: fast-rwx
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMTemplateCache",
    namespaced,
    shortname = "aimtc",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Template","type":"string","jsonPath":".spec.templateName"}"#,
    doc = "AIMTemplateCache pre-warms every model artifact required by an AIMServiceTemplate by binding each model source to a ready AIMModelCache."
)]
#[kube(status = "AIMTemplateCacheStatus")]
#[serde(rename_all = "camelCase")]
pub struct AIMTemplateCacheSpec {
    /// Name of the `AIMServiceTemplate` in the same namespace.
    pub template_name: String,

    /// Only caches with this storage class are considered, and new caches use it.
    /// Unset accepts caches of any storage class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Environment variables passed to created model caches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Pull secrets passed to created model caches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// `AIMTemplateCache` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AIMTemplateCacheStatus {
    /// Overall status.
    #[serde(default)]
    pub status: AIMStatus,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// The model cache each model source is bound to.
    #[serde(default)]
    pub resolved_caches: Vec<ResolvedReference>,

    /// Model sources with no usable cache yet.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_sources: Vec<String>,
}

impl_status_with_conditions!(AIMTemplateCacheStatus);

// ============================================================================
// AIMServiceTemplate
// ============================================================================

/// Model caching options for a template.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CachingConfig {
    /// Create an `AIMTemplateCache` once the template is ready.
    #[serde(default)]
    pub enabled: bool,

    /// Storage class for the template cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

/// `AIMServiceTemplate` describes a model and the runtime profile used to serve it.
///
/// Unless model sources are given inline, the controller runs a discovery job that
/// inspects the model image. Discovery jobs are expensive, so the number running at
/// once across the cluster is bounded by an admission semaphore.
///
/// # Example
///
/// ```yaml
/// apiVersion: aim.eai.amd.com/v1alpha1
/// kind: AIMServiceTemplate
/// metadata:
///   name: llama-3-8b-mi300x
///   namespace: models
/// spec:
///   modelName: amd/Llama-3.1-8B-Instruct
///   image: amdenterpriseai/aim-llama:0.8.4
///   caching:
///     enabled: true
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMServiceTemplate",
    namespaced,
    shortname = "aimst",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.modelName"}"#,
    doc = "AIMServiceTemplate describes a model image and serving profile. The controller discovers the model artifacts the profile needs and optionally pre-warms them through an AIMTemplateCache."
)]
#[kube(status = "AIMServiceTemplateStatus")]
#[serde(rename_all = "camelCase")]
pub struct AIMServiceTemplateSpec {
    /// Model identifier (e.g. `amd/Llama-3.1-8B-Instruct`).
    pub model_name: String,

    /// Container image holding the model runtime; used by the discovery job.
    pub image: String,

    /// Model sources known up front. When set, discovery is skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_sources: Vec<AIMModelSource>,

    /// Model caching options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<CachingConfig>,

    /// Extra environment variables for the discovery job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Pull secrets for the discovery image.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Service account the discovery job runs as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/// Bookkeeping for discovery retries.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryState {
    /// Number of discovery jobs that have failed.
    #[serde(default)]
    pub attempts: i32,

    /// When the last failed attempt was observed (RFC3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_time: Option<String>,

    /// Name of the last discovery job observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_job_name: Option<String>,

    /// Failure message of the last failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,

    /// Hash of the discovery inputs the attempts were counted against. A spec
    /// change resets the attempt counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
}

/// `AIMServiceTemplate` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AIMServiceTemplateStatus {
    /// Overall status.
    #[serde(default)]
    pub status: AIMStatus,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Model sources the template needs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_sources: Vec<AIMModelSource>,

    /// Discovery retry bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryState>,

    /// The template cache serving this template, when caching is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_cache: Option<ResolvedReference>,
}

impl_status_with_conditions!(AIMServiceTemplateStatus);
