// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard Kubernetes status condition types and reasons for AIM resources.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a condition has
//! a particular status. They are the only stable part of the user-facing error surface:
//! raw API errors only ever appear in a condition `message`, never as a `reason`.
//!
//! # Condition Model
//!
//! Every resource carries a set of domain conditions (e.g. `CacheReady`, `Discovered`)
//! plus one aggregate `type: Ready` condition derived from them. The aggregate copies
//! its reason and message from the first domain condition that is not `True`, in the
//! order each controller registers them.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   status: Progressing
//!   conditions:
//!     - type: TemplateFound
//!       status: "True"
//!       reason: TemplateFound
//!     - type: CacheReady
//!       status: "False"
//!       reason: Warming
//!       message: "1 of 2 model caches bound, 1 missing"
//!     - type: Ready
//!       status: "False"
//!       reason: Warming
//!       message: "1 of 2 model caches bound, 1 missing"
//! ```

// ============================================================================
// Common Reasons (All Resources)
// ============================================================================

/// Every required domain condition is `True`.
///
/// Used only for the aggregate `type: Ready` condition.
pub const REASON_ALL_READY: &str = "AllReady";

/// Resources are being created or updated.
pub const REASON_PROGRESSING: &str = "Progressing";

/// A condition was registered as required but never set during the reconcile.
pub const REASON_NOT_EVALUATED: &str = "NotEvaluated";

/// The resource has no dependencies to become ready against.
///
/// Zero dependencies never aggregate to `Ready`; the resource stays `Pending`.
pub const REASON_NO_DEPENDENCIES: &str = "NoDependencies";

// ============================================================================
// Dependency Health Reasons
// ============================================================================

/// Reading a dependency from the API server failed with a non-not-found error.
pub const REASON_FETCH_ERROR: &str = "FetchError";

/// An upstream dependency (something this resource consumes) does not exist yet.
pub const REASON_REFERENCE_NOT_FOUND: &str = "ReferenceNotFound";

/// A downstream resource (something this resource creates) does not exist yet
/// or has not reported readiness.
pub const REASON_RESOURCE_NOT_READY: &str = "ResourceNotReady";

/// A dependency reported `Ready`.
pub const REASON_DEPENDENCY_READY: &str = "DependencyReady";

/// A dependency has not reported any status yet.
pub const REASON_DEPENDENCY_STATUS_UNSET: &str = "DependencyStatusUnset";

// ============================================================================
// AIMTemplateCache Reasons
// ============================================================================

/// The referenced `AIMServiceTemplate` does not exist yet.
pub const REASON_AWAITING_TEMPLATE: &str = "AwaitingTemplate";

/// The referenced `AIMServiceTemplate` was found.
pub const REASON_TEMPLATE_FOUND: &str = "TemplateFound";

/// Some model sources are not yet bound to a ready model cache.
pub const REASON_WARMING: &str = "Warming";

/// Every model source is bound to a ready model cache.
pub const REASON_WARM: &str = "Warm";

/// Every model source has a model cache and none has failed; some are still downloading.
pub const REASON_CACHES_AVAILABLE: &str = "CachesAvailable";

/// The template has not reported any model sources yet.
pub const REASON_NO_MODEL_SOURCES: &str = "NoModelSources";

/// The best model cache for at least one source has failed.
pub const REASON_CACHE_FAILED: &str = "CacheFailed";

// ============================================================================
// Pod Reasons
// ============================================================================

/// A job has not started any pods yet.
pub const REASON_NO_PODS: &str = "NoPods";

/// Every pod of a job is running or has succeeded.
pub const REASON_PODS_RUNNING: &str = "PodsRunning";

/// A pod is waiting to be scheduled or to start its containers.
pub const REASON_PODS_PENDING: &str = "PodsPending";

/// Pods exist but none is running yet.
pub const REASON_PODS_PROGRESSING: &str = "PodsProgressing";

/// A pod terminated unsuccessfully.
pub const REASON_POD_FAILED: &str = "PodFailed";

/// A container image cannot be pulled and the kubelet is backing off.
pub const REASON_IMAGE_PULL_BACK_OFF: &str = "ImagePullBackOff";

/// The registry rejected the image pull credentials.
pub const REASON_IMAGE_PULL_AUTH_FAILURE: &str = "ImagePullAuthFailure";

/// The registry does not know the image or tag.
pub const REASON_IMAGE_NOT_FOUND: &str = "ImageNotFound";

// ============================================================================
// AIMModelCache Reasons
// ============================================================================

/// The cache volume claim has not been created yet.
pub const REASON_PVC_PENDING: &str = "PVCPending";

/// The cache volume claim is waiting for a volume.
pub const REASON_PVC_PROVISIONING: &str = "PVCProvisioning";

/// The cache volume claim is bound.
pub const REASON_PVC_BOUND: &str = "PVCBound";

/// The cache volume claim lost its volume.
pub const REASON_PVC_LOST: &str = "PVCLost";

/// The download job is running or about to be created.
pub const REASON_DOWNLOADING: &str = "Downloading";

/// The download job failed.
pub const REASON_DOWNLOAD_FAILED: &str = "DownloadFailed";

/// No failure has been observed.
pub const REASON_NO_FAILURE: &str = "NoFailure";

/// `spec.sourceUri` is not a supported model URI.
pub const REASON_INVALID_SOURCE_URI: &str = "InvalidSourceURI";

// ============================================================================
// AIMServiceTemplate Reasons
// ============================================================================

/// Model sources were provided inline, discovery is skipped.
pub const REASON_INLINE_MODEL_SOURCES: &str = "InlineModelSources";

/// The discovery job was created and has not reported progress yet.
pub const REASON_DISCOVERY_JOB_CREATED: &str = "DiscoveryJobCreated";

/// The discovery job is running.
pub const REASON_DISCOVERY_RUNNING: &str = "DiscoveryRunning";

/// The discovery job completed successfully.
pub const REASON_DISCOVERY_SUCCEEDED: &str = "DiscoverySucceeded";

/// The discovery job failed.
pub const REASON_DISCOVERY_FAILED: &str = "DiscoveryFailed";

/// A previous discovery attempt failed and the retry delay has not elapsed.
pub const REASON_AWAITING_DISCOVERY: &str = "AwaitingDiscovery";

/// Every discovery slot in the cluster is taken; the template polls for one.
pub const REASON_DISCOVERY_THROTTLED: &str = "DiscoveryThrottled";

// ============================================================================
// Condition Types
// ============================================================================

/// Aggregate condition type indicating overall resource readiness.
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Work toward the desired state is ongoing.
pub const CONDITION_TYPE_PROGRESSING: &str = "Progressing";

/// A terminal failure was observed.
pub const CONDITION_TYPE_FAILURE: &str = "Failure";

/// `AIMTemplateCache`: the referenced template exists.
pub const CONDITION_TYPE_TEMPLATE_FOUND: &str = "TemplateFound";

/// `AIMTemplateCache`: every model source is bound to a ready cache.
pub const CONDITION_TYPE_CACHE_READY: &str = "CacheReady";

/// `AIMModelCache`: the cache volume claim is bound.
pub const CONDITION_TYPE_STORAGE_READY: &str = "StorageReady";

/// `AIMModelCache`: the model has been downloaded into the cache volume.
pub const CONDITION_TYPE_DOWNLOADED: &str = "Downloaded";

/// `AIMServiceTemplate`: model discovery finished successfully.
pub const CONDITION_TYPE_DISCOVERED: &str = "Discovered";

// ============================================================================
// Helper Functions
// ============================================================================

/// Build the condition type used to surface the health of a single dependency.
///
/// # Example
///
/// ```rust
/// use aim_engine::status_reasons::dependency_condition_type;
///
/// assert_eq!(dependency_condition_type("template"), "TemplateHealthy");
/// assert_eq!(dependency_condition_type("discoveryJob"), "DiscoveryJobHealthy");
/// ```
#[must_use]
pub fn dependency_condition_type(component: &str) -> String {
    let mut chars = component.chars();
    match chars.next() {
        Some(first) => format!("{}{}Healthy", first.to_uppercase(), chars.as_str()),
        None => "Healthy".to_string(),
    }
}
