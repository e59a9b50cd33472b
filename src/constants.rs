// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the AIM engine.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all AIM CRDs
pub const API_GROUP: &str = "aim.eai.amd.com";

/// API version for all AIM CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "aim.eai.amd.com/v1alpha1";

/// Kind name for `AIMModelCache` resource
pub const KIND_MODEL_CACHE: &str = "AIMModelCache";

/// Kind name for `AIMTemplateCache` resource
pub const KIND_TEMPLATE_CACHE: &str = "AIMTemplateCache";

/// Kind name for `AIMServiceTemplate` resource
pub const KIND_SERVICE_TEMPLATE: &str = "AIMServiceTemplate";

// ============================================================================
// Field Managers (server-side apply)
// ============================================================================

/// Field manager used by the `AIMModelCache` controller
pub const FIELD_MANAGER_MODEL_CACHE: &str = "aimmodelcache-controller";

/// Field manager used by the `AIMTemplateCache` controller
pub const FIELD_MANAGER_TEMPLATE_CACHE: &str = "aimtemplatecache-controller";

/// Field manager used by the `AIMServiceTemplate` controller
pub const FIELD_MANAGER_SERVICE_TEMPLATE: &str = "aimservicetemplate-controller";

// ============================================================================
// Discovery Admission Constants
// ============================================================================

/// Default number of discovery jobs allowed to run at once across the cluster
pub const MAX_CONCURRENT_DISCOVERY_JOBS: usize = 10;

/// Requeue delay when the discovery semaphore is full (poll on backpressure)
pub const DISCOVERY_BACKPRESSURE_REQUEUE_SECS: u64 = 5;

/// Base delay between failed discovery attempts
pub const DISCOVERY_BASE_BACKOFF_SECS: u64 = 10;

/// Upper bound on the delay between failed discovery attempts
pub const DISCOVERY_MAX_BACKOFF_SECS: u64 = 300;

/// Discovery job pod retries (0: a failed pod fails the job)
pub const DISCOVERY_JOB_BACKOFF_LIMIT: i32 = 0;

/// Seconds a finished discovery job is kept before garbage collection
pub const DISCOVERY_JOB_TTL_SECS: i32 = 60;

/// Prefix of discovery job names
pub const DISCOVERY_JOB_PREFIX: &str = "discover-";

/// Number of hash bytes (hex encoded) appended to discovery job names
pub const DISCOVERY_JOB_HASH_BYTES: usize = 4;

/// Non-root user the discovery container runs as
pub const DISCOVERY_JOB_RUN_AS_USER: i64 = 65532;

/// Container name of the discovery job; its log holds the discovery result
pub const DISCOVERY_CONTAINER_NAME: &str = "discovery";

// ============================================================================
// Model Cache Constants
// ============================================================================

/// Image used to download models when a cache does not specify one
pub const DEFAULT_DOWNLOAD_IMAGE: &str = "kserve/storage-initializer:v0.16.0";

/// Mount path of the cache volume inside the download job
pub const CACHE_MOUNT_PATH: &str = "/cache";

/// Download job pod retries
pub const DOWNLOAD_JOB_BACKOFF_LIMIT: i32 = 2;

/// Seconds a finished download job is kept so its status can be observed
pub const DOWNLOAD_JOB_TTL_SECS: i32 = 600;

/// UID/GID of the storage initializer image
pub const DOWNLOAD_JOB_RUN_AS_USER: i64 = 1000;

/// Cache volume size used when a model source does not declare one
pub const DEFAULT_MODEL_CACHE_SIZE: &str = "100Gi";

/// URI schemes a model cache can download from
pub const SUPPORTED_SOURCE_SCHEMES: [&str; 2] = ["hf", "s3"];

// ============================================================================
// Naming Constants
// ============================================================================

/// Maximum length of a Kubernetes object name (RFC 1123 label)
pub const KUBERNETES_NAME_MAX_LENGTH: usize = 63;

/// Maximum length of a Kubernetes label value
pub const KUBERNETES_LABEL_VALUE_MAX_LENGTH: usize = 63;

/// Number of hex characters used for derived-name hash suffixes
pub const DERIVED_NAME_HASH_LENGTH: usize = 8;

// ============================================================================
// Controller Requeue Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue duration for resources that are Ready (5 minutes)
pub const READY_REQUEUE_DURATION_SECS: u64 = 300;

/// Requeue duration for resources that are not Ready yet (30 seconds)
pub const NOT_READY_REQUEUE_DURATION_SECS: u64 = 30;

/// Default upper bound on a single reconcile pass
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Path for the liveness endpoint served next to metrics
pub const HEALTH_SERVER_PATH: &str = "/healthz";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
