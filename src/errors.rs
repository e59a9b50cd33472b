// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation error types for the AIM engine.
//!
//! This module provides:
//! - [`PipelineError`] - why a single reconcile pass stopped early
//! - [`ErrorCategory`] - coarse classification of Kubernetes API failures, used to
//!   pick log levels, metric labels and condition messages without ever exposing
//!   raw error text as a condition reason

use thiserror::Error;

/// Coarse classification of a Kubernetes API error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The object does not exist (HTTP 404).
    NotFound,
    /// Optimistic-concurrency conflict (HTTP 409).
    Conflict,
    /// The caller is not allowed to do this (HTTP 401/403).
    Forbidden,
    /// The request was rejected as invalid (HTTP 400/422).
    Invalid,
    /// Rate limiting, server errors and connection failures.
    Transient,
    /// Anything else.
    Other,
}

impl ErrorCategory {
    /// Classify a Kubernetes API error.
    #[must_use]
    pub fn of(err: &kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) => match api_err.code {
                404 => Self::NotFound,
                409 => Self::Conflict,
                401 | 403 => Self::Forbidden,
                400 | 422 => Self::Invalid,
                429 | 500..=599 => Self::Transient,
                _ => Self::Other,
            },
            kube::Error::Service(_) => Self::Transient,
            _ => Self::Other,
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Transient | Self::Conflict)
    }

    /// Label used for metrics and condition messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::Invalid => "invalid",
            Self::Transient => "transient",
            Self::Other => "other",
        }
    }
}

/// Why a reconcile pass stopped early.
///
/// Each variant carries enough context to log the failure; the controller's error
/// policy decides the requeue.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required read failed. Optional reads are reported as dependency health instead.
    #[error("failed to fetch {what}: {source}")]
    Fetch {
        what: String,
        #[source]
        source: kube::Error,
    },

    /// Server-side apply of a desired object failed.
    #[error("failed to apply {kind} {name}: {source}")]
    Apply {
        kind: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// Deleting an object the plan no longer wants failed.
    #[error("failed to delete {kind} {name}: {source}")]
    Delete {
        kind: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// Writing the status subresource failed for a reason other than a conflict.
    #[error("failed to patch status of {name}: {source}")]
    StatusPatch {
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The pass exceeded its time budget.
    #[error("reconcile of {name} timed out after {seconds}s")]
    Timeout { name: String, seconds: u64 },

    /// The plan violated an internal invariant (e.g. an owned object without an owner).
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// A desired object could not be converted for apply.
    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    /// API error category, when the failure came from the API server.
    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Fetch { source, .. }
            | Self::Apply { source, .. }
            | Self::Delete { source, .. }
            | Self::StatusPatch { source, .. } => Some(ErrorCategory::of(source)),
            Self::Timeout { .. } | Self::Invariant(_) | Self::Serialization { .. } => None,
        }
    }

    /// Short label for the `error_type` metric.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Apply { .. } => "apply",
            Self::Delete { .. } => "delete",
            Self::StatusPatch { .. } => "status_patch",
            Self::Timeout { .. } => "timeout",
            Self::Invariant(_) => "invariant",
            Self::Serialization { .. } => "serialization",
        }
    }
}
