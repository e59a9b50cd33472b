// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed results of reading dependencies from the API server.
//!
//! A read either finds the object, finds nothing, or fails. Keeping "not found"
//! separate from "failed" lets the observe step report a missing dependency as
//! `Pending` while a failed read becomes a `Failed` health record with a stable
//! `FetchError` reason.

use crate::crd::AIMStatus;
use crate::errors::ErrorCategory;
use crate::reconcilers::health::{ComponentHealth, DependencyType};
use crate::status_reasons::{
    REASON_FETCH_ERROR, REASON_REFERENCE_NOT_FOUND, REASON_RESOURCE_NOT_READY,
};
use kube::api::ListParams;
use kube::Api;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Result of reading one dependency.
#[derive(Debug)]
pub enum FetchResult<T> {
    Found(T),
    NotFound,
    Failed(kube::Error),
}

impl<T> FetchResult<T> {
    /// Classify a raw API result, mapping HTTP 404 to [`FetchResult::NotFound`].
    pub fn from_result(result: Result<T, kube::Error>) -> Self {
        match result {
            Ok(value) => Self::Found(value),
            Err(err) if ErrorCategory::of(&err) == ErrorCategory::NotFound => Self::NotFound,
            Err(err) => Self::Failed(err),
        }
    }

    #[must_use]
    pub fn ok(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Whether the read failed for a reason other than "not found".
    #[must_use]
    pub fn has_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&kube::Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Turn a failed read into a hard error, keeping found and not-found results.
    ///
    /// Used for reads the reconcile cannot continue without.
    ///
    /// # Errors
    ///
    /// Returns the API error when the read failed.
    pub fn required(self) -> Result<Self, kube::Error> {
        match self {
            Self::Failed(err) => Err(err),
            other => Ok(other),
        }
    }

    /// Health of a dependency this resource consumes.
    ///
    /// Not found is `Pending` / `ReferenceNotFound`. A failed read is `Failed` /
    /// `FetchError`. A found object is handed to `inspect`.
    pub fn to_upstream_health<F>(&self, component: &str, inspect: F) -> ComponentHealth
    where
        F: FnOnce(&T) -> ComponentHealth,
    {
        self.to_health(
            component,
            DependencyType::Upstream,
            REASON_REFERENCE_NOT_FOUND,
            inspect,
        )
    }

    /// Health of a dependency this resource creates.
    ///
    /// Not found is `Pending` / `ResourceNotReady` since the next apply creates it.
    pub fn to_downstream_health<F>(&self, component: &str, inspect: F) -> ComponentHealth
    where
        F: FnOnce(&T) -> ComponentHealth,
    {
        self.to_health(
            component,
            DependencyType::Downstream,
            REASON_RESOURCE_NOT_READY,
            inspect,
        )
    }

    fn to_health<F>(
        &self,
        component: &str,
        dependency_type: DependencyType,
        not_found_reason: &str,
        inspect: F,
    ) -> ComponentHealth
    where
        F: FnOnce(&T) -> ComponentHealth,
    {
        let health = match self {
            Self::Found(value) => {
                let mut health = inspect(value);
                health.component = component.to_string();
                health
            }
            Self::NotFound => ComponentHealth::new(
                component,
                AIMStatus::Pending,
                not_found_reason,
                format!("{component} not found"),
            ),
            Self::Failed(err) => ComponentHealth::new(
                component,
                AIMStatus::Failed,
                REASON_FETCH_ERROR,
                format!(
                    "Unable to read {component} ({})",
                    ErrorCategory::of(err).as_str()
                ),
            ),
        };
        health.with_dependency_type(dependency_type)
    }
}

/// Read one object, classifying "not found" separately from failures.
pub async fn fetch_optional<K>(api: &Api<K>, name: &str) -> FetchResult<K>
where
    K: Clone + DeserializeOwned + Debug,
{
    debug!(name = %name, "Fetching object");
    match api.get_opt(name).await {
        Ok(Some(obj)) => FetchResult::Found(obj),
        Ok(None) => FetchResult::NotFound,
        Err(err) => FetchResult::from_result(Err(err)),
    }
}

/// List objects. An empty list is `Found(vec![])`, never `NotFound`.
pub async fn fetch_list<K>(api: &Api<K>, params: &ListParams) -> FetchResult<Vec<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    FetchResult::from_result(api.list(params).await.map(|list| list.items))
}
