// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Writing desired child objects to the cluster.
//!
//! A controller's plan is a list of [`DesiredObject`]s. Each one is a typed object
//! erased to a [`DynamicObject`] plus a flag saying whether the parent owns it:
//!
//! - **Owned** objects get a controller owner reference and are garbage-collected
//!   with their parent (PVCs, download jobs, discovery jobs)
//! - **Shared** objects carry no owner reference and are found again through labels
//!   (template caches reused across templates)
//!
//! Writes go through the [`ClusterWriter`] trait. [`KubeWriter`] is the real
//! implementation and uses server-side apply so re-applying an unchanged object is
//! a no-op on the API server.
//!
//! # Example
//!
//! ```rust,no_run
//! use aim_engine::reconcilers::resources::{ClusterWriter, DesiredObject, KubeWriter};
//! use k8s_openapi::api::core::v1::PersistentVolumeClaim;
//! use kube::Client;
//!
//! async fn example(client: Client, pvc: &PersistentVolumeClaim) -> anyhow::Result<()> {
//!     let writer = KubeWriter::new(client);
//!     let desired = DesiredObject::owned(pvc)?;
//!     writer.apply(&desired, "aimmodelcache-controller").await?;
//!     Ok(())
//! }
//! ```

use crate::errors::{ErrorCategory, PipelineError};
use async_trait::async_trait;
use kube::api::{ApiResource, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// A child object the plan wants to exist.
#[derive(Clone, Debug)]
pub struct DesiredObject {
    pub resource: ApiResource,
    pub object: DynamicObject,
    /// Attach a controller owner reference to the parent before applying.
    pub owned: bool,
}

impl DesiredObject {
    /// A child garbage-collected with its parent.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Serialization`] if the object cannot be erased.
    pub fn owned<K>(object: &K) -> Result<Self, PipelineError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        Self::erase(object, true)
    }

    /// A child that outlives its parent and is found through labels.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Serialization`] if the object cannot be erased.
    pub fn shared<K>(object: &K) -> Result<Self, PipelineError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        Self::erase(object, false)
    }

    fn erase<K>(object: &K, owned: bool) -> Result<Self, PipelineError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let what = format!(
            "{} {}",
            K::kind(&()),
            object.meta().name.as_deref().unwrap_or_default()
        );
        let value = serde_json::to_value(object).map_err(|source| PipelineError::Serialization {
            what: what.clone(),
            source,
        })?;
        let object = serde_json::from_value::<DynamicObject>(value)
            .map_err(|source| PipelineError::Serialization { what, source })?;

        Ok(Self {
            resource: ApiResource::erase::<K>(&()),
            object,
            owned,
        })
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.object.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Apply order: api version, kind, namespace, name.
    #[must_use]
    pub fn sort_key(&self) -> (&str, &str, &str, &str) {
        (
            self.resource.api_version.as_str(),
            self.kind(),
            self.namespace(),
            self.name(),
        )
    }
}

/// An object the plan wants removed from the parent's namespace.
#[derive(Clone, Debug)]
pub struct StaleObject {
    pub resource: ApiResource,
    pub name: String,
}

impl StaleObject {
    #[must_use]
    pub fn of<K: Resource<DynamicType = ()>>(name: impl Into<String>) -> Self {
        Self {
            resource: ApiResource::erase::<K>(&()),
            name: name.into(),
        }
    }
}

/// Mutating access to the cluster used by the reconciliation pipeline.
#[async_trait]
pub trait ClusterWriter: Send + Sync {
    /// Create or update `desired` with server-side apply.
    async fn apply(&self, desired: &DesiredObject, field_manager: &str) -> Result<(), kube::Error>;

    /// Delete an object. Deleting an object that is already gone succeeds.
    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), kube::Error>;

    /// Merge-patch the status subresource.
    ///
    /// The patch carries `metadata.resourceVersion`, so a stale write fails with
    /// HTTP 409.
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), kube::Error>;
}

#[async_trait]
impl<T: ClusterWriter + ?Sized> ClusterWriter for Arc<T> {
    async fn apply(&self, desired: &DesiredObject, field_manager: &str) -> Result<(), kube::Error> {
        (**self).apply(desired, field_manager).await
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), kube::Error> {
        (**self).delete(resource, namespace, name).await
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), kube::Error> {
        (**self).patch_status(resource, namespace, name, patch).await
    }
}

/// [`ClusterWriter`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeWriter {
    client: Client,
}

impl KubeWriter {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

#[async_trait]
impl ClusterWriter for KubeWriter {
    async fn apply(&self, desired: &DesiredObject, field_manager: &str) -> Result<(), kube::Error> {
        let api = self.api(&desired.resource, desired.namespace());

        debug!(
            namespace = %desired.namespace(),
            name = %desired.name(),
            kind = %desired.kind(),
            "Applying resource"
        );

        api.patch(
            desired.name(),
            &PatchParams::apply(field_manager).force(),
            &Patch::Apply(&desired.object),
        )
        .await?;

        debug!(
            "Applied {} {}/{}",
            desired.kind(),
            desired.namespace(),
            desired.name()
        );
        Ok(())
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), kube::Error> {
        let api = self.api(resource, namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => {
                info!("Deleted {} {}/{}", resource.kind, namespace, name);
                Ok(())
            }
            Err(err) if ErrorCategory::of(&err) == ErrorCategory::NotFound => {
                debug!("{} {}/{} already deleted", resource.kind, namespace, name);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), kube::Error> {
        let api = self.api(resource, namespace);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
