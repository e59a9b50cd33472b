// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic finalizer management for namespaced AIM resources.
//!
//! A finalizer keeps a resource around until the controller has released what it
//! holds outside of owner references, such as a discovery semaphore slot.
//!
//! # Example
//!
//! ```rust,ignore
//! use aim_engine::context::Context;
//! use aim_engine::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
//! use aim_engine::crd::AIMServiceTemplate;
//! use anyhow::Result;
//!
//! const FINALIZER: &str = "aim.eai.amd.com/service-template";
//!
//! #[async_trait::async_trait]
//! impl FinalizerCleanup for AIMServiceTemplate {
//!     async fn cleanup(&self, ctx: &Context) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! async fn reconcile(ctx: &Context, template: AIMServiceTemplate) -> Result<()> {
//!     if template.metadata.deletion_timestamp.is_some() {
//!         return handle_deletion(ctx, &template, FINALIZER).await;
//!     }
//!     ensure_finalizer(&ctx.client, &template, FINALIZER).await?;
//!     Ok(())
//! }
//! ```

use crate::context::Context;
use anyhow::Result;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::info;

/// Trait for resources that require cleanup operations when being deleted.
#[async_trait::async_trait]
pub trait FinalizerCleanup: Resource + ResourceExt + Clone {
    /// Perform cleanup operations before the finalizer is removed.
    ///
    /// If this returns an error the finalizer stays and deletion is retried on the
    /// next reconcile.
    ///
    /// # Errors
    ///
    /// Should return an error if any cleanup step fails.
    async fn cleanup(&self, ctx: &Context) -> Result<()>;
}

/// Whether `finalizer` is present on `resource`.
#[must_use]
pub fn has_finalizer<T: Resource>(resource: &T, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|existing| existing == finalizer))
}

/// The finalizer list with `finalizer` appended, or `None` if it is already there.
#[must_use]
pub fn finalizers_with<T: Resource>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    if has_finalizer(resource, finalizer) {
        return None;
    }
    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());
    Some(finalizers)
}

/// The finalizer list with `finalizer` removed, or `None` if it was not there.
#[must_use]
pub fn finalizers_without<T: Resource>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    if !has_finalizer(resource, finalizer) {
        return None;
    }
    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.retain(|f| f != finalizer);
    Some(finalizers)
}

async fn patch_finalizers<T>(client: &Client, resource: &T, finalizers: Vec<String>) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    let namespace = resource.namespace().unwrap_or_default();
    let api: Api<T> = Api::namespaced(client.clone(), &namespace);
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&resource.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Add a finalizer to a resource if not already present.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn ensure_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    if let Some(finalizers) = finalizers_with(resource, finalizer) {
        info!(
            "Adding finalizer {} to {}/{} {}",
            finalizer,
            resource.namespace().unwrap_or_default(),
            resource.name_any(),
            T::kind(&())
        );
        patch_finalizers(client, resource, finalizers).await?;
    }
    Ok(())
}

/// Remove a finalizer from a resource.
///
/// Usually called through [`handle_deletion`], which runs cleanup first.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn remove_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    if let Some(finalizers) = finalizers_without(resource, finalizer) {
        info!(
            "Removing finalizer {} from {}/{} {}",
            finalizer,
            resource.namespace().unwrap_or_default(),
            resource.name_any(),
            T::kind(&())
        );
        patch_finalizers(client, resource, finalizers).await?;
    }
    Ok(())
}

/// Run cleanup, then remove the finalizer so Kubernetes can delete the resource.
///
/// Does nothing when the finalizer is already gone.
///
/// # Errors
///
/// Returns an error if cleanup or the finalizer patch fails. The finalizer then
/// stays and deletion is retried on the next reconcile.
pub async fn handle_deletion<T>(ctx: &Context, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + FinalizerCleanup
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }

    info!("Running cleanup for {} {}/{}", T::kind(&()), namespace, name);
    resource.cleanup(ctx).await?;
    remove_finalizer(&ctx.client, resource, finalizer).await
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
