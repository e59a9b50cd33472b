// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers with reflector stores.
//!
//! Every controller receives an `Arc<Context>` that contains:
//! - Kubernetes client
//! - Reflector stores used by watch mappers
//! - The discovery admission semaphore
//! - The per-reconcile time budget
//!
//! The stores answer "which objects care about this change" from memory, so watch
//! mappers never query the API server.

use crate::crd::AIMTemplateCache;
use crate::reconcilers::resources::KubeWriter;
use crate::reconcilers::semaphore::DiscoverySemaphore;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Reflector stores for cross-controller lookups
    pub stores: Stores,

    /// Bounds the number of discovery jobs running cluster-wide
    pub semaphore: Arc<DiscoverySemaphore>,

    /// Upper bound for one reconcile pass
    pub reconcile_timeout: Duration,
}

impl Context {
    #[must_use]
    pub fn new(
        client: Client,
        stores: Stores,
        semaphore: Arc<DiscoverySemaphore>,
        reconcile_timeout: Duration,
    ) -> Self {
        Self {
            client,
            stores,
            semaphore,
            reconcile_timeout,
        }
    }

    /// Writer the reconciliation pipeline applies children through.
    #[must_use]
    pub fn writer(&self) -> KubeWriter {
        KubeWriter::new(self.client.clone())
    }
}

/// Collection of reflector stores for cross-controller queries.
///
/// Each store is populated by a dedicated reflector task started in `main`.
#[derive(Clone)]
pub struct Stores {
    pub template_caches: Store<AIMTemplateCache>,
}

impl Stores {
    /// Every template cache in `namespace`.
    ///
    /// Model caches are matched to template caches by source URI, not by owner,
    /// so any model cache change in a namespace may affect any template cache there.
    #[must_use]
    pub fn template_caches_in_namespace(&self, namespace: &str) -> Vec<ObjectRef<AIMTemplateCache>> {
        self.template_caches
            .state()
            .iter()
            .filter(|tc| tc.namespace().as_deref() == Some(namespace))
            .map(|tc| ObjectRef::from_obj(tc.as_ref()))
            .collect()
    }

    /// Template caches warming the service template `template_name`.
    #[must_use]
    pub fn template_caches_for_template(
        &self,
        template_name: &str,
        namespace: &str,
    ) -> Vec<ObjectRef<AIMTemplateCache>> {
        self.template_caches
            .state()
            .iter()
            .filter(|tc| {
                tc.namespace().as_deref() == Some(namespace)
                    && tc.spec.template_name == template_name
            })
            .map(|tc| ObjectRef::from_obj(tc.as_ref()))
            .collect()
    }

    /// Get a specific `AIMTemplateCache` by name and namespace from the store.
    #[must_use]
    pub fn get_template_cache(&self, name: &str, namespace: &str) -> Option<Arc<AIMTemplateCache>> {
        self.template_caches
            .get(&ObjectRef::new(name).within(namespace))
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
