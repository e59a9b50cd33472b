// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster-wide admission control for discovery jobs.
//!
//! Discovery jobs pull large model images and are expensive, so the number running
//! at once is bounded. Each `AIMServiceTemplate` holds at most one slot, keyed by
//! [`job_key`]. The semaphore is constructed once at startup, shared through the
//! controller context, and seeded from the cluster with
//! [`initialize_semaphore_from_cluster`] so a restart does not over-admit.
//!
//! # Example
//!
//! ```rust
//! use aim_engine::reconcilers::semaphore::{job_key, DiscoverySemaphore};
//!
//! let sem = DiscoverySemaphore::new(1);
//! let key = job_key("models", "llama");
//!
//! assert!(sem.try_acquire(&key));
//! assert!(sem.try_acquire(&key)); // re-acquire by the holder is a no-op
//! assert!(!sem.try_acquire(&job_key("models", "mistral")));
//!
//! assert!(sem.release(&key));
//! assert_eq!(sem.available_slots(), 1);
//! ```

use crate::labels::{
    AIM_TEMPLATE_LABEL, COMPONENT_DISCOVERY, K8S_COMPONENT, K8S_MANAGED_BY,
    MANAGED_BY_SERVICE_TEMPLATE,
};
use crate::metrics;
use crate::reconcilers::jobs::is_job_complete;
use crate::reconcilers::retry::retry_api_call;
use anyhow::Result;
use k8s_openapi::api::batch::v1::Job;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Semaphore key for a template. Cluster-scoped templates use a `cluster:` prefix.
#[must_use]
pub fn job_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        format!("cluster:{name}")
    } else {
        format!("{namespace}/{name}")
    }
}

/// Bounded set of held discovery slots.
///
/// Holding a key is idempotent: acquiring a key that is already held succeeds
/// without consuming a second slot. All operations are safe to call concurrently.
#[derive(Debug)]
pub struct DiscoverySemaphore {
    capacity: usize,
    held: Mutex<HashSet<String>>,
}

impl DiscoverySemaphore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            held: Mutex::new(HashSet::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a slot for `key`. Returns `false` only when the key is not held and
    /// every slot is taken.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut held = self.lock();
        if held.contains(key) {
            return true;
        }
        if held.len() >= self.capacity {
            debug!(key = %key, capacity = self.capacity, "Discovery semaphore full");
            return false;
        }
        held.insert(key.to_string());
        let active = held.len();
        drop(held);

        metrics::record_discovery_slots(active, self.capacity);
        true
    }

    /// Give back the slot held by `key`. Returns whether it was held.
    pub fn release(&self, key: &str) -> bool {
        let mut held = self.lock();
        let released = held.remove(key);
        let active = held.len();
        drop(held);

        if released {
            metrics::record_discovery_slots(active, self.capacity);
        }
        released
    }

    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.capacity.saturating_sub(self.active_count())
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Release a slot whose job no longer exists.
    ///
    /// Only releases when the key is held, no job exists for it and the template is
    /// not ready. A ready template's slot was already released on success.
    pub fn release_orphaned_slot(&self, key: &str, job_exists: bool, template_ready: bool) -> bool {
        if template_ready || job_exists || !self.is_held(key) {
            return false;
        }
        info!(key = %key, "Releasing orphaned discovery slot");
        self.release(key)
    }

    /// Acquire a slot that is released on drop unless [`SlotGuard::commit`] is called.
    ///
    /// Returns `None` when the semaphore is full. A key that was already held before
    /// this call yields a guard that never releases, so dropping it cannot take away
    /// a slot an earlier reconcile committed to.
    pub fn acquire_guard(self: &Arc<Self>, key: &str) -> Option<SlotGuard> {
        let already_held = self.is_held(key);
        if !self.try_acquire(key) {
            return None;
        }
        Some(SlotGuard {
            semaphore: Arc::clone(self),
            key: key.to_string(),
            armed: !already_held,
        })
    }
}

/// A provisional slot acquisition.
///
/// Dropping an uncommitted guard releases the slot, so a reconcile that fails or
/// is cancelled before its job is created leaves the semaphore untouched.
#[derive(Debug)]
pub struct SlotGuard {
    semaphore: Arc<DiscoverySemaphore>,
    key: String,
    armed: bool,
}

impl SlotGuard {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Keep the slot after the guard is dropped.
    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(key = %self.key, "Rolling back uncommitted discovery slot");
            self.semaphore.release(&self.key);
        }
    }
}

/// Seed the semaphore with discovery jobs that are still running.
///
/// Called once at startup before the controllers begin reconciling.
///
/// # Errors
///
/// Returns an error if discovery jobs cannot be listed.
pub async fn initialize_semaphore_from_cluster(
    semaphore: &DiscoverySemaphore,
    client: &Client,
) -> Result<usize> {
    let jobs: Api<Job> = Api::all(client.clone());
    let params = ListParams::default().labels(&format!(
        "{K8S_COMPONENT}={COMPONENT_DISCOVERY},{K8S_MANAGED_BY}={MANAGED_BY_SERVICE_TEMPLATE}"
    ));

    let list = retry_api_call(
        || {
            let jobs = jobs.clone();
            let params = params.clone();
            async move { jobs.list(&params).await }
        },
        "list discovery jobs",
    )
    .await?;

    let mut restored = 0;
    for job in list.items.iter().filter(|job| !is_job_complete(job)) {
        let Some(template) = job.labels().get(AIM_TEMPLATE_LABEL) else {
            continue;
        };
        let key = job_key(&job.namespace().unwrap_or_default(), template);
        if semaphore.try_acquire(&key) {
            restored += 1;
            debug!(key = %key, job = %job.name_any(), "Restored discovery slot");
        }
    }

    info!(
        restored,
        capacity = semaphore.capacity(),
        available = semaphore.available_slots(),
        "Discovery semaphore initialized from cluster state"
    );
    Ok(restored)
}

#[cfg(test)]
#[path = "semaphore_tests.rs"]
mod semaphore_tests;
