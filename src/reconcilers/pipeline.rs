// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The reconciliation pipeline shared by every AIM controller.
//!
//! One pass over one object runs these phases in order:
//!
//! 1. **Fetch** - read every dependency (the only phase that reads the cluster)
//! 2. **Observe** - turn fetched data into a domain observation (pure)
//! 3. **Plan** - decide which child objects must exist (pure, apart from admission)
//! 4. **Apply** - server-side apply each child, owned ones with an owner reference
//! 5. **Decorate** - project the observation onto status and conditions (pure)
//! 6. **Patch** - write the status subresource once, only when it changed
//!
//! A failing fetch or apply stops the pass and is returned to the controller,
//! which requeues with backoff. A conflict on the status patch is not an error:
//! the pass reports it and the controller requeues immediately.
//!
//! Each resource kind implements [`DomainReconciler`]; [`Pipeline`] is generic
//! over it and over the [`ClusterWriter`] used for writes.

use crate::constants::{NOT_READY_REQUEUE_DURATION_SECS, READY_REQUEUE_DURATION_SECS};
use crate::crd::{AIMStatus, StatusWithConditions};
use crate::errors::{ErrorCategory, PipelineError};
use crate::metrics;
use crate::reconcilers::resources::{ClusterWriter, DesiredObject, StaleObject};
use crate::reconcilers::semaphore::SlotGuard;
use crate::reconcilers::status::{diff_condition_transitions, status_needs_update, ConditionManager};
use async_trait::async_trait;
use kube::api::ApiResource;
use kube::core::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info};

/// Resource-specific half of a controller.
///
/// Only [`fetch`](DomainReconciler::fetch) may talk to the cluster. The other
/// phases are plain functions of their inputs and can be unit tested without one.
#[async_trait]
pub trait DomainReconciler: Send + Sync {
    type Resource: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
    type Status: StatusWithConditions;
    type Fetched: Send;
    type Observation: Send + Sync;

    /// Field manager used for server-side apply of children.
    fn field_manager(&self) -> &'static str;

    /// Condition types feeding the aggregate `Ready` condition, in priority order.
    fn required_conditions(&self) -> &'static [&'static str];

    /// The status currently persisted on the object.
    fn status(resource: &Self::Resource) -> Option<&Self::Status>;

    /// Read every dependency of `resource`.
    ///
    /// Optional dependencies that are missing or unreadable are returned as
    /// [`FetchResult`](crate::reconcilers::fetch::FetchResult)s. Only reads the pass
    /// cannot continue without fail here.
    async fn fetch(&self, resource: &Self::Resource) -> Result<Self::Fetched, PipelineError>;

    fn observe(&self, resource: &Self::Resource, fetched: Self::Fetched) -> Self::Observation;

    /// Desired children.
    ///
    /// # Errors
    ///
    /// Returns an error when a child cannot be built.
    fn plan(
        &self,
        resource: &Self::Resource,
        observation: &Self::Observation,
    ) -> Result<PlanResult, PipelineError>;

    /// Fill in `status` and `conditions` from the observation.
    ///
    /// The pipeline derives the `Ready` condition afterwards.
    fn decorate_status(
        &self,
        resource: &Self::Resource,
        observation: &Self::Observation,
        status: &mut Self::Status,
        conditions: &mut ConditionManager,
    );
}

/// What the plan phase wants done.
#[derive(Debug, Default)]
pub struct PlanResult {
    pub apply: Vec<DesiredObject>,
    pub delete: Vec<StaleObject>,
    /// Requeue sooner than the default (e.g. while waiting for an admission slot).
    pub requeue_after: Option<Duration>,
    /// Admission slot taken for a job in `apply`. Committed once every apply
    /// succeeded, released if the pass stops before that.
    pub slot: Option<SlotGuard>,
}

impl PlanResult {
    /// Nothing to do.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, desired: DesiredObject) -> Self {
        self.apply.push(desired);
        self
    }

    #[must_use]
    pub fn requeue_after(mut self, after: Duration) -> Self {
        self.requeue_after = Some(after);
        self
    }
}

/// Result of one pass that ran to completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// Overall status computed by this pass.
    pub status: AIMStatus,
    /// Requeue delay requested by the plan.
    pub requeue_after: Option<Duration>,
    /// The status patch lost an optimistic-concurrency race.
    pub conflict: bool,
    /// Number of children applied.
    pub applied: usize,
    /// Number of children deleted.
    pub deleted: usize,
    /// Whether the status subresource was written.
    pub status_patched: bool,
}

impl RunOutcome {
    /// Delay before the next pass.
    ///
    /// A conflict retries immediately. Otherwise the plan's delay wins, then the
    /// ready/not-ready defaults.
    #[must_use]
    pub fn requeue_duration(&self) -> Duration {
        if self.conflict {
            return Duration::ZERO;
        }
        if let Some(after) = self.requeue_after {
            return after;
        }
        if self.status == AIMStatus::Ready {
            Duration::from_secs(READY_REQUEUE_DURATION_SECS)
        } else {
            Duration::from_secs(NOT_READY_REQUEUE_DURATION_SECS)
        }
    }

    /// Label for the requeue metric.
    #[must_use]
    pub fn requeue_reason(&self) -> &'static str {
        if self.conflict {
            "conflict"
        } else if self.requeue_after.is_some() {
            "scheduled"
        } else if self.status == AIMStatus::Ready {
            "ready"
        } else {
            "not_ready"
        }
    }

    #[must_use]
    pub fn action(&self) -> Action {
        Action::requeue(self.requeue_duration())
    }
}

/// Runs [`DomainReconciler`] phases against one object.
pub struct Pipeline<R, W> {
    reconciler: R,
    writer: W,
    timeout: Duration,
}

impl<R, W> Pipeline<R, W>
where
    R: DomainReconciler,
    W: ClusterWriter,
{
    #[must_use]
    pub fn new(reconciler: R, writer: W, timeout: Duration) -> Self {
        Self {
            reconciler,
            writer,
            timeout,
        }
    }

    #[must_use]
    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    /// Run one pass over `resource`, bounded by the pipeline timeout.
    ///
    /// A pass cut short by the timeout drops its plan, which releases any
    /// uncommitted admission slot.
    ///
    /// # Errors
    ///
    /// Returns an error if a required fetch, an apply, a delete or the status
    /// patch fails, or the pass times out.
    pub async fn run(&self, resource: &R::Resource) -> Result<RunOutcome, PipelineError> {
        match tokio::time::timeout(self.timeout, self.run_phases(resource)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                name: resource.name_any(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    async fn run_phases(&self, resource: &R::Resource) -> Result<RunOutcome, PipelineError> {
        let kind = R::Resource::kind(&());
        let name = resource.name_any();
        let namespace = resource
            .namespace()
            .ok_or_else(|| PipelineError::Invariant(format!("{kind} {name} has no namespace")))?;

        debug!(namespace = %namespace, name = %name, kind = %kind, "Fetching dependencies");
        let fetched = self.reconciler.fetch(resource).await?;
        let observation = self.reconciler.observe(resource, fetched);

        let mut plan = self.reconciler.plan(resource, &observation)?;
        plan.apply.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        // Stale children go before any apply, which may reuse their names.
        let mut deleted = 0;
        for stale in &plan.delete {
            self.writer
                .delete(&stale.resource, &namespace, &stale.name)
                .await
                .map_err(|source| PipelineError::Delete {
                    kind: stale.resource.kind.clone(),
                    name: stale.name.clone(),
                    source,
                })?;
            metrics::record_child_deleted(&stale.resource.kind);
            deleted += 1;
        }

        let mut applied = 0;
        for desired in &mut plan.apply {
            prepare_child(resource, &namespace, desired)?;
            self.writer
                .apply(desired, self.reconciler.field_manager())
                .await
                .map_err(|source| PipelineError::Apply {
                    kind: desired.kind().to_string(),
                    name: desired.name().to_string(),
                    source,
                })?;
            metrics::record_child_applied(desired.kind(), desired.owned);
            applied += 1;
        }

        if let Some(slot) = plan.slot.take() {
            debug!(key = %slot.key(), "Committing discovery slot");
            slot.commit();
        }

        let current = R::status(resource);
        let mut status = current.cloned().unwrap_or_default();
        let mut conditions =
            ConditionManager::new(status.conditions(), self.reconciler.required_conditions());
        self.reconciler
            .decorate_status(resource, &observation, &mut status, &mut conditions);
        conditions.derive_ready();

        let previous = status.conditions().to_vec();
        status.set_conditions(conditions.into_conditions());
        status.set_observed_generation(resource.meta().generation);

        for transition in diff_condition_transitions(&previous, status.conditions()) {
            info!(
                namespace = %namespace,
                name = %name,
                kind = %kind,
                condition = %transition.condition_type,
                from = transition.from.as_deref().unwrap_or("<none>"),
                to = %transition.to,
                reason = transition.reason.as_deref().unwrap_or_default(),
                "Condition transition"
            );
        }

        let mut outcome = RunOutcome {
            status: status.overall(),
            requeue_after: plan.requeue_after,
            conflict: false,
            applied,
            deleted,
            status_patched: false,
        };

        if !status_needs_update(current, &status) {
            debug!(namespace = %namespace, name = %name, "Status unchanged, skipping patch");
            return Ok(outcome);
        }

        let patch = status_patch(resource, &status, &name)?;
        let api_resource = ApiResource::erase::<R::Resource>(&());
        match self
            .writer
            .patch_status(&api_resource, &namespace, &name, &patch)
            .await
        {
            Ok(()) => {
                metrics::record_status_patch(&kind);
                outcome.status_patched = true;
            }
            Err(err) if ErrorCategory::of(&err) == ErrorCategory::Conflict => {
                debug!(namespace = %namespace, name = %name, "Status patch conflict, requeueing");
                outcome.conflict = true;
            }
            Err(source) => return Err(PipelineError::StatusPatch { name, source }),
        }

        Ok(outcome)
    }
}

/// Default the child's namespace to the parent's and attach the owner reference.
fn prepare_child<K>(
    owner: &K,
    namespace: &str,
    desired: &mut DesiredObject,
) -> Result<(), PipelineError>
where
    K: Resource<DynamicType = ()>,
{
    if desired.object.metadata.namespace.is_none() {
        desired.object.metadata.namespace = Some(namespace.to_string());
    }
    if desired.namespace() != namespace {
        return Err(PipelineError::Invariant(format!(
            "{} {} is planned in namespace {} but its parent lives in {namespace}",
            desired.kind(),
            desired.name(),
            desired.namespace(),
        )));
    }

    if desired.owned {
        let owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
            PipelineError::Invariant(format!(
                "{} {} cannot own {}: missing name or uid",
                K::kind(&()),
                owner.meta().name.as_deref().unwrap_or_default(),
                desired.name(),
            ))
        })?;
        desired.object.metadata.owner_references = Some(vec![owner_ref]);
    }
    Ok(())
}

/// Merge patch for the status subresource.
///
/// Carries the resource version the status was computed from so a concurrent
/// writer causes a conflict instead of being overwritten.
fn status_patch<K, S>(resource: &K, status: &S, name: &str) -> Result<serde_json::Value, PipelineError>
where
    K: Resource,
    S: Serialize,
{
    let status = serde_json::to_value(status).map_err(|source| PipelineError::Serialization {
        what: format!("status of {name}"),
        source,
    })?;

    Ok(match resource.meta().resource_version.as_deref() {
        Some(version) => json!({ "metadata": { "resourceVersion": version }, "status": status }),
        None => json!({ "status": status }),
    })
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
