// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller wiring for the AIM resources.
//!
//! Each `run_*_controller` function builds a `kube::runtime::Controller` with the
//! watches its reconciler depends on and drives it until the watch stream ends.
//! The wrappers turn a reconcile result into a requeue [`Action`] and record
//! metrics for every pass.

use crate::constants::{
    ERROR_REQUEUE_DURATION_SECS, KIND_MODEL_CACHE, KIND_SERVICE_TEMPLATE, KIND_TEMPLATE_CACHE,
};
use crate::context::Context;
use crate::crd::{AIMModelCache, AIMServiceTemplate, AIMTemplateCache};
use crate::errors::{ErrorCategory, PipelineError};
use crate::metrics;
use crate::reconcilers::pipeline::RunOutcome;
use crate::reconcilers::{
    reconcile_aimmodelcache, reconcile_aimservicetemplate, reconcile_aimtemplatecache,
};
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::ResourceExt;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Reconciliation error wrapper
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ReconcileError(#[from] anyhow::Error);

/// Error policy shared by every controller.
///
/// Returns an action to requeue the resource after a delay when reconciliation fails.
#[allow(clippy::needless_pass_by_value)] // Signature required by kube::runtime::Controller
fn error_policy<T, C>(resource: Arc<T>, err: &ReconcileError, _ctx: Arc<C>) -> Action
where
    T: ResourceExt + Debug,
{
    error!(
        error = %err,
        namespace = %resource.namespace().unwrap_or_default(),
        name = %resource.name_any(),
        "Reconciliation error - will retry in {}s",
        ERROR_REQUEUE_DURATION_SECS
    );
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

/// Metric labels for a failed pass: `(error_type, category)`.
#[must_use]
pub fn error_labels(err: &anyhow::Error) -> (&'static str, &'static str) {
    if let Some(pipeline_err) = err.downcast_ref::<PipelineError>() {
        let category = pipeline_err
            .category()
            .map_or("internal", ErrorCategory::as_str);
        return (pipeline_err.metric_label(), category);
    }
    if let Some(kube_err) = err.downcast_ref::<kube::Error>() {
        return ("finalizer", ErrorCategory::of(kube_err).as_str());
    }
    ("reconcile", ErrorCategory::Other.as_str())
}

/// Turn the result of one pass into the controller's next action.
///
/// `None` means the pass handled a deletion; nothing is requeued until the object
/// changes again.
///
/// # Errors
///
/// Returns the reconcile error unchanged so the error policy can requeue.
pub fn finish_reconcile(
    kind: &str,
    started: Instant,
    result: Result<Option<RunOutcome>>,
) -> Result<Action, ReconcileError> {
    let duration = started.elapsed();
    match result {
        Ok(Some(outcome)) => {
            metrics::record_reconciliation_success(kind, duration);
            metrics::record_reconciliation_requeue(kind, outcome.requeue_reason());
            debug!(
                kind = %kind,
                status = outcome.status.as_str(),
                applied = outcome.applied,
                deleted = outcome.deleted,
                requeue_secs = outcome.requeue_duration().as_secs(),
                "Reconcile pass finished"
            );
            if outcome.conflict {
                warn!(kind = %kind, "Status patch conflicted, retrying");
            }
            Ok(outcome.action())
        }
        Ok(None) => {
            metrics::record_reconciliation_success(kind, duration);
            Ok(Action::await_change())
        }
        Err(err) => {
            let (error_type, category) = error_labels(&err);
            metrics::record_reconciliation_error(kind, duration);
            metrics::record_error(kind, error_type, category);
            Err(ReconcileError::from(err))
        }
    }
}

/// Run the `AIMModelCache` controller.
///
/// The cache reacts to its volume claim and download job.
///
/// # Errors
///
/// Returns an error if the controller fails to start or encounters a fatal error.
pub async fn run_aimmodelcache_controller(context: Arc<Context>) -> Result<()> {
    info!("Starting {KIND_MODEL_CACHE} controller");

    let client = context.client.clone();
    let api = Api::<AIMModelCache>::all(client.clone());
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(api, watcher_config.clone())
        .owns(Api::<PersistentVolumeClaim>::all(client.clone()), watcher_config.clone())
        .owns(Api::<Job>::all(client), watcher_config)
        .run(reconcile_aimmodelcache_wrapper, error_policy, context)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_aimmodelcache_wrapper(
    cache: Arc<AIMModelCache>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let result = reconcile_aimmodelcache(&ctx, &cache)
        .await
        .map(Some)
        .map_err(anyhow::Error::from);
    finish_reconcile(KIND_MODEL_CACHE, started, result)
}

/// Run the `AIMTemplateCache` controller.
///
/// Model caches are bound by source URI rather than ownership, so any model cache
/// change re-evaluates every template cache in its namespace. A template change
/// re-evaluates the template caches warming it.
///
/// # Errors
///
/// Returns an error if the controller fails to start or encounters a fatal error.
pub async fn run_aimtemplatecache_controller(context: Arc<Context>) -> Result<()> {
    info!("Starting {KIND_TEMPLATE_CACHE} controller");

    let client = context.client.clone();
    let api = Api::<AIMTemplateCache>::all(client.clone());
    let model_cache_api = Api::<AIMModelCache>::all(client.clone());
    let template_api = Api::<AIMServiceTemplate>::all(client);
    let watcher_config = WatcherConfig::default().any_semantic();

    let cache_stores = context.stores.clone();
    let template_stores = context.stores.clone();

    Controller::new(api, watcher_config.clone())
        .watches(model_cache_api, watcher_config.clone(), move |cache| {
            cache
                .namespace()
                .map(|namespace| cache_stores.template_caches_in_namespace(&namespace))
                .unwrap_or_default()
        })
        .watches(template_api, watcher_config, move |template| {
            template
                .namespace()
                .map(|namespace| {
                    template_stores.template_caches_for_template(&template.name_any(), &namespace)
                })
                .unwrap_or_default()
        })
        .run(reconcile_aimtemplatecache_wrapper, error_policy, context)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_aimtemplatecache_wrapper(
    template_cache: Arc<AIMTemplateCache>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let result = reconcile_aimtemplatecache(&ctx, &template_cache)
        .await
        .map(Some)
        .map_err(anyhow::Error::from);
    finish_reconcile(KIND_TEMPLATE_CACHE, started, result)
}

/// Run the `AIMServiceTemplate` controller.
///
/// The template reacts to its discovery job and to the template cache named after it.
///
/// # Errors
///
/// Returns an error if the controller fails to start or encounters a fatal error.
pub async fn run_aimservicetemplate_controller(context: Arc<Context>) -> Result<()> {
    info!("Starting {KIND_SERVICE_TEMPLATE} controller");

    let client = context.client.clone();
    let api = Api::<AIMServiceTemplate>::all(client.clone());
    let template_cache_api = Api::<AIMTemplateCache>::all(client.clone());
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(api, watcher_config.clone())
        .owns(Api::<Job>::all(client), watcher_config.clone())
        .watches(template_cache_api, watcher_config, |template_cache| {
            template_cache
                .namespace()
                .map(|namespace| {
                    ObjectRef::new(&template_cache.spec.template_name).within(&namespace)
                })
                .into_iter()
                .collect::<Vec<_>>()
        })
        .run(reconcile_aimservicetemplate_wrapper, error_policy, context)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_aimservicetemplate_wrapper(
    template: Arc<AIMServiceTemplate>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let result = reconcile_aimservicetemplate(&ctx, &template).await;
    finish_reconcile(KIND_SERVICE_TEMPLATE, started, result)
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
