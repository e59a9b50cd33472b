// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `AIMTemplateCache` reconciliation.
//!
//! A template cache warms every model source of one `AIMServiceTemplate`. Each
//! source is bound to the best `AIMModelCache` in the namespace with the same
//! source URI (and the same storage class, when the template cache sets one).
//! Sources with no usable cache get a new model cache owned by the template cache.
//!
//! Bindings are recomputed from the namespace's model caches on every pass and
//! only persisted as flat records in `status.resolvedCaches`.

use crate::constants::{DEFAULT_MODEL_CACHE_SIZE, FIELD_MANAGER_TEMPLATE_CACHE};
use crate::context::Context;
use crate::crd::{
    AIMModelCache, AIMModelCacheSpec, AIMModelSource, AIMServiceTemplate, AIMStatus,
    AIMTemplateCache, AIMTemplateCacheStatus, ResolvedReference,
};
use crate::errors::PipelineError;
use crate::labels::{
    AIM_SOURCE_MODEL_LABEL, AIM_TEMPLATE_CACHE_LABEL, K8S_MANAGED_BY, K8S_PART_OF,
    MANAGED_BY_TEMPLATE_CACHE, PART_OF_AIM_ENGINE,
};
use crate::naming::{generate_derived_name, sanitize_label_value};
use crate::reconcilers::fetch::{fetch_list, fetch_optional, FetchResult};
use crate::reconcilers::health::{aggregate_status, first_unhealthy, ComponentHealth, DependencyType};
use crate::reconcilers::matching::{resolve_best_matches, Candidate, Dependency};
use crate::reconcilers::pipeline::{DomainReconciler, Pipeline, PlanResult, RunOutcome};
use crate::reconcilers::resources::DesiredObject;
use crate::reconcilers::status::ConditionManager;
use crate::status_reasons::{
    CONDITION_TYPE_CACHE_READY, CONDITION_TYPE_TEMPLATE_FOUND, REASON_AWAITING_TEMPLATE,
    REASON_CACHES_AVAILABLE, REASON_CACHE_FAILED, REASON_DEPENDENCY_READY,
    REASON_DEPENDENCY_STATUS_UNSET, REASON_NO_MODEL_SOURCES, REASON_PROGRESSING,
    REASON_TEMPLATE_FOUND, REASON_WARM, REASON_WARMING,
};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;

/// A model source to be bound, constrained to the template cache's storage class.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceDependency {
    pub source: AIMModelSource,
    pub storage_class_name: Option<String>,
}

impl Dependency for SourceDependency {
    fn key(&self) -> &str {
        &self.source.name
    }

    fn match_key(&self) -> &str {
        &self.source.source_uri
    }

    fn scope(&self) -> Option<&str> {
        self.storage_class_name.as_deref()
    }
}

impl Candidate for AIMModelCache {
    fn match_key(&self) -> &str {
        &self.spec.source_uri
    }

    fn scope(&self) -> Option<&str> {
        self.spec.storage_class_name.as_deref()
    }

    fn status(&self) -> AIMStatus {
        self.status.as_ref().map(|s| s.status).unwrap_or_default()
    }

    fn reference(&self) -> (String, String) {
        (self.name_any(), self.uid().unwrap_or_default())
    }
}

/// Raw reads for one template cache.
#[derive(Debug)]
pub struct TemplateCacheFetched {
    pub template: FetchResult<AIMServiceTemplate>,
    pub model_caches: Vec<AIMModelCache>,
}

/// What the controller knows about one template cache.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemplateCacheObservation {
    pub template_found: bool,
    pub sources: Vec<AIMModelSource>,
    /// One entry per bound source, in source order.
    pub resolved: Vec<ResolvedReference>,
    /// Sources with no eligible model cache.
    pub missing: Vec<SourceDependency>,
    /// Health of the referenced template.
    pub template_health: Option<ComponentHealth>,
    /// One record per source: bound caches first, then missing sources.
    pub cache_health: Vec<ComponentHealth>,
}

impl TemplateCacheObservation {
    /// Every source is bound and at least one source exists.
    #[must_use]
    pub fn all_caches_available(&self) -> bool {
        self.missing.is_empty() && !self.sources.is_empty()
    }

    /// Overall status of the template cache.
    ///
    /// `Pending` without a template or without sources. Otherwise the worst status
    /// over the per-source cache health, so the cache is `Ready` only once every
    /// bound model cache is `Ready`.
    #[must_use]
    pub fn overall(&self) -> AIMStatus {
        if !self.template_found || self.sources.is_empty() {
            return AIMStatus::Pending;
        }
        aggregate_status(&self.cache_health)
    }
}

/// Health of the model cache bound to one source.
#[must_use]
pub fn cache_health(reference: &ResolvedReference) -> ComponentHealth {
    let component = format!("cache/{}", reference.key);
    match reference.status {
        AIMStatus::Ready => ComponentHealth::ready(component, REASON_DEPENDENCY_READY),
        AIMStatus::Failed => ComponentHealth::new(
            component,
            AIMStatus::Failed,
            REASON_CACHE_FAILED,
            format!("Model cache {} for {} failed", reference.name, reference.key),
        ),
        other => ComponentHealth::new(
            component,
            other,
            REASON_WARMING,
            format!(
                "Model cache {} for {} is {}",
                reference.name,
                reference.key,
                other.as_str()
            ),
        ),
    }
}

/// Health of a source that has no model cache yet.
#[must_use]
pub fn missing_cache_health(missing: &SourceDependency) -> ComponentHealth {
    ComponentHealth::new(
        format!("cache/{}", missing.source.name),
        AIMStatus::Pending,
        REASON_WARMING,
        format!("No model cache for {} yet", missing.source.name),
    )
    .with_dependency_type(DependencyType::Downstream)
}

/// Health of a template as seen by a cache warming it.
#[must_use]
pub fn template_health(template: &AIMServiceTemplate) -> ComponentHealth {
    match template.status.as_ref().map(|s| s.status).unwrap_or_default() {
        AIMStatus::Ready => ComponentHealth::ready("template", REASON_DEPENDENCY_READY),
        AIMStatus::Unset => ComponentHealth::new(
            "template",
            AIMStatus::Unset,
            REASON_DEPENDENCY_STATUS_UNSET,
            "Template has not reported a status yet",
        ),
        other => ComponentHealth::new(
            "template",
            other,
            REASON_PROGRESSING,
            format!("Template is {}", other.as_str()),
        ),
    }
}

fn storage_class_scope(template_cache: &AIMTemplateCache) -> Option<String> {
    template_cache
        .spec
        .storage_class_name
        .clone()
        .filter(|sc| !sc.is_empty())
}

/// Bind the template's model sources to the namespace's model caches.
#[must_use]
pub fn observe_template_cache(
    template_cache: &AIMTemplateCache,
    fetched: &TemplateCacheFetched,
) -> TemplateCacheObservation {
    let health = fetched.template.to_upstream_health("template", template_health);
    let Some(template) = fetched.template.value() else {
        return TemplateCacheObservation {
            template_health: Some(health),
            ..Default::default()
        };
    };

    let sources = template
        .status
        .as_ref()
        .map(|s| s.model_sources.clone())
        .unwrap_or_default();

    let scope = storage_class_scope(template_cache);
    let dependencies: Vec<SourceDependency> = sources
        .iter()
        .map(|source| SourceDependency {
            source: source.clone(),
            storage_class_name: scope.clone(),
        })
        .collect();

    let bindings = resolve_best_matches(&dependencies, &fetched.model_caches);
    let resolved = bindings.to_references();
    let missing: Vec<SourceDependency> = bindings.missing.iter().map(|d| (*d).clone()).collect();
    let cache_health = resolved
        .iter()
        .map(cache_health)
        .chain(missing.iter().map(missing_cache_health))
        .collect();

    TemplateCacheObservation {
        template_found: true,
        sources,
        resolved,
        missing,
        template_health: Some(health),
        cache_health,
    }
}

/// Name of the model cache created for a model source.
///
/// The source name is kept readable and suffixed with a hash of the source URI and
/// storage class, so sources whose names sanitize alike and template caches pinned
/// to different storage classes never share a cache name.
///
/// # Errors
///
/// Returns an error if the name cannot be derived.
pub fn model_cache_name(missing: &SourceDependency) -> Result<String, PipelineError> {
    generate_derived_name(
        &[&missing.source.name],
        &[
            &missing.source.source_uri,
            missing.storage_class_name.as_deref().unwrap_or_default(),
        ],
    )
    .map_err(|err| PipelineError::Invariant(err.to_string()))
}

/// Build the model cache for a source that has none.
///
/// # Errors
///
/// Returns an error if the cache name cannot be derived.
pub fn build_model_cache(
    template_cache: &AIMTemplateCache,
    missing: &SourceDependency,
) -> Result<AIMModelCache, PipelineError> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_TEMPLATE_CACHE.to_string());
    labels.insert(K8S_PART_OF.to_string(), PART_OF_AIM_ENGINE.to_string());
    labels.insert(
        AIM_TEMPLATE_CACHE_LABEL.to_string(),
        sanitize_label_value(&template_cache.name_any()),
    );
    labels.insert(
        AIM_SOURCE_MODEL_LABEL.to_string(),
        sanitize_label_value(&missing.source.name),
    );

    let mut cache = AIMModelCache::new(
        &model_cache_name(missing)?,
        AIMModelCacheSpec {
            source_uri: missing.source.source_uri.clone(),
            storage_class_name: missing.storage_class_name.clone(),
            size: missing
                .source
                .size
                .clone()
                .unwrap_or_else(|| Quantity(DEFAULT_MODEL_CACHE_SIZE.to_string())),
            env: template_cache.spec.env.clone(),
            model_download_image: None,
            image_pull_secrets: template_cache.spec.image_pull_secrets.clone(),
        },
    );
    cache.metadata.namespace = template_cache.namespace();
    cache.metadata.labels = Some(labels);
    Ok(cache)
}

/// One owned model cache per missing source. Nothing until the template exists.
///
/// # Errors
///
/// Returns an error if a model cache cannot be named or serialized.
pub fn plan_template_cache(
    template_cache: &AIMTemplateCache,
    observation: &TemplateCacheObservation,
) -> Result<PlanResult, PipelineError> {
    let mut plan = PlanResult::empty();
    if !observation.template_found {
        return Ok(plan);
    }
    for missing in &observation.missing {
        plan = plan.with(DesiredObject::owned(&build_model_cache(template_cache, missing)?)?);
    }
    Ok(plan)
}

/// Project the observation onto status and conditions.
pub fn decorate_template_cache(
    template_cache: &AIMTemplateCache,
    observation: &TemplateCacheObservation,
    status: &mut AIMTemplateCacheStatus,
    conditions: &mut ConditionManager,
) {
    if observation.template_found {
        conditions.mark_true(CONDITION_TYPE_TEMPLATE_FOUND, REASON_TEMPLATE_FOUND, "");
    } else {
        conditions.mark_false(
            CONDITION_TYPE_TEMPLATE_FOUND,
            REASON_AWAITING_TEMPLATE,
            &format!(
                "Waiting for template {} to be created",
                template_cache.spec.template_name
            ),
        );
    }

    if !observation.template_found {
        conditions.mark_false(
            CONDITION_TYPE_CACHE_READY,
            REASON_AWAITING_TEMPLATE,
            "Template not found",
        );
    } else if observation.sources.is_empty() {
        let message = match observation.template_health.as_ref() {
            Some(health) if !health.is_ready() => format!(
                "Template has not reported any model sources: {}",
                health.message
            ),
            _ => "Template has not reported any model sources".to_string(),
        };
        conditions.mark_false(CONDITION_TYPE_CACHE_READY, REASON_NO_MODEL_SOURCES, &message);
    } else if let Some(failed) = observation
        .cache_health
        .iter()
        .find(|h| h.state == AIMStatus::Failed)
    {
        conditions.mark_false(CONDITION_TYPE_CACHE_READY, REASON_CACHE_FAILED, &failed.message);
    } else if !observation.missing.is_empty() {
        conditions.mark_false(
            CONDITION_TYPE_CACHE_READY,
            REASON_WARMING,
            &format!(
                "{} of {} model sources have no cache yet",
                observation.missing.len(),
                observation.sources.len()
            ),
        );
    } else if let Some(downloading) = first_unhealthy(&observation.cache_health) {
        conditions.mark_false(
            CONDITION_TYPE_CACHE_READY,
            REASON_CACHES_AVAILABLE,
            &downloading.message,
        );
    } else {
        conditions.mark_true(CONDITION_TYPE_CACHE_READY, REASON_WARM, "");
    }

    status.resolved_caches = observation.resolved.clone();
    status.missing_sources = observation
        .missing
        .iter()
        .map(|m| m.source.name.clone())
        .collect();
    status.status = observation.overall();
}

/// [`DomainReconciler`] for `AIMTemplateCache`.
pub struct TemplateCacheReconciler {
    client: Client,
}

impl TemplateCacheReconciler {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DomainReconciler for TemplateCacheReconciler {
    type Resource = AIMTemplateCache;
    type Status = AIMTemplateCacheStatus;
    type Fetched = TemplateCacheFetched;
    type Observation = TemplateCacheObservation;

    fn field_manager(&self) -> &'static str {
        FIELD_MANAGER_TEMPLATE_CACHE
    }

    fn required_conditions(&self) -> &'static [&'static str] {
        &[CONDITION_TYPE_TEMPLATE_FOUND, CONDITION_TYPE_CACHE_READY]
    }

    fn status(resource: &AIMTemplateCache) -> Option<&AIMTemplateCacheStatus> {
        resource.status.as_ref()
    }

    async fn fetch(&self, template_cache: &AIMTemplateCache) -> Result<TemplateCacheFetched, PipelineError> {
        let namespace = template_cache.namespace().unwrap_or_default();

        let template_api: Api<AIMServiceTemplate> = Api::namespaced(self.client.clone(), &namespace);
        let template = fetch_optional(&template_api, &template_cache.spec.template_name)
            .await
            .required()
            .map_err(|source| PipelineError::Fetch {
                what: format!("template {}", template_cache.spec.template_name),
                source,
            })?;

        let cache_api: Api<AIMModelCache> = Api::namespaced(self.client.clone(), &namespace);
        let model_caches = match fetch_list(&cache_api, &ListParams::default()).await {
            FetchResult::Found(items) => items,
            FetchResult::NotFound => Vec::new(),
            FetchResult::Failed(source) => {
                return Err(PipelineError::Fetch {
                    what: "model caches".to_string(),
                    source,
                })
            }
        };

        Ok(TemplateCacheFetched {
            template,
            model_caches,
        })
    }

    fn observe(
        &self,
        template_cache: &AIMTemplateCache,
        fetched: TemplateCacheFetched,
    ) -> TemplateCacheObservation {
        observe_template_cache(template_cache, &fetched)
    }

    fn plan(
        &self,
        template_cache: &AIMTemplateCache,
        observation: &TemplateCacheObservation,
    ) -> Result<PlanResult, PipelineError> {
        plan_template_cache(template_cache, observation)
    }

    fn decorate_status(
        &self,
        template_cache: &AIMTemplateCache,
        observation: &TemplateCacheObservation,
        status: &mut AIMTemplateCacheStatus,
        conditions: &mut ConditionManager,
    ) {
        decorate_template_cache(template_cache, observation, status, conditions);
    }
}

/// Run one reconcile pass over a template cache.
///
/// # Errors
///
/// Returns an error if a required read, an apply or the status patch fails.
pub async fn reconcile_aimtemplatecache(
    ctx: &Context,
    template_cache: &AIMTemplateCache,
) -> Result<RunOutcome, PipelineError> {
    Pipeline::new(
        TemplateCacheReconciler::new(ctx.client.clone()),
        ctx.writer(),
        ctx.reconcile_timeout,
    )
    .run(template_cache)
    .await
}

#[cfg(test)]
#[path = "aimtemplatecache_tests.rs"]
mod aimtemplatecache_tests;
