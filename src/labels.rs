// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label, annotation and finalizer constants used across all reconcilers.
//!
//! Labels are the only link between a shared child (one created without an owner
//! reference) and the objects that use it, so every controller must stamp them
//! consistently.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/part-of` on every object the engine creates
pub const PART_OF_AIM_ENGINE: &str = "aim-engine";

/// Component value for model discovery jobs
pub const COMPONENT_DISCOVERY: &str = "discovery";

/// Component value for model download jobs and cache volumes
pub const COMPONENT_MODEL_CACHE: &str = "model-cache";

/// Value for `app.kubernetes.io/managed-by` on objects created by the `AIMModelCache` controller
pub const MANAGED_BY_MODEL_CACHE: &str = "modelcache-controller";

/// Value for `app.kubernetes.io/managed-by` on objects created by the `AIMTemplateCache` controller
pub const MANAGED_BY_TEMPLATE_CACHE: &str = "templatecache-controller";

/// Value for `app.kubernetes.io/managed-by` on objects created by the `AIMServiceTemplate` controller
pub const MANAGED_BY_SERVICE_TEMPLATE: &str = "servicetemplate-controller";

// ============================================================================
// AIM-Specific Labels
// ============================================================================

/// Name of the `AIMServiceTemplate` a discovery job or template cache belongs to
pub const AIM_TEMPLATE_LABEL: &str = "aim.eai.amd.com/template";

/// Name of the `AIMTemplateCache` that created a model cache
pub const AIM_TEMPLATE_CACHE_LABEL: &str = "aim.eai.amd.com/template.cache";

/// Name of the `AIMModelCache` a PVC or download job belongs to
pub const AIM_MODEL_CACHE_LABEL: &str = "aim.eai.amd.com/modelcache";

/// Sanitized source model name of a model cache
pub const AIM_SOURCE_MODEL_LABEL: &str = "aim.eai.amd.com/source.model";

/// UID of the `AIMServiceTemplate` that requested a shared template cache
pub const AIM_TEMPLATE_UID_LABEL: &str = "aim.eai.amd.com/template.uid";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `AIMServiceTemplate` resources; releases the discovery slot on deletion
pub const FINALIZER_SERVICE_TEMPLATE: &str = "aim.eai.amd.com/servicetemplate-finalizer";
