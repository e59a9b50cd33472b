// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # aim-engine - Kubernetes Control Plane for AI Model Serving
//!
//! aim-engine is a Kubernetes operator written in Rust that prepares model-serving
//! workloads: it discovers which model artifacts a serving template needs, provisions
//! cache volumes for them and downloads the models ahead of time.
//!
//! ## Overview
//!
//! This library provides the core functionality for the operator, including:
//!
//! - Custom Resource Definitions (CRDs) for service templates and model caches
//! - A shared Fetch → Observe → Plan → Apply → Status reconciliation pipeline
//! - A cluster-wide admission semaphore for discovery jobs
//! - Prometheus metrics for every reconcile pass
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types and the status lattice
//! - [`reconcilers`] - Reconciliation logic for each resource type
//! - [`controller`] - Controller wiring, watches and requeue policy
//! - [`context`] - Shared context and reflector stores for controllers
//! - [`naming`] - Deterministic, RFC 1123 compliant child names
//! - [`metrics`] - Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use aim_engine::crd::{AIMModelCache, AIMModelCacheSpec};
//! use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
//!
//! let spec = AIMModelCacheSpec {
//!     source_uri: "hf://amd/Llama-3.1-8B-Instruct".to_string(),
//!     storage_class_name: Some("fast".to_string()),
//!     size: Quantity("50Gi".to_string()),
//!     env: vec![],
//!     model_download_image: None,
//!     image_pull_secrets: vec![],
//! };
//! let cache = AIMModelCache::new("llama-8b", spec);
//! ```
//!
//! ## Resources
//!
//! - **`AIMServiceTemplate`** - A serving runtime image plus the models it loads
//! - **`AIMTemplateCache`** - Warms every model of one template
//! - **`AIMModelCache`** - One model downloaded into one volume

pub mod constants;
pub mod context;
pub mod controller;
pub mod crd;
pub mod errors;
pub mod labels;
pub mod metrics;
pub mod naming;
pub mod reconcilers;
pub mod status_reasons;

#[cfg(test)]
mod crd_tests;
#[cfg(test)]
mod status_reasons_tests;
