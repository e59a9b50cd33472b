// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for AIM resources.
//!
//! Every reconciler runs the same pass through [`pipeline::Pipeline`]:
//!
//! 1. **Fetch** - Read the resource's dependencies from the API server
//! 2. **Observe** - Interpret what was read into domain facts
//! 3. **Plan** - Decide which children should exist
//! 4. **Apply** - Server-side apply the desired children, delete stale ones
//! 5. **Status** - Project the observation onto conditions and patch status
//!
//! # Available Reconcilers
//!
//! - [`reconcile_aimmodelcache`] - Provisions a cache volume and downloads one model into it
//! - [`reconcile_aimtemplatecache`] - Binds every model source of a template to a model cache
//! - [`reconcile_aimservicetemplate`] - Discovers a template's model sources and warms its cache
//!
//! # Example: Using a Reconciler
//!
//! ```rust,no_run
//! use aim_engine::context::Context;
//! use aim_engine::crd::AIMModelCache;
//! use aim_engine::reconcilers::reconcile_aimmodelcache;
//!
//! async fn reconcile_cache(ctx: &Context, cache: AIMModelCache) -> anyhow::Result<()> {
//!     let outcome = reconcile_aimmodelcache(ctx, &cache).await?;
//!     println!("cache is {}", outcome.status.as_str());
//!     Ok(())
//! }
//! ```

pub mod aimmodelcache;
pub mod aimservicetemplate;
pub mod aimtemplatecache;
pub mod fetch;
pub mod finalizers;
pub mod health;
pub mod jobs;
pub mod matching;
pub mod pipeline;
pub mod pods;
pub mod resources;
pub mod retry;
pub mod semaphore;
pub mod status;

#[cfg(test)]
mod matching_tests;

pub use aimmodelcache::reconcile_aimmodelcache;
pub use aimservicetemplate::reconcile_aimservicetemplate;
pub use aimtemplatecache::reconcile_aimtemplatecache;
