// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `pipeline.rs`
//!
//! The pipeline runs against an in-memory [`ClusterWriter`] that records every
//! mutation, so idempotence and the single-status-patch rule can be checked
//! without a cluster.

#[cfg(test)]
mod tests {
    use super::super::{DomainReconciler, Pipeline, PlanResult, RunOutcome};
    use crate::crd::{AIMModelCache, AIMModelCacheSpec, AIMModelCacheStatus, AIMStatus};
    use crate::errors::PipelineError;
    use crate::reconcilers::resources::{ClusterWriter, DesiredObject, StaleObject};
    use crate::reconcilers::semaphore::DiscoverySemaphore;
    use crate::reconcilers::status::ConditionManager;
    use crate::status_reasons::{CONDITION_TYPE_READY, CONDITION_TYPE_STORAGE_READY};
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::PersistentVolumeClaim;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::api::ApiResource;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const NAMESPACE: &str = "models";
    const SLOT_KEY: &str = "models/llama";

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(
            kube::core::Status {
                status: Some(kube::core::response::StatusSummary::Failure),
                message: "test".to_string(),
                reason: "Test".to_string(),
                code,
                metadata: None,
                details: None,
            }
            .boxed(),
        )
    }

    #[derive(Default)]
    struct MemoryWriter {
        objects: Mutex<BTreeMap<String, serde_json::Value>>,
        mutations: AtomicUsize,
        /// `apply <key>` / `delete <key>`, in call order.
        calls: Mutex<Vec<String>>,
        status_patches: Mutex<Vec<serde_json::Value>>,
        apply_error: Option<u16>,
        status_error: Option<u16>,
    }

    impl MemoryWriter {
        fn mutations(&self) -> usize {
            self.mutations.load(Ordering::SeqCst)
        }

        fn patches(&self) -> Vec<serde_json::Value> {
            self.status_patches.lock().unwrap().clone()
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn object(&self, key: &str) -> Option<serde_json::Value> {
            self.objects.lock().unwrap().get(key).cloned()
        }
    }

    #[async_trait]
    impl ClusterWriter for MemoryWriter {
        async fn apply(
            &self,
            desired: &DesiredObject,
            _field_manager: &str,
        ) -> Result<(), kube::Error> {
            if let Some(code) = self.apply_error {
                return Err(api_error(code));
            }
            let key = format!("{}/{}/{}", desired.kind(), desired.namespace(), desired.name());
            self.calls.lock().unwrap().push(format!("apply {key}"));
            let value = serde_json::to_value(&desired.object).unwrap();
            let mut objects = self.objects.lock().unwrap();
            if objects.get(&key) != Some(&value) {
                objects.insert(key, value);
                self.mutations.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn delete(
            &self,
            resource: &ApiResource,
            namespace: &str,
            name: &str,
        ) -> Result<(), kube::Error> {
            let key = format!("{}/{namespace}/{name}", resource.kind);
            self.calls.lock().unwrap().push(format!("delete {key}"));
            if self.objects.lock().unwrap().remove(&key).is_some() {
                self.mutations.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn patch_status(
            &self,
            _resource: &ApiResource,
            _namespace: &str,
            _name: &str,
            patch: &serde_json::Value,
        ) -> Result<(), kube::Error> {
            if let Some(code) = self.status_error {
                return Err(api_error(code));
            }
            self.status_patches.lock().unwrap().push(patch.clone());
            Ok(())
        }
    }

    /// Plans one owned PVC and reports a fixed storage health.
    struct FakeReconciler {
        storage: AIMStatus,
        /// PVC the plan also marks for deletion.
        stale: Option<String>,
        fetch_error: Option<u16>,
        fetch_delay: Option<Duration>,
        semaphore: Option<Arc<DiscoverySemaphore>>,
    }

    impl FakeReconciler {
        fn new(storage: AIMStatus) -> Self {
            Self {
                storage,
                stale: None,
                fetch_error: None,
                fetch_delay: None,
                semaphore: None,
            }
        }
    }

    #[async_trait]
    impl DomainReconciler for FakeReconciler {
        type Resource = AIMModelCache;
        type Status = AIMModelCacheStatus;
        type Fetched = AIMStatus;
        type Observation = AIMStatus;

        fn field_manager(&self) -> &'static str {
            "test-controller"
        }

        fn required_conditions(&self) -> &'static [&'static str] {
            &[CONDITION_TYPE_STORAGE_READY]
        }

        fn status(resource: &AIMModelCache) -> Option<&AIMModelCacheStatus> {
            resource.status.as_ref()
        }

        async fn fetch(&self, _resource: &AIMModelCache) -> Result<AIMStatus, PipelineError> {
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            match self.fetch_error {
                Some(code) => Err(PipelineError::Fetch {
                    what: "pvc".to_string(),
                    source: api_error(code),
                }),
                None => Ok(self.storage),
            }
        }

        fn observe(&self, _resource: &AIMModelCache, fetched: AIMStatus) -> AIMStatus {
            fetched
        }

        fn plan(
            &self,
            resource: &AIMModelCache,
            _observation: &AIMStatus,
        ) -> Result<PlanResult, PipelineError> {
            let pvc = PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(format!("{}-cache", resource.metadata.name.as_deref().unwrap())),
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut plan = PlanResult::empty().with(DesiredObject::owned(&pvc)?);
            if let Some(stale) = &self.stale {
                plan.delete.push(StaleObject::of::<PersistentVolumeClaim>(stale.clone()));
            }
            if let Some(semaphore) = &self.semaphore {
                plan.slot = semaphore.acquire_guard(SLOT_KEY);
            }
            Ok(plan)
        }

        fn decorate_status(
            &self,
            _resource: &AIMModelCache,
            observation: &AIMStatus,
            status: &mut AIMModelCacheStatus,
            conditions: &mut ConditionManager,
        ) {
            if *observation == AIMStatus::Ready {
                conditions.mark_true(CONDITION_TYPE_STORAGE_READY, "PVCBound", "");
            } else {
                conditions.mark_false(CONDITION_TYPE_STORAGE_READY, "PVCPending", "waiting");
            }
            status.status = *observation;
        }
    }

    fn model_cache(status: Option<AIMModelCacheStatus>) -> AIMModelCache {
        let mut cache = AIMModelCache::new(
            "llama",
            AIMModelCacheSpec {
                source_uri: "hf://amd/llama".to_string(),
                storage_class_name: None,
                size: Quantity("10Gi".to_string()),
                env: vec![],
                model_download_image: None,
                image_pull_secrets: vec![],
            },
        );
        cache.metadata.namespace = Some(NAMESPACE.to_string());
        cache.metadata.uid = Some("uid-llama".to_string());
        cache.metadata.generation = Some(3);
        cache.metadata.resource_version = Some("42".to_string());
        cache.status = status;
        cache
    }

    fn pipeline(
        reconciler: FakeReconciler,
        writer: &Arc<MemoryWriter>,
    ) -> Pipeline<FakeReconciler, Arc<MemoryWriter>> {
        Pipeline::new(reconciler, Arc::clone(writer), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_first_pass_applies_and_patches_status_once() {
        let writer = Arc::new(MemoryWriter::default());
        let outcome = pipeline(FakeReconciler::new(AIMStatus::Ready), &writer)
            .run(&model_cache(None))
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert!(outcome.status_patched);
        assert_eq!(outcome.status, AIMStatus::Ready);
        assert_eq!(writer.mutations(), 1);

        let patches = writer.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0]["metadata"]["resourceVersion"], "42");
        assert_eq!(patches[0]["status"]["status"], "Ready");
        assert_eq!(patches[0]["status"]["observedGeneration"], 3);
    }

    #[tokio::test]
    async fn test_owned_child_gets_owner_reference_and_namespace() {
        let writer = Arc::new(MemoryWriter::default());
        pipeline(FakeReconciler::new(AIMStatus::Pending), &writer)
            .run(&model_cache(None))
            .await
            .unwrap();

        let pvc = writer
            .object("PersistentVolumeClaim/models/llama-cache")
            .expect("PVC applied in the parent namespace");
        let owner = &pvc["metadata"]["ownerReferences"][0];
        assert_eq!(owner["kind"], "AIMModelCache");
        assert_eq!(owner["uid"], "uid-llama");
        assert_eq!(owner["controller"], true);
    }

    #[tokio::test]
    async fn test_stale_children_are_deleted_before_apply() {
        let writer = Arc::new(MemoryWriter::default());
        let key = "PersistentVolumeClaim/models/llama-cache";
        writer
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), serde_json::json!({"old": true}));

        // The replacement reuses the stale child's name.
        let mut reconciler = FakeReconciler::new(AIMStatus::Ready);
        reconciler.stale = Some("llama-cache".to_string());
        let outcome = pipeline(reconciler, &writer)
            .run(&model_cache(None))
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.applied, 1);
        assert_eq!(
            writer.calls(),
            vec![format!("delete {key}"), format!("apply {key}")]
        );
        let replacement = writer.object(key).expect("replacement survives the pass");
        assert!(replacement.get("old").is_none());
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let writer = Arc::new(MemoryWriter::default());
        let first = pipeline(FakeReconciler::new(AIMStatus::Ready), &writer);
        first.run(&model_cache(None)).await.unwrap();

        let persisted: AIMModelCacheStatus =
            serde_json::from_value(writer.patches()[0]["status"].clone()).unwrap();
        let outcome = first.run(&model_cache(Some(persisted))).await.unwrap();

        assert_eq!(outcome.applied, 1);
        assert!(!outcome.status_patched);
        assert_eq!(writer.mutations(), 1);
        assert_eq!(writer.patches().len(), 1);
    }

    #[tokio::test]
    async fn test_ready_condition_follows_required_conditions() {
        let writer = Arc::new(MemoryWriter::default());
        pipeline(FakeReconciler::new(AIMStatus::Pending), &writer)
            .run(&model_cache(None))
            .await
            .unwrap();

        let status: AIMModelCacheStatus =
            serde_json::from_value(writer.patches()[0]["status"].clone()).unwrap();
        let ready = status
            .conditions
            .iter()
            .find(|c| c.r#type == CONDITION_TYPE_READY)
            .unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason.as_deref(), Some("PVCPending"));
    }

    #[tokio::test]
    async fn test_status_conflict_requeues_immediately() {
        let writer = Arc::new(MemoryWriter {
            status_error: Some(409),
            ..Default::default()
        });
        let outcome = pipeline(FakeReconciler::new(AIMStatus::Ready), &writer)
            .run(&model_cache(None))
            .await
            .unwrap();

        assert!(outcome.conflict);
        assert!(!outcome.status_patched);
        assert_eq!(outcome.requeue_duration(), Duration::ZERO);
        assert_eq!(outcome.requeue_reason(), "conflict");
    }

    #[tokio::test]
    async fn test_other_status_errors_fail_the_pass() {
        let writer = Arc::new(MemoryWriter {
            status_error: Some(500),
            ..Default::default()
        });
        let err = pipeline(FakeReconciler::new(AIMStatus::Ready), &writer)
            .run(&model_cache(None))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StatusPatch { .. }));
    }

    #[tokio::test]
    async fn test_fetch_error_aborts_before_writes() {
        let writer = Arc::new(MemoryWriter::default());
        let mut reconciler = FakeReconciler::new(AIMStatus::Ready);
        reconciler.fetch_error = Some(503);

        let err = pipeline(reconciler, &writer)
            .run(&model_cache(None))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Fetch { .. }));
        assert_eq!(writer.mutations(), 0);
        assert!(writer.patches().is_empty());
    }

    #[tokio::test]
    async fn test_apply_failure_releases_uncommitted_slot() {
        let semaphore = Arc::new(DiscoverySemaphore::new(1));
        let writer = Arc::new(MemoryWriter {
            apply_error: Some(500),
            ..Default::default()
        });
        let mut reconciler = FakeReconciler::new(AIMStatus::Pending);
        reconciler.semaphore = Some(Arc::clone(&semaphore));

        let err = pipeline(reconciler, &writer)
            .run(&model_cache(None))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Apply { .. }));
        assert!(!semaphore.is_held(SLOT_KEY));
        assert!(writer.patches().is_empty());
    }

    #[tokio::test]
    async fn test_successful_apply_commits_slot() {
        let semaphore = Arc::new(DiscoverySemaphore::new(1));
        let writer = Arc::new(MemoryWriter::default());
        let mut reconciler = FakeReconciler::new(AIMStatus::Pending);
        reconciler.semaphore = Some(Arc::clone(&semaphore));

        pipeline(reconciler, &writer)
            .run(&model_cache(None))
            .await
            .unwrap();

        assert!(semaphore.is_held(SLOT_KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let writer = Arc::new(MemoryWriter::default());
        let mut reconciler = FakeReconciler::new(AIMStatus::Ready);
        reconciler.fetch_delay = Some(Duration::from_secs(120));

        let err = pipeline(reconciler, &writer)
            .run(&model_cache(None))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Timeout { seconds: 60, .. }));
        assert_eq!(writer.mutations(), 0);
    }

    #[tokio::test]
    async fn test_missing_namespace_is_an_invariant_violation() {
        let writer = Arc::new(MemoryWriter::default());
        let mut cache = model_cache(None);
        cache.metadata.namespace = None;

        let err = pipeline(FakeReconciler::new(AIMStatus::Ready), &writer)
            .run(&cache)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Invariant(_)));
    }

    #[test]
    fn test_requeue_defaults() {
        let outcome = RunOutcome {
            status: AIMStatus::Ready,
            requeue_after: None,
            conflict: false,
            applied: 0,
            deleted: 0,
            status_patched: false,
        };
        assert_eq!(outcome.requeue_duration(), Duration::from_secs(300));
        assert_eq!(outcome.requeue_reason(), "ready");

        let pending = RunOutcome {
            status: AIMStatus::Pending,
            ..outcome.clone()
        };
        assert_eq!(pending.requeue_duration(), Duration::from_secs(30));

        let scheduled = RunOutcome {
            requeue_after: Some(Duration::from_secs(5)),
            ..pending
        };
        assert_eq!(scheduled.requeue_duration(), Duration::from_secs(5));
        assert_eq!(scheduled.requeue_reason(), "scheduled");
    }
}
