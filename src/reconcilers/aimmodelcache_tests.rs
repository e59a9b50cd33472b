// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `aimmodelcache.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::AIMModelCacheSpec;
    use crate::status_reasons::CONDITION_TYPE_READY;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use crate::status_reasons::{REASON_IMAGE_NOT_FOUND, REASON_PODS_PENDING};
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, PersistentVolumeClaimStatus,
        PodStatus,
    };

    const NAMESPACE: &str = "models";

    fn model_cache(source_uri: &str) -> AIMModelCache {
        let mut cache = AIMModelCache::new(
            "llama-3-1-8b",
            AIMModelCacheSpec {
                source_uri: source_uri.to_string(),
                storage_class_name: Some("fast-rwx".to_string()),
                size: Quantity("40Gi".to_string()),
                env: vec![EnvVar {
                    name: "HF_TOKEN".to_string(),
                    value: Some("secret".to_string()),
                    ..Default::default()
                }],
                model_download_image: None,
                image_pull_secrets: vec![],
            },
        );
        cache.metadata.namespace = Some(NAMESPACE.to_string());
        cache
    }

    fn pvc(phase: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("llama-3-1-8b-cache".to_string()),
                ..Default::default()
            },
            status: Some(PersistentVolumeClaimStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn job(condition: Option<&str>, active: i32) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("llama-3-1-8b-cache-download".to_string()),
                ..Default::default()
            },
            status: Some(JobStatus {
                active: Some(active),
                conditions: condition.map(|type_| {
                    vec![JobCondition {
                        type_: type_.to_string(),
                        status: "True".to_string(),
                        message: Some("BackoffLimitExceeded".to_string()),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn wffc_storage_class() -> StorageClass {
        StorageClass {
            volume_binding_mode: Some("WaitForFirstConsumer".to_string()),
            ..Default::default()
        }
    }

    fn found<T>(value: Option<T>) -> FetchResult<T> {
        value.map_or(FetchResult::NotFound, FetchResult::Found)
    }

    fn observe(
        cache: &AIMModelCache,
        pvc: Option<PersistentVolumeClaim>,
        job: Option<Job>,
        storage_class: Option<StorageClass>,
    ) -> ModelCacheObservation {
        observe_with_pods(cache, pvc, job, storage_class, vec![])
    }

    fn observe_with_pods(
        cache: &AIMModelCache,
        pvc: Option<PersistentVolumeClaim>,
        job: Option<Job>,
        storage_class: Option<StorageClass>,
        pods: Vec<Pod>,
    ) -> ModelCacheObservation {
        observe_model_cache(
            cache,
            ModelCacheFetched {
                pvc: found(pvc),
                job: found(job),
                pods,
                storage_class: found(storage_class),
            },
        )
    }

    fn download_pod(phase: &str, waiting: Option<(&str, &str)>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("llama-3-1-8b-cache-download-x7k2p".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: waiting.map(|(reason, message)| {
                    vec![ContainerStatus {
                        name: "download".to_string(),
                        state: Some(ContainerState {
                            waiting: Some(ContainerStateWaiting {
                                reason: Some(reason.to_string()),
                                message: Some(message.to_string()),
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn decorate(observation: &ModelCacheObservation) -> (AIMModelCacheStatus, ConditionManager) {
        let mut status = AIMModelCacheStatus::default();
        let mut conditions =
            ConditionManager::new(&[], &[CONDITION_TYPE_STORAGE_READY, CONDITION_TYPE_DOWNLOADED]);
        decorate_model_cache(observation, &mut status, &mut conditions);
        conditions.derive_ready();
        (status, conditions)
    }

    fn planned_kinds(plan: &PlanResult) -> Vec<&str> {
        plan.apply.iter().map(DesiredObject::kind).collect()
    }

    // ------------------------------------------------------------------
    // Source URI validation
    // ------------------------------------------------------------------

    #[test]
    fn test_validate_source_uri_accepts_supported_schemes() {
        assert!(validate_source_uri("hf://amd/Llama-3.1-8B-Instruct").is_ok());
        assert!(validate_source_uri("s3://models/llama").is_ok());
    }

    #[test]
    fn test_validate_source_uri_rejects_other_schemes() {
        assert_eq!(
            validate_source_uri("https://huggingface.co/amd/llama"),
            Err(SourceUriError::UnsupportedScheme {
                scheme: "https".to_string()
            })
        );
    }

    #[test]
    fn test_validate_source_uri_rejects_garbage() {
        assert!(matches!(
            validate_source_uri("amd/llama"),
            Err(SourceUriError::Malformed { .. })
        ));
        assert!(matches!(
            validate_source_uri("hf://"),
            Err(SourceUriError::MissingModel { .. })
        ));
    }

    #[test]
    fn test_model_from_source_uri() {
        assert_eq!(model_from_source_uri("hf://amd/Llama-3.1-8B"), "amd/Llama-3.1-8B");
        assert_eq!(model_from_source_uri("plain"), "plain");
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    #[test]
    fn test_child_names() {
        assert_eq!(pvc_name("llama").unwrap(), "llama-cache");
        assert_eq!(download_job_name("llama").unwrap(), "llama-cache-download");
        assert!(download_job_name(&"x".repeat(80)).unwrap().len() <= 63);
    }

    #[test]
    fn test_build_pvc() {
        let pvc = build_pvc(&model_cache("hf://amd/Llama-3.1-8B")).unwrap();
        let spec = pvc.spec.unwrap();

        assert_eq!(pvc.metadata.name.as_deref(), Some("llama-3-1-8b-cache"));
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast-rwx"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_string()]));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap()["storage"],
            Quantity("40Gi".to_string())
        );

        let labels = pvc.metadata.labels.unwrap();
        assert_eq!(labels[AIM_SOURCE_MODEL_LABEL], "amd_llama-3.1-8b");
        assert_eq!(labels[AIM_MODEL_CACHE_LABEL], "llama-3-1-8b");
    }

    #[test]
    fn test_build_pvc_empty_storage_class_uses_default() {
        let mut cache = model_cache("hf://amd/llama");
        cache.spec.storage_class_name = Some(String::new());
        let pvc = build_pvc(&cache).unwrap();
        assert_eq!(pvc.spec.unwrap().storage_class_name, None);
    }

    #[test]
    fn test_build_download_job() {
        let job = build_download_job(&model_cache("hf://amd/llama")).unwrap();
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(DOWNLOAD_JOB_BACKOFF_LIMIT));
        assert_eq!(spec.ttl_seconds_after_finished, Some(DOWNLOAD_JOB_TTL_SECS));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            pod.security_context.unwrap().run_as_user,
            Some(DOWNLOAD_JOB_RUN_AS_USER)
        );

        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some(DEFAULT_DOWNLOAD_IMAGE));
        assert!(container.args.as_ref().unwrap()[1].contains("hf://amd/llama /cache"));

        let env_names: Vec<_> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(env_names, vec!["HF_TOKEN", "HF_HUB_DISABLE_XET", "HF_HOME", "UMASK"]);

        let claim = pod.volumes.unwrap()[0]
            .persistent_volume_claim
            .clone()
            .unwrap()
            .claim_name;
        assert_eq!(claim, "llama-3-1-8b-cache");
    }

    #[test]
    fn test_build_download_job_custom_image() {
        let mut cache = model_cache("hf://amd/llama");
        cache.spec.model_download_image = Some("registry.local/downloader:1".to_string());
        let job = build_download_job(&cache).unwrap();
        let image = job.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .clone();
        assert_eq!(image.as_deref(), Some("registry.local/downloader:1"));
    }

    // ------------------------------------------------------------------
    // Plan
    // ------------------------------------------------------------------

    #[test]
    fn test_plan_creates_pvc_first() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(&cache, None, None, None);
        let plan = plan_model_cache(&cache, &observation).unwrap();

        assert_eq!(planned_kinds(&plan), vec!["PersistentVolumeClaim"]);
        assert!(plan.apply[0].owned);
        assert_eq!(observation.overall(), AIMStatus::Progressing);
    }

    #[test]
    fn test_plan_creates_job_once_pvc_bound() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(&cache, Some(pvc("Bound")), None, None);
        let plan = plan_model_cache(&cache, &observation).unwrap();

        assert_eq!(planned_kinds(&plan), vec!["Job"]);
        assert!(plan.apply[0].owned);
    }

    #[test]
    fn test_plan_waits_for_pending_pvc() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(&cache, Some(pvc("Pending")), None, None);
        assert!(plan_model_cache(&cache, &observation)
            .unwrap()
            .apply
            .is_empty());
    }

    #[test]
    fn test_plan_creates_job_for_wait_for_first_consumer() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(
            &cache,
            Some(pvc("Pending")),
            None,
            Some(wffc_storage_class()),
        );
        let plan = plan_model_cache(&cache, &observation).unwrap();
        assert_eq!(planned_kinds(&plan), vec!["Job"]);
    }

    #[test]
    fn test_plan_never_replans_existing_children() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(&cache, Some(pvc("Bound")), Some(job(None, 1)), None);
        assert!(plan_model_cache(&cache, &observation)
            .unwrap()
            .apply
            .is_empty());
    }

    #[test]
    fn test_plan_nothing_for_invalid_source() {
        let cache = model_cache("ftp://amd/llama");
        let observation = observe(&cache, None, None, None);
        assert!(plan_model_cache(&cache, &observation)
            .unwrap()
            .apply
            .is_empty());
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    #[test]
    fn test_ready_when_bound_and_downloaded() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(&cache, Some(pvc("Bound")), Some(job(Some("Complete"), 0)), None);
        let (status, conditions) = decorate(&observation);

        assert_eq!(status.status, AIMStatus::Ready);
        assert_eq!(
            status.persistent_volume_claim.as_deref(),
            Some("llama-3-1-8b-cache")
        );
        assert!(conditions.is_true(CONDITION_TYPE_READY));
        assert!(!conditions.is_true(CONDITION_TYPE_FAILURE));
        assert!(!conditions.is_true(CONDITION_TYPE_PROGRESSING));
    }

    #[test]
    fn test_downloading_is_progressing() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(&cache, Some(pvc("Bound")), Some(job(None, 1)), None);
        let (status, conditions) = decorate(&observation);

        assert_eq!(status.status, AIMStatus::Progressing);
        assert!(conditions.is_true(CONDITION_TYPE_PROGRESSING));
        let ready = conditions.get(CONDITION_TYPE_READY).unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason.as_deref(), Some(REASON_DOWNLOADING));
    }

    #[test]
    fn test_failed_download() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(&cache, Some(pvc("Bound")), Some(job(Some("Failed"), 0)), None);
        let (status, conditions) = decorate(&observation);

        assert_eq!(status.status, AIMStatus::Failed);
        let failure = conditions.get(CONDITION_TYPE_FAILURE).unwrap();
        assert_eq!(failure.status, "True");
        assert_eq!(failure.reason.as_deref(), Some(REASON_DOWNLOAD_FAILED));
        assert_eq!(failure.message.as_deref(), Some("BackoffLimitExceeded"));
    }

    #[test]
    fn test_downloaded_condition_follows_job_health() {
        let cache = model_cache("hf://amd/llama");

        let observation = observe(&cache, Some(pvc("Bound")), Some(job(Some("Failed"), 0)), None);
        let (_, conditions) = decorate(&observation);
        let downloaded = conditions.get(CONDITION_TYPE_DOWNLOADED).unwrap();
        assert_eq!(downloaded.status, "False");
        assert_eq!(downloaded.reason.as_deref(), Some(REASON_DOWNLOAD_FAILED));
        assert_eq!(downloaded.message.as_deref(), Some("BackoffLimitExceeded"));

        let observation = observe(&cache, Some(pvc("Bound")), Some(job(None, 0)), None);
        let (_, conditions) = decorate(&observation);
        let downloaded = conditions.get(CONDITION_TYPE_DOWNLOADED).unwrap();
        assert_eq!(downloaded.reason.as_deref(), Some(REASON_DOWNLOADING));
        assert!(downloaded.message.as_deref().unwrap().contains("waiting for pods"));
    }

    #[test]
    fn test_lost_pvc_is_pending_with_failure() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(&cache, Some(pvc("Lost")), None, None);
        let (status, conditions) = decorate(&observation);

        assert_eq!(status.status, AIMStatus::Pending);
        assert_eq!(
            conditions.get(CONDITION_TYPE_FAILURE).unwrap().reason.as_deref(),
            Some(REASON_PVC_LOST)
        );
    }

    #[test]
    fn test_invalid_source_fails() {
        let cache = model_cache("https://example.com/llama");
        let observation = observe(&cache, None, None, None);
        let (status, conditions) = decorate(&observation);

        assert_eq!(status.status, AIMStatus::Failed);
        let failure = conditions.get(CONDITION_TYPE_FAILURE).unwrap();
        assert_eq!(failure.reason.as_deref(), Some(REASON_INVALID_SOURCE_URI));
        assert!(failure.message.as_deref().unwrap().contains("https"));
    }

    #[test]
    fn test_health_records_per_child() {
        let cache = model_cache("hf://amd/llama");

        let observation = observe(&cache, None, None, None);
        assert_eq!(observation.health.len(), 1);
        assert_eq!(observation.health[0].component, "pvc");

        let observation = observe(&cache, Some(pvc("Bound")), None, None);
        let components: Vec<_> = observation.health.iter().map(|h| h.component.as_str()).collect();
        assert_eq!(components, vec!["pvc", "download-job"]);
        assert_eq!(observation.health[1].state, AIMStatus::Pending);
        assert_eq!(observation.overall(), AIMStatus::Progressing);

        let observation = observe_with_pods(
            &cache,
            Some(pvc("Bound")),
            Some(job(None, 1)),
            None,
            vec![download_pod("Running", None)],
        );
        let components: Vec<_> = observation.health.iter().map(|h| h.component.as_str()).collect();
        assert_eq!(components, vec!["pvc", "download-job", "pods"]);
        assert_eq!(observation.overall(), AIMStatus::Progressing);
    }

    #[test]
    fn test_pending_pod_holds_download_pending() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe_with_pods(
            &cache,
            Some(pvc("Bound")),
            Some(job(None, 1)),
            None,
            vec![download_pod("Pending", None)],
        );
        assert_eq!(observation.overall(), AIMStatus::Pending);
        assert_eq!(observation.health_of("pods").unwrap().reason, REASON_PODS_PENDING);
    }

    #[test]
    fn test_image_pull_failure_fails_download() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe_with_pods(
            &cache,
            Some(pvc("Bound")),
            Some(job(None, 1)),
            None,
            vec![download_pod(
                "Pending",
                Some(("ErrImagePull", "kserve/storage-initializer:v9: manifest unknown")),
            )],
        );
        let (status, conditions) = decorate(&observation);

        assert_eq!(status.status, AIMStatus::Failed);
        let downloaded = conditions.get(CONDITION_TYPE_DOWNLOADED).unwrap();
        assert_eq!(downloaded.status, "False");
        assert_eq!(downloaded.reason.as_deref(), Some(REASON_IMAGE_NOT_FOUND));
        let failure = conditions.get(CONDITION_TYPE_FAILURE).unwrap();
        assert_eq!(failure.status, "True");
        assert_eq!(failure.reason.as_deref(), Some(REASON_IMAGE_NOT_FOUND));
        assert!(failure.message.as_deref().unwrap().starts_with("Container download:"));
        assert!(!conditions.is_true(CONDITION_TYPE_PROGRESSING));
    }

    #[test]
    fn test_pods_of_finished_job_are_ignored() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe_with_pods(
            &cache,
            Some(pvc("Bound")),
            Some(job(Some("Complete"), 0)),
            None,
            vec![download_pod("Failed", None)],
        );
        assert!(observation.health_of("pods").is_none());
        assert_eq!(observation.overall(), AIMStatus::Ready);
    }

    #[test]
    fn test_unknown_pvc_phase_is_unknown_storage() {
        let cache = model_cache("hf://amd/llama");
        let observation = observe(&cache, Some(pvc("Released")), None, None);
        let (_, conditions) = decorate(&observation);
        let storage = conditions.get(CONDITION_TYPE_STORAGE_READY).unwrap();
        assert_eq!(storage.status, "Unknown");
        assert_eq!(storage.reason.as_deref(), Some("Released"));
    }
}
