// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{
        API_GROUP, API_GROUP_VERSION, API_VERSION, KIND_MODEL_CACHE, KIND_SERVICE_TEMPLATE,
        KIND_TEMPLATE_CACHE,
    };
    use crate::crd::*;
    use kube::Resource;
    use std::cmp::Ordering;

    const ALL_STATUSES: [AIMStatus; 5] = [
        AIMStatus::Unset,
        AIMStatus::Failed,
        AIMStatus::Pending,
        AIMStatus::Progressing,
        AIMStatus::Ready,
    ];

    #[test]
    fn test_status_lattice_order() {
        assert_eq!(
            AIMStatus::Failed.compare(AIMStatus::Pending),
            Ordering::Less
        );
        assert_eq!(
            AIMStatus::Pending.compare(AIMStatus::Progressing),
            Ordering::Less
        );
        assert_eq!(
            AIMStatus::Progressing.compare(AIMStatus::Ready),
            Ordering::Less
        );
        assert_eq!(AIMStatus::Unset.compare(AIMStatus::Failed), Ordering::Equal);
    }

    #[test]
    fn test_compare_is_antisymmetric() {
        for a in ALL_STATUSES {
            for b in ALL_STATUSES {
                assert_eq!(
                    a.compare(b),
                    b.compare(a).reverse(),
                    "compare({a}, {b}) must mirror compare({b}, {a})"
                );
            }
        }
    }

    #[test]
    fn test_compare_is_transitive() {
        for a in ALL_STATUSES {
            for b in ALL_STATUSES {
                for c in ALL_STATUSES {
                    if a.compare(b) != Ordering::Greater && b.compare(c) != Ordering::Greater {
                        assert_ne!(
                            a.compare(c),
                            Ordering::Greater,
                            "{a} <= {b} <= {c} must imply {a} <= {c}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_ready_is_top_of_lattice() {
        for status in ALL_STATUSES {
            assert_ne!(AIMStatus::Ready.compare(status), Ordering::Less);
        }
    }

    #[test]
    fn test_worst_of_empty_is_none() {
        assert_eq!(worst_of(Vec::<AIMStatus>::new()), None);
        assert_eq!(best_of(Vec::<AIMStatus>::new()), None);
    }

    #[test]
    fn test_worst_and_best_of() {
        let statuses = vec![
            AIMStatus::Ready,
            AIMStatus::Pending,
            AIMStatus::Progressing,
        ];
        assert_eq!(worst_of(statuses.clone()), Some(AIMStatus::Pending));
        assert_eq!(best_of(statuses), Some(AIMStatus::Ready));
    }

    #[test]
    fn test_reductions_return_input_elements_in_any_order() {
        let statuses = [AIMStatus::Progressing, AIMStatus::Ready, AIMStatus::Failed];
        let permutations = [
            [statuses[0], statuses[1], statuses[2]],
            [statuses[0], statuses[2], statuses[1]],
            [statuses[1], statuses[0], statuses[2]],
            [statuses[1], statuses[2], statuses[0]],
            [statuses[2], statuses[0], statuses[1]],
            [statuses[2], statuses[1], statuses[0]],
        ];

        for permutation in permutations {
            let worst = worst_of(permutation).unwrap();
            let best = best_of(permutation).unwrap();
            assert!(permutation.contains(&worst));
            assert!(permutation.contains(&best));
            assert_eq!(worst, AIMStatus::Failed);
            assert_eq!(best, AIMStatus::Ready);
        }
    }

    #[test]
    fn test_unset_never_beats_failed() {
        assert_eq!(
            best_of([AIMStatus::Failed, AIMStatus::Unset]),
            Some(AIMStatus::Failed)
        );
        assert_eq!(
            worst_of([AIMStatus::Unset, AIMStatus::Failed]),
            Some(AIMStatus::Unset)
        );
    }

    #[test]
    fn test_status_serializes_unset_as_empty_string() {
        let json = serde_json::to_string(&AIMStatus::Unset).unwrap();
        assert_eq!(json, "\"\"");

        let parsed: AIMStatus = serde_json::from_str("\"Progressing\"").unwrap();
        assert_eq!(parsed, AIMStatus::Progressing);
    }

    #[test]
    fn test_status_defaults_to_unset_when_missing() {
        let status: AIMModelCacheStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.status, AIMStatus::Unset);
        assert!(!status.status.is_set());
        assert!(status.conditions.is_empty());
    }

    #[test]
    fn test_condition_uses_camel_case() {
        let condition = Condition {
            r#type: "Ready".into(),
            status: "True".into(),
            reason: Some("AllReady".into()),
            message: None,
            last_transition_time: Some("2025-01-01T00:00:00Z".into()),
        };

        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value["type"], "Ready");
        assert_eq!(value["lastTransitionTime"], "2025-01-01T00:00:00Z");
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_model_cache_spec_deserializes() {
        let spec: AIMModelCacheSpec = serde_json::from_value(serde_json::json!({
            "sourceUri": "hf://amd/Llama-3.1-8B-Instruct",
            "storageClassName": "fast",
            "size": "40Gi"
        }))
        .unwrap();

        assert_eq!(spec.source_uri, "hf://amd/Llama-3.1-8B-Instruct");
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(spec.size.0, "40Gi");
        assert!(spec.env.is_empty());
        assert!(spec.model_download_image.is_none());
    }

    #[test]
    fn test_status_with_conditions_accessors() {
        let mut status = AIMTemplateCacheStatus::default();
        status.set_overall(AIMStatus::Progressing);
        status.set_observed_generation(Some(3));
        status.set_conditions(vec![Condition {
            r#type: "CacheReady".into(),
            status: "False".into(),
            ..Condition::default()
        }]);

        assert_eq!(status.overall(), AIMStatus::Progressing);
        assert_eq!(status.observed_generation, Some(3));
        assert_eq!(status.conditions().len(), 1);
    }

    #[test]
    fn test_resource_api_versions() {
        assert_eq!(API_GROUP_VERSION, format!("{API_GROUP}/{API_VERSION}"));

        assert_eq!(AIMModelCache::group(&()), API_GROUP);
        assert_eq!(AIMModelCache::version(&()), API_VERSION);
        assert_eq!(AIMModelCache::api_version(&()), API_GROUP_VERSION);
        assert_eq!(AIMModelCache::kind(&()), KIND_MODEL_CACHE);
        assert_eq!(AIMTemplateCache::api_version(&()), API_GROUP_VERSION);
        assert_eq!(AIMTemplateCache::kind(&()), KIND_TEMPLATE_CACHE);
        assert_eq!(AIMServiceTemplate::api_version(&()), API_GROUP_VERSION);
        assert_eq!(AIMServiceTemplate::kind(&()), KIND_SERVICE_TEMPLATE);
    }
}
