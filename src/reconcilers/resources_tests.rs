// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `resources.rs`

#[cfg(test)]
mod tests {
    use super::super::{DesiredObject, StaleObject};
    use crate::crd::{AIMTemplateCache, AIMTemplateCacheSpec};
    use k8s_openapi::api::batch::v1::Job;
    use k8s_openapi::api::core::v1::PersistentVolumeClaim;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const TEST_NAMESPACE: &str = "models";

    fn pvc(name: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(TEST_NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn template_cache(name: &str) -> AIMTemplateCache {
        let mut tc = AIMTemplateCache::new(
            name,
            AIMTemplateCacheSpec {
                template_name: "llama".to_string(),
                storage_class_name: None,
                env: vec![],
                image_pull_secrets: vec![],
            },
        );
        tc.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        tc
    }

    #[test]
    fn test_owned_core_object() {
        let desired = DesiredObject::owned(&pvc("llama-cache")).unwrap();

        assert!(desired.owned);
        assert_eq!(desired.kind(), "PersistentVolumeClaim");
        assert_eq!(desired.name(), "llama-cache");
        assert_eq!(desired.namespace(), TEST_NAMESPACE);
        assert_eq!(desired.resource.api_version, "v1");
        assert_eq!(
            desired.object.types.as_ref().map(|t| t.kind.as_str()),
            Some("PersistentVolumeClaim")
        );
    }

    #[test]
    fn test_shared_custom_resource_keeps_spec() {
        let desired = DesiredObject::shared(&template_cache("llama-tc")).unwrap();

        assert!(!desired.owned);
        assert_eq!(desired.kind(), "AIMTemplateCache");
        assert_eq!(desired.resource.api_version, "aim.eai.amd.com/v1alpha1");
        assert_eq!(desired.object.data["spec"]["templateName"], "llama");
    }

    #[test]
    fn test_sort_key_orders_by_api_version_kind_and_name() {
        let mut objects = vec![
            DesiredObject::shared(&template_cache("b")).unwrap(),
            DesiredObject::owned(&pvc("z")).unwrap(),
            DesiredObject::owned(&pvc("a")).unwrap(),
        ];
        objects.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let names: Vec<_> = objects.iter().map(DesiredObject::name).collect();
        assert_eq!(names, vec!["b", "a", "z"]);
    }

    #[test]
    fn test_stale_object_of() {
        let stale = StaleObject::of::<Job>("discover-old");
        assert_eq!(stale.name, "discover-old");
        assert_eq!(stale.resource.kind, "Job");
        assert_eq!(stale.resource.api_version, "batch/v1");
    }
}
