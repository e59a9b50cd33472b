// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `finalizers.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{AIMServiceTemplate, AIMServiceTemplateSpec};
    use crate::labels::FINALIZER_SERVICE_TEMPLATE;
    use crate::reconcilers::finalizers::{finalizers_with, finalizers_without, has_finalizer};

    const OTHER_FINALIZER: &str = "example.com/other";

    fn template(finalizers: Option<Vec<&str>>) -> AIMServiceTemplate {
        let mut template = AIMServiceTemplate::new(
            "llama",
            AIMServiceTemplateSpec {
                model_name: "amd/llama".to_string(),
                image: "rocm/aim:latest".to_string(),
                model_sources: vec![],
                caching: None,
                env: vec![],
                image_pull_secrets: vec![],
                service_account_name: None,
            },
        );
        template.metadata.namespace = Some("models".to_string());
        template.metadata.finalizers =
            finalizers.map(|list| list.into_iter().map(String::from).collect());
        template
    }

    #[test]
    fn test_has_finalizer() {
        assert!(!has_finalizer(&template(None), FINALIZER_SERVICE_TEMPLATE));
        assert!(!has_finalizer(&template(Some(vec![])), FINALIZER_SERVICE_TEMPLATE));
        assert!(has_finalizer(
            &template(Some(vec![OTHER_FINALIZER, FINALIZER_SERVICE_TEMPLATE])),
            FINALIZER_SERVICE_TEMPLATE
        ));
    }

    #[test]
    fn test_finalizers_with_appends_once() {
        let added = finalizers_with(&template(Some(vec![OTHER_FINALIZER])), FINALIZER_SERVICE_TEMPLATE);
        assert_eq!(
            added,
            Some(vec![
                OTHER_FINALIZER.to_string(),
                FINALIZER_SERVICE_TEMPLATE.to_string()
            ])
        );

        let present = template(Some(vec![FINALIZER_SERVICE_TEMPLATE]));
        assert_eq!(finalizers_with(&present, FINALIZER_SERVICE_TEMPLATE), None);
    }

    #[test]
    fn test_finalizers_with_on_missing_list() {
        assert_eq!(
            finalizers_with(&template(None), FINALIZER_SERVICE_TEMPLATE),
            Some(vec![FINALIZER_SERVICE_TEMPLATE.to_string()])
        );
    }

    #[test]
    fn test_finalizers_without_keeps_others() {
        let removed = finalizers_without(
            &template(Some(vec![OTHER_FINALIZER, FINALIZER_SERVICE_TEMPLATE])),
            FINALIZER_SERVICE_TEMPLATE,
        );
        assert_eq!(removed, Some(vec![OTHER_FINALIZER.to_string()]));
    }

    #[test]
    fn test_finalizers_without_is_idempotent() {
        assert_eq!(
            finalizers_without(&template(Some(vec![OTHER_FINALIZER])), FINALIZER_SERVICE_TEMPLATE),
            None
        );
        assert_eq!(finalizers_without(&template(None), FINALIZER_SERVICE_TEMPLATE), None);
    }
}
