// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status_reasons` module
//!
//! These tests verify the reason constants that callers match on and the
//! condition-type helper.

#[cfg(test)]
mod tests {
    use crate::status_reasons::*;

    // ============================================================================
    // Test Common Reason Constants
    // ============================================================================

    #[test]
    fn test_reason_all_ready_constant() {
        assert_eq!(REASON_ALL_READY, "AllReady");
    }

    #[test]
    fn test_reason_not_evaluated_constant() {
        assert_eq!(REASON_NOT_EVALUATED, "NotEvaluated");
    }

    #[test]
    fn test_dependency_reasons() {
        assert_eq!(REASON_FETCH_ERROR, "FetchError");
        assert_eq!(REASON_REFERENCE_NOT_FOUND, "ReferenceNotFound");
        assert_eq!(REASON_RESOURCE_NOT_READY, "ResourceNotReady");
    }

    // ============================================================================
    // Test Domain Reason Constants
    // ============================================================================

    #[test]
    fn test_template_cache_reasons() {
        assert_eq!(REASON_WARMING, "Warming");
        assert_eq!(REASON_WARM, "Warm");
        assert_eq!(REASON_AWAITING_TEMPLATE, "AwaitingTemplate");
    }

    #[test]
    fn test_service_template_reasons() {
        assert_eq!(REASON_DISCOVERY_JOB_CREATED, "DiscoveryJobCreated");
        assert_eq!(REASON_DISCOVERY_THROTTLED, "DiscoveryThrottled");
        assert_eq!(REASON_AWAITING_DISCOVERY, "AwaitingDiscovery");
    }

    #[test]
    fn test_pod_reasons() {
        assert_eq!(REASON_IMAGE_PULL_BACK_OFF, "ImagePullBackOff");
        assert_eq!(REASON_IMAGE_PULL_AUTH_FAILURE, "ImagePullAuthFailure");
        assert_eq!(REASON_IMAGE_NOT_FOUND, "ImageNotFound");
        assert_eq!(REASON_POD_FAILED, "PodFailed");
    }

    #[test]
    fn test_model_cache_reasons() {
        assert_eq!(REASON_INVALID_SOURCE_URI, "InvalidSourceURI");
        assert_eq!(REASON_PVC_BOUND, "PVCBound");
    }

    // ============================================================================
    // Test Condition Types
    // ============================================================================

    #[test]
    fn test_condition_types() {
        assert_eq!(CONDITION_TYPE_READY, "Ready");
        assert_eq!(CONDITION_TYPE_CACHE_READY, "CacheReady");
        assert_eq!(CONDITION_TYPE_DISCOVERED, "Discovered");
        assert_eq!(CONDITION_TYPE_STORAGE_READY, "StorageReady");
    }

    #[test]
    fn test_reasons_are_camel_case() {
        let reasons = [
            REASON_ALL_READY,
            REASON_NOT_EVALUATED,
            REASON_NO_DEPENDENCIES,
            REASON_FETCH_ERROR,
            REASON_REFERENCE_NOT_FOUND,
            REASON_WARMING,
            REASON_DOWNLOAD_FAILED,
            REASON_DISCOVERY_THROTTLED,
        ];

        for reason in reasons {
            assert!(!reason.is_empty());
            assert!(reason.chars().next().unwrap().is_ascii_uppercase());
            assert!(!reason.contains(' '), "reason {reason} contains a space");
        }
    }

    // ============================================================================
    // Test Helper Functions
    // ============================================================================

    #[test]
    fn test_dependency_condition_type_capitalizes() {
        assert_eq!(dependency_condition_type("template"), "TemplateHealthy");
        assert_eq!(dependency_condition_type("pvc"), "PvcHealthy");
    }

    #[test]
    fn test_dependency_condition_type_keeps_inner_case() {
        assert_eq!(
            dependency_condition_type("modelCaches"),
            "ModelCachesHealthy"
        );
    }

    #[test]
    fn test_dependency_condition_type_empty() {
        assert_eq!(dependency_condition_type(""), "Healthy");
    }
}
