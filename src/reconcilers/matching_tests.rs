// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `matching.rs`

#[cfg(test)]
mod tests {
    use crate::crd::AIMStatus;
    use crate::reconcilers::matching::{resolve_best_matches, Candidate, Dependency};

    struct Source {
        name: &'static str,
        uri: &'static str,
        scope: Option<&'static str>,
    }

    impl Dependency for Source {
        fn key(&self) -> &str {
            self.name
        }
        fn match_key(&self) -> &str {
            self.uri
        }
        fn scope(&self) -> Option<&str> {
            self.scope
        }
    }

    struct Cache {
        name: &'static str,
        uri: &'static str,
        scope: Option<&'static str>,
        status: AIMStatus,
    }

    impl Candidate for Cache {
        fn match_key(&self) -> &str {
            self.uri
        }
        fn scope(&self) -> Option<&str> {
            self.scope
        }
        fn status(&self) -> AIMStatus {
            self.status
        }
        fn reference(&self) -> (String, String) {
            (self.name.to_string(), format!("uid-{}", self.name))
        }
    }

    fn source(name: &'static str, uri: &'static str) -> Source {
        Source {
            name,
            uri,
            scope: None,
        }
    }

    fn cache(name: &'static str, uri: &'static str, status: AIMStatus) -> Cache {
        Cache {
            name,
            uri,
            scope: Some("fast"),
            status,
        }
    }

    #[test]
    fn test_picks_best_status() {
        let deps = [source("llama", "hf://amd/llama")];
        let candidates = [
            cache("a", "hf://amd/llama", AIMStatus::Pending),
            cache("b", "hf://amd/llama", AIMStatus::Ready),
            cache("c", "hf://amd/llama", AIMStatus::Progressing),
        ];

        let result = resolve_best_matches(&deps, &candidates);
        assert_eq!(result.get("llama").unwrap().name, "b");
        assert!(result.missing.is_empty());
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let deps = [source("llama", "hf://amd/llama")];
        let candidates = [
            cache("first", "hf://amd/llama", AIMStatus::Ready),
            cache("second", "hf://amd/llama", AIMStatus::Ready),
        ];

        let result = resolve_best_matches(&deps, &candidates);
        assert_eq!(result.get("llama").unwrap().name, "first");
    }

    #[test]
    fn test_unset_candidates_are_ignored() {
        let deps = [source("llama", "hf://amd/llama")];
        let candidates = [cache("new", "hf://amd/llama", AIMStatus::Unset)];

        let result = resolve_best_matches(&deps, &candidates);
        assert!(result.bindings.is_empty());
        assert_eq!(result.missing.len(), 1);
        assert_eq!(result.missing[0].name, "llama");
    }

    #[test]
    fn test_failed_candidate_still_binds() {
        let deps = [source("llama", "hf://amd/llama")];
        let candidates = [cache("broken", "hf://amd/llama", AIMStatus::Failed)];

        let result = resolve_best_matches(&deps, &candidates);
        assert_eq!(result.get("llama").unwrap().status, AIMStatus::Failed);
    }

    #[test]
    fn test_scope_filters_candidates() {
        let deps = [Source {
            name: "llama",
            uri: "hf://amd/llama",
            scope: Some("slow"),
        }];
        let candidates = [
            cache("fast-one", "hf://amd/llama", AIMStatus::Ready),
            Cache {
                name: "unscoped",
                uri: "hf://amd/llama",
                scope: None,
                status: AIMStatus::Ready,
            },
        ];

        let result = resolve_best_matches(&deps, &candidates);
        assert!(result.get("llama").is_none());
        assert_eq!(result.missing.len(), 1);
    }

    #[test]
    fn test_every_dependency_appears_once() {
        let deps = [
            source("a", "hf://a"),
            source("b", "hf://b"),
            source("c", "hf://c"),
        ];
        let candidates = [
            cache("cache-c", "hf://c", AIMStatus::Progressing),
            cache("cache-a", "hf://a", AIMStatus::Ready),
        ];

        let result = resolve_best_matches(&deps, &candidates);
        assert_eq!(result.bindings.len() + result.missing.len(), deps.len());
        assert_eq!(result.bindings[0].dependency.name, "a");
        assert_eq!(result.bindings[1].dependency.name, "c");
        assert_eq!(result.missing[0].name, "b");
    }

    #[test]
    fn test_uri_prefix_is_not_a_match() {
        let deps = [source("m1", "hf://m1")];
        let candidates = [cache("m10", "hf://m10", AIMStatus::Ready)];

        let result = resolve_best_matches(&deps, &candidates);
        assert!(result.bindings.is_empty());
        assert_eq!(result.missing.len(), 1);
        assert_eq!(result.missing[0].name, "m1");
    }

    #[test]
    fn test_to_references() {
        let deps = [source("llama", "hf://amd/llama")];
        let candidates = [cache("llama-cache", "hf://amd/llama", AIMStatus::Ready)];

        let refs = resolve_best_matches(&deps, &candidates).to_references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "llama-cache");
        assert_eq!(refs[0].uid, "uid-llama-cache");
        assert_eq!(refs[0].key, "llama");
        assert_eq!(refs[0].status, AIMStatus::Ready);
    }

    #[test]
    fn test_no_dependencies() {
        let deps: [Source; 0] = [];
        let candidates = [cache("x", "hf://x", AIMStatus::Ready)];
        let result = resolve_best_matches(&deps, &candidates);
        assert!(result.bindings.is_empty());
        assert!(result.missing.is_empty());
    }
}
