// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Best-match resolution of logical dependencies to concrete objects.
//!
//! A template cache needs one model cache per model source. Any number of model
//! caches may exist for the same source (different storage classes, a failed one
//! plus a fresh retry). This module picks the single best candidate per dependency.
//!
//! Resolution is a pure function of its inputs, so it can be recomputed on every
//! reconcile without persisting anything. The result is deterministic for a given
//! input order: among equally good candidates the one seen first wins.

use crate::crd::{AIMStatus, ResolvedReference};
use std::cmp::Ordering;

/// Something that needs to be bound to a concrete object.
pub trait Dependency {
    /// Stable key identifying the dependency (e.g. the model source name).
    fn key(&self) -> &str;

    /// Value a candidate must carry to satisfy the dependency.
    fn match_key(&self) -> &str;

    /// Scope the candidate must share. `None` accepts any scope.
    fn scope(&self) -> Option<&str>;
}

/// A concrete object that may satisfy a dependency.
pub trait Candidate {
    fn match_key(&self) -> &str;

    fn scope(&self) -> Option<&str>;

    fn status(&self) -> AIMStatus;

    /// Name and UID recorded in the persisted binding.
    fn reference(&self) -> (String, String);
}

/// One dependency bound to its best candidate.
#[derive(Debug)]
pub struct Binding<'a, D, C> {
    pub dependency: &'a D,
    pub candidate: &'a C,
}

/// Result of resolving a set of dependencies.
///
/// Every input dependency appears exactly once, either in `bindings` or in
/// `missing`, in input order.
#[derive(Debug)]
pub struct Bindings<'a, D, C> {
    pub bindings: Vec<Binding<'a, D, C>>,
    pub missing: Vec<&'a D>,
}

impl<D: Dependency, C: Candidate> Bindings<'_, D, C> {
    /// Candidate bound to the dependency with `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&C> {
        self.bindings
            .iter()
            .find(|b| b.dependency.key() == key)
            .map(|b| b.candidate)
    }

    /// Flat records of the bindings for persistence in status.
    #[must_use]
    pub fn to_references(&self) -> Vec<ResolvedReference> {
        self.bindings
            .iter()
            .map(|b| {
                let (name, uid) = b.candidate.reference();
                ResolvedReference {
                    name,
                    uid,
                    key: b.dependency.key().to_string(),
                    status: b.candidate.status(),
                }
            })
            .collect()
    }
}

/// Whether `candidate` may satisfy `dependency` at all.
///
/// Candidates that have not reported a status are never eligible.
fn is_eligible<D: Dependency, C: Candidate>(dependency: &D, candidate: &C) -> bool {
    candidate.match_key() == dependency.match_key()
        && dependency
            .scope()
            .is_none_or(|scope| candidate.scope() == Some(scope))
        && candidate.status().is_set()
}

/// Bind each dependency to its best eligible candidate.
///
/// Candidates are filtered by match key, scope and a reported status, then ranked
/// by status. Ties keep the first candidate in input order. Dependencies without
/// any eligible candidate are returned in `missing`.
pub fn resolve_best_matches<'a, D, C>(
    dependencies: &'a [D],
    candidates: &'a [C],
) -> Bindings<'a, D, C>
where
    D: Dependency,
    C: Candidate,
{
    let mut result = Bindings {
        bindings: Vec::with_capacity(dependencies.len()),
        missing: Vec::new(),
    };

    for dependency in dependencies {
        let best = candidates
            .iter()
            .filter(|c| is_eligible(dependency, *c))
            .fold(None::<&C>, |best, candidate| match best {
                Some(current)
                    if current.status().compare(candidate.status()) != Ordering::Less =>
                {
                    Some(current)
                }
                _ => Some(candidate),
            });

        match best {
            Some(candidate) => result.bindings.push(Binding {
                dependency,
                candidate,
            }),
            None => result.missing.push(dependency),
        }
    }

    result
}
