// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Dependency health records.
//!
//! Every dependency a controller looks at (a template it consumes, a PVC it created)
//! is summarized as a [`ComponentHealth`]. Health records are what conditions and the
//! overall status are projected from.

use crate::crd::{worst_of, AIMStatus};
use crate::reconcilers::status::ConditionStatus;

/// Direction of a dependency relative to the resource being reconciled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DependencyType {
    /// Something this resource consumes (e.g. the template a cache warms).
    #[default]
    Upstream,
    /// Something this resource creates (e.g. the PVC of a model cache).
    Downstream,
}

/// Health of one dependency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentHealth {
    /// Short component name, e.g. `template` or `pvc`.
    pub component: String,
    pub state: AIMStatus,
    pub reason: String,
    pub message: String,
    pub dependency_type: DependencyType,
}

impl ComponentHealth {
    #[must_use]
    pub fn new(
        component: impl Into<String>,
        state: AIMStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            state,
            reason: reason.into(),
            message: message.into(),
            dependency_type: DependencyType::Upstream,
        }
    }

    #[must_use]
    pub fn ready(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(component, AIMStatus::Ready, reason, "")
    }

    #[must_use]
    pub fn with_dependency_type(mut self, dependency_type: DependencyType) -> Self {
        self.dependency_type = dependency_type;
        self
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == AIMStatus::Ready
    }

    /// Condition status this health projects to.
    ///
    /// Only `Ready` is `True`. A dependency that has not reported is `Unknown`.
    #[must_use]
    pub fn condition_status(&self) -> ConditionStatus {
        match self.state {
            AIMStatus::Ready => ConditionStatus::True,
            AIMStatus::Unset => ConditionStatus::Unknown,
            AIMStatus::Failed | AIMStatus::Pending | AIMStatus::Progressing => {
                ConditionStatus::False
            }
        }
    }
}

/// Overall status of a set of dependencies.
///
/// The worst dependency wins. Zero dependencies is `Pending`, never `Ready`. A
/// dependency that has not reported is treated as pending unless something has
/// actually failed.
#[must_use]
pub fn aggregate_status(healths: &[ComponentHealth]) -> AIMStatus {
    match worst_of(healths.iter().map(|h| h.state)) {
        None => AIMStatus::Pending,
        Some(AIMStatus::Unset) if healths.iter().any(|h| h.state == AIMStatus::Failed) => {
            AIMStatus::Failed
        }
        Some(AIMStatus::Unset) => AIMStatus::Pending,
        Some(status) => status,
    }
}

/// First dependency that is not ready, in input order.
#[must_use]
pub fn first_unhealthy(healths: &[ComponentHealth]) -> Option<&ComponentHealth> {
    healths.iter().find(|h| !h.is_ready())
}
