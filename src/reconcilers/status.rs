// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for AIM resources.
//!
//! This module provides utility functions for creating and managing Kubernetes
//! status conditions following the standard conventions, plus the
//! [`ConditionManager`] every controller uses to build its conditions for one
//! reconcile pass.
//!
//! # Condition Format
//!
//! Kubernetes conditions follow a standard format:
//! - `type`: The aspect of the resource being reported (e.g., "Ready", "CacheReady")
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp when the status last changed
//!
//! # Example
//!
//! ```rust,no_run
//! use aim_engine::reconcilers::status::{ConditionManager, ConditionStatus};
//!
//! let mut cm = ConditionManager::new(&[], &["CacheReady"]);
//! cm.mark_false("CacheReady", "Warming", "1 of 2 model caches bound");
//! cm.derive_ready();
//!
//! let ready = cm.get("Ready").unwrap();
//! assert_eq!(ready.status, ConditionStatus::False.as_str());
//! assert_eq!(ready.reason.as_deref(), Some("Warming"));
//! ```

use crate::crd::{Condition, StatusWithConditions};
use crate::reconcilers::health::ComponentHealth;
use crate::status_reasons::{
    CONDITION_TYPE_READY, REASON_ALL_READY, REASON_NO_DEPENDENCIES, REASON_NOT_EVALUATED,
};
use chrono::Utc;
use std::fmt;

/// Status of a single condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }

    #[must_use]
    pub const fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Create a new Kubernetes condition with the current timestamp.
///
/// # Example
///
/// ```rust,no_run
/// # use aim_engine::reconcilers::status::create_condition;
/// let condition = create_condition(
///     "StorageReady",
///     "True",
///     "PVCBound",
///     "PVC llama-cache is bound"
/// );
/// assert_eq!(condition.r#type, "StorageReady");
/// assert_eq!(condition.status, "True");
/// ```
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Find a condition by type in a list of conditions.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Update or add a condition in a mutable conditions list (in-memory, no API call).
///
/// The `lastTransitionTime` is preserved when the status value is unchanged and reset
/// to now when it flips. Reason and message are always overwritten.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        let last_transition_time = if existing.status == status {
            existing
                .last_transition_time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        } else {
            Utc::now().to_rfc3339()
        };

        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        existing.last_transition_time = Some(last_transition_time);
    } else {
        conditions.push(create_condition(condition_type, status, reason, message));
    }
}

/// Compare two condition lists, ignoring `lastTransitionTime` and ordering.
///
/// # Returns
///
/// * `true` - The conditions are semantically equal (no update needed)
/// * `false` - The conditions differ (update needed)
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    if current.len() != new.len() {
        return false;
    }

    for new_cond in new {
        match find_condition(current, &new_cond.r#type) {
            None => return false,
            Some(curr_cond) => {
                if curr_cond.status != new_cond.status
                    || curr_cond.reason != new_cond.reason
                    || curr_cond.message != new_cond.message
                {
                    return false;
                }
            }
        }
    }

    true
}

/// Whether `new` differs from `current` in anything other than condition timestamps.
///
/// A missing current status always needs an update.
#[must_use]
pub fn status_needs_update<S: StatusWithConditions>(current: Option<&S>, new: &S) -> bool {
    let Some(current) = current else {
        return true;
    };

    if !conditions_equal(current.conditions(), new.conditions()) {
        return true;
    }

    let strip = |status: &S| {
        let mut copy = status.clone();
        copy.set_conditions(Vec::new());
        serde_json::to_value(copy).ok()
    };
    strip(current) != strip(new)
}

/// One condition whose status value changed between two condition lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionTransition {
    pub condition_type: String,
    /// Previous status, `None` when the condition is new.
    pub from: Option<String>,
    pub to: String,
    pub reason: Option<String>,
}

/// Conditions whose status value changed from `old` to `new`, in `new` order.
///
/// Reason or message changes alone are not transitions.
#[must_use]
pub fn diff_condition_transitions(old: &[Condition], new: &[Condition]) -> Vec<ConditionTransition> {
    new.iter()
        .filter_map(|cond| {
            let previous = find_condition(old, &cond.r#type).map(|c| c.status.clone());
            if previous.as_deref() == Some(cond.status.as_str()) {
                return None;
            }
            Some(ConditionTransition {
                condition_type: cond.r#type.clone(),
                from: previous,
                to: cond.status.clone(),
                reason: cond.reason.clone(),
            })
        })
        .collect()
}

/// Working set of conditions for one reconcile pass.
///
/// Starts from the persisted conditions so transition times survive, records every
/// change in memory and derives the aggregate `Ready` condition from the required
/// condition types in the order they were registered.
#[derive(Clone, Debug, Default)]
pub struct ConditionManager {
    conditions: Vec<Condition>,
    required: Vec<String>,
}

impl ConditionManager {
    /// Start from `existing` conditions with `required` types feeding `Ready`.
    #[must_use]
    pub fn new(existing: &[Condition], required: &[&str]) -> Self {
        let mut cm = Self {
            conditions: existing.to_vec(),
            required: Vec::with_capacity(required.len()),
        };
        for condition_type in required {
            cm.require(condition_type);
        }
        cm
    }

    /// Register a condition type that must be `True` for `Ready` to be `True`.
    ///
    /// Registration order decides which failing condition `Ready` reports.
    pub fn require(&mut self, condition_type: &str) {
        if condition_type != CONDITION_TYPE_READY
            && !self.required.iter().any(|r| r == condition_type)
        {
            self.required.push(condition_type.to_string());
        }
    }

    pub fn set(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        update_condition_in_memory(
            &mut self.conditions,
            condition_type,
            status.as_str(),
            reason,
            message,
        );
    }

    pub fn mark_true(&mut self, condition_type: &str, reason: &str, message: &str) {
        self.set(condition_type, ConditionStatus::True, reason, message);
    }

    pub fn mark_false(&mut self, condition_type: &str, reason: &str, message: &str) {
        self.set(condition_type, ConditionStatus::False, reason, message);
    }

    /// Project a dependency health record onto a condition.
    pub fn set_from_health(&mut self, condition_type: &str, health: &ComponentHealth) {
        self.set(
            condition_type,
            health.condition_status(),
            &health.reason,
            &health.message,
        );
    }

    #[must_use]
    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        find_condition(&self.conditions, condition_type)
    }

    #[must_use]
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.has_status(condition_type, ConditionStatus::True)
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    #[must_use]
    pub fn into_conditions(self) -> Vec<Condition> {
        self.conditions
    }

    /// Set the aggregate `Ready` condition from the required conditions.
    ///
    /// `Ready` is `True` only when every required condition is `True`. Otherwise it
    /// copies the reason and message of the first required condition that is not,
    /// in registration order. A required condition that was never set yields
    /// `Unknown` / `NotEvaluated`. Returns whether `Ready` is `True`.
    pub fn derive_ready(&mut self) -> bool {
        if self.required.is_empty() {
            self.mark_false(
                CONDITION_TYPE_READY,
                REASON_NO_DEPENDENCIES,
                "No conditions to evaluate",
            );
            return false;
        }

        let mut blocking: Option<(ConditionStatus, String, String)> = None;
        for condition_type in &self.required {
            match self.get(condition_type) {
                None => {
                    blocking = Some((
                        ConditionStatus::Unknown,
                        REASON_NOT_EVALUATED.to_string(),
                        format!("{condition_type} has not been evaluated"),
                    ));
                }
                Some(cond) if cond.status != ConditionStatus::True.as_str() => {
                    let status = if cond.status == ConditionStatus::Unknown.as_str() {
                        ConditionStatus::Unknown
                    } else {
                        ConditionStatus::False
                    };
                    blocking = Some((
                        status,
                        cond.reason.clone().unwrap_or_else(|| condition_type.clone()),
                        cond.message.clone().unwrap_or_default(),
                    ));
                }
                Some(_) => continue,
            }
            break;
        }

        match blocking {
            Some((status, reason, message)) => {
                self.set(CONDITION_TYPE_READY, status, &reason, &message);
                false
            }
            None => {
                self.mark_true(CONDITION_TYPE_READY, REASON_ALL_READY, "");
                true
            }
        }
    }

    fn has_status(&self, condition_type: &str, status: ConditionStatus) -> bool {
        self.get(condition_type)
            .is_some_and(|c| c.status == status.as_str())
    }
}
