// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deterministic names for derived Kubernetes objects.
//!
//! Every object the engine creates has a name computed from its owner, so a second
//! reconcile of the same input always targets the same object and server-side apply
//! converges instead of creating duplicates.

use crate::constants::{
    DERIVED_NAME_HASH_LENGTH, KUBERNETES_LABEL_VALUE_MAX_LENGTH, KUBERNETES_NAME_MAX_LENGTH,
};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Errors produced when a name cannot be derived.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("name parts cannot be empty")]
    EmptyParts,
}

/// Convert a string into an RFC 1123 label.
///
/// Lowercases, replaces every character outside `[a-z0-9-]` with `-`, trims leading
/// and trailing dashes and truncates to 63 characters.
///
/// # Example
///
/// ```rust
/// use aim_engine::naming::make_rfc1123_compliant;
///
/// assert_eq!(make_rfc1123_compliant("amd/Llama-3.1-8B"), "amd-llama-3-1-8b");
/// ```
#[must_use]
pub fn make_rfc1123_compliant(value: &str) -> String {
    let replaced: String = value
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = replaced.trim_matches('-');
    let truncated: String = trimmed.chars().take(KUBERNETES_NAME_MAX_LENGTH).collect();
    truncated.trim_end_matches('-').to_string()
}

/// Hex-encoded SHA-256 of the given inputs joined by `|`.
#[must_use]
pub fn hash_inputs(inputs: &[&str]) -> String {
    let digest = Sha256::digest(inputs.join("|").as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Build `{part1}-{part2}-...-{hash}` fitting within a Kubernetes name.
///
/// Parts are sanitized with [`make_rfc1123_compliant`]. When the result is too long
/// the longest part is shortened one character at a time. The hash suffix is only
/// added when `hash_sources` is non-empty.
///
/// # Errors
///
/// Returns [`NamingError::EmptyParts`] when `parts` is empty.
pub fn generate_derived_name(parts: &[&str], hash_sources: &[&str]) -> Result<String, NamingError> {
    if parts.is_empty() {
        return Err(NamingError::EmptyParts);
    }

    let mut sanitized: Vec<String> = parts
        .iter()
        .map(|part| {
            let s = make_rfc1123_compliant(part);
            if s.is_empty() {
                "part".to_string()
            } else {
                s
            }
        })
        .collect();

    let suffix = if hash_sources.is_empty() {
        None
    } else {
        Some(hash_inputs(hash_sources)[..DERIVED_NAME_HASH_LENGTH].to_string())
    };

    let total_length = |parts: &[String]| {
        let joined: usize = parts.iter().map(String::len).sum::<usize>() + parts.len() - 1;
        joined + suffix.as_ref().map_or(0, |s| s.len() + 1)
    };

    while total_length(&sanitized) > KUBERNETES_NAME_MAX_LENGTH {
        let Some((idx, longest)) = sanitized
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.len().cmp(&b.len()).then(ib.cmp(ia)))
            .map(|(i, s)| (i, s.len()))
        else {
            break;
        };
        if longest <= 1 {
            break;
        }
        let mut shortened = sanitized[idx][..longest - 1].to_string();
        while shortened.ends_with('-') {
            shortened.pop();
        }
        sanitized[idx] = shortened;
    }

    let mut name = sanitized.join("-");
    if let Some(suffix) = suffix {
        name.push('-');
        name.push_str(&suffix);
    }
    Ok(name)
}

/// Convert a string into a valid label value.
///
/// Invalid characters become `_`, leading and trailing `_.-` are trimmed and the result
/// is cut to 63 characters. Returns `"unknown"` when nothing valid remains.
#[must_use]
pub fn sanitize_label_value(value: &str) -> String {
    let lowered = value.to_lowercase();
    let mut sanitized = String::with_capacity(lowered.len());
    let mut last_replaced = false;
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
            sanitized.push(c);
            last_replaced = false;
        } else if !last_replaced {
            sanitized.push('_');
            last_replaced = true;
        }
    }

    let trimmed = sanitized.trim_matches(|c| matches!(c, '_' | '.' | '-'));
    let truncated: String = trimmed
        .chars()
        .take(KUBERNETES_LABEL_VALUE_MAX_LENGTH)
        .collect();
    let result = truncated.trim_end_matches(|c| matches!(c, '_' | '.' | '-'));

    if result.is_empty() {
        "unknown".to_string()
    } else {
        result.to_string()
    }
}
