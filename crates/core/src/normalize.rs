//! Metadata Normalization
//!
//! Turns caller-supplied `MetadataInput` into persisted `Metadata`:
//! provenance defaults, confidence clamping, scope level derivation and
//! retention resolution. Pure functions; the caller supplies `now`.

use std::collections::BTreeSet;

use crate::metadata::{Metadata, MetadataInput, Provenance, Retention};

const MS_PER_SEC: i64 = 1_000;
const SECS_PER_DAY: u64 = 86_400;

/// Fallback values applied during normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeDefaults {
    /// TTL applied when a write carries no retention at all; 0 disables expiry
    pub default_ttl_days: u32,
}

impl Default for NormalizeDefaults {
    fn default() -> Self {
        Self {
            default_ttl_days: 30,
        }
    }
}

/// Clamp to [0, 1]. NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn ttl_deadline(now: i64, ttl_sec: u64) -> i64 {
    let ttl_ms = i64::try_from(ttl_sec)
        .unwrap_or(i64::MAX)
        .saturating_mul(MS_PER_SEC);
    now.saturating_add(ttl_ms)
}

/// Resolve retention against `now`.
///
/// An explicit `expires_at` wins; otherwise `ttl_sec` (0 = no expiry);
/// otherwise the configured default TTL.
pub fn resolve_retention(input: Option<&Retention>, now: i64, default_ttl_days: u32) -> Retention {
    let input = input.cloned().unwrap_or_default();
    match (input.ttl_sec, input.expires_at) {
        (ttl_sec, Some(expires_at)) => Retention {
            ttl_sec,
            expires_at: Some(expires_at),
        },
        (Some(0), None) => Retention {
            ttl_sec: Some(0),
            expires_at: None,
        },
        (Some(ttl_sec), None) => Retention {
            ttl_sec: Some(ttl_sec),
            expires_at: Some(ttl_deadline(now, ttl_sec)),
        },
        (None, None) if default_ttl_days == 0 => Retention::default(),
        (None, None) => {
            let ttl_sec = u64::from(default_ttl_days) * SECS_PER_DAY;
            Retention {
                ttl_sec: Some(ttl_sec),
                expires_at: Some(ttl_deadline(now, ttl_sec)),
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build persisted metadata from a write request.
pub fn normalize_metadata(input: MetadataInput, now: i64, defaults: &NormalizeDefaults) -> Metadata {
    let provenance_input = input.provenance.unwrap_or_default();
    let agent_id = non_blank(input.agent_id);
    let user_id = non_blank(input.user_id);
    let provenance_source = non_blank(provenance_input.source);

    let source_id = non_blank(input.source_id)
        .or_else(|| provenance_source.clone())
        .or_else(|| agent_id.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let confidence = clamp_confidence(
        input
            .confidence_score
            .or(provenance_input.confidence)
            .unwrap_or(1.0),
    );

    let scope = input.scope.normalized();
    // A supplied level that disagrees with the scope is discarded
    let scope_level = scope.deepest_level();

    let tags: BTreeSet<String> = input
        .tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    Metadata {
        domain: input.domain.unwrap_or_default(),
        source_id: source_id.clone(),
        agent_id,
        user_id,
        tags,
        scope,
        scope_level,
        access: input.access,
        retention: resolve_retention(input.retention.as_ref(), now, defaults.default_ttl_days),
        confidence_score: confidence,
        provenance: Provenance {
            source: provenance_source.unwrap_or(source_id),
            timestamp: provenance_input.timestamp.unwrap_or(now),
            confidence,
        },
    }
}
