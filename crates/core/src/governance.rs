//! Governance Rules
//!
//! Ordered allow/deny rules evaluated against write metadata. The first rule
//! whose `match` is satisfied decides; otherwise the policy default applies.
//! Stateless: the outcome depends only on `(metadata, policy)`.

use serde::{Deserialize, Serialize};

use crate::metadata::{MemoryDomain, Metadata};

/// Outcome of a rule or policy default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl Default for RuleAction {
    fn default() -> Self {
        RuleAction::Deny
    }
}

/// Predicate over write metadata. Absent fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<MemoryDomain>,
    /// Matches when the node's tag set contains this tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl RuleMatch {
    pub fn matches(&self, metadata: &Metadata) -> bool {
        fn field_eq(wanted: &Option<String>, actual: Option<&str>) -> bool {
            match wanted {
                Some(w) => actual == Some(w.as_str()),
                None => true,
            }
        }

        field_eq(&self.agent_id, metadata.agent_id.as_deref())
            && field_eq(&self.user_id, metadata.user_id.as_deref())
            && field_eq(&self.source_id, Some(metadata.source_id.as_str()))
            && self.domain.map_or(true, |d| d == metadata.domain)
            && self
                .tag
                .as_ref()
                .map_or(true, |tag| metadata.tags.contains(tag))
    }
}

/// A single ordered rule. A rule without `match` always applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceRule {
    pub action: RuleAction,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<RuleMatch>,
}

impl GovernanceRule {
    pub fn allow(matcher: RuleMatch) -> Self {
        Self {
            action: RuleAction::Allow,
            matcher: Some(matcher),
        }
    }

    pub fn deny(matcher: RuleMatch) -> Self {
        Self {
            action: RuleAction::Deny,
            matcher: Some(matcher),
        }
    }

    pub fn applies_to(&self, metadata: &Metadata) -> bool {
        self.matcher
            .as_ref()
            .map_or(true, |matcher| matcher.matches(metadata))
    }
}

/// Write policy. An absent `default` is `deny`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernancePolicy {
    #[serde(default)]
    pub default: RuleAction,
    #[serde(default)]
    pub rules: Vec<GovernanceRule>,
}

impl GovernancePolicy {
    /// Policy with no rules that admits every write.
    pub fn allow_all() -> Self {
        Self {
            default: RuleAction::Allow,
            rules: Vec::new(),
        }
    }

    /// Evaluate and report which rule decided (`None` = the default).
    pub fn decide(&self, metadata: &Metadata) -> GovernanceDecision {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.applies_to(metadata))
            .map(|(index, rule)| GovernanceDecision {
                action: rule.action,
                rule_index: Some(index),
            })
            .unwrap_or(GovernanceDecision {
                action: self.default,
                rule_index: None,
            })
    }
}

/// Result of evaluating a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernanceDecision {
    pub action: RuleAction,
    pub rule_index: Option<usize>,
}

impl GovernanceDecision {
    pub fn is_allowed(&self) -> bool {
        self.action == RuleAction::Allow
    }
}

/// Whether `policy` admits a write carrying `metadata`.
pub fn allows_write(metadata: &Metadata, policy: &GovernancePolicy) -> bool {
    policy.decide(metadata).is_allowed()
}
