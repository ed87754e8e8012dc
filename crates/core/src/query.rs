//! Read-Path Helpers
//!
//! Deterministic text scoring, metadata filters, read ACL checks and the
//! compaction fingerprint. Shared by every backend so that both produce the
//! same results for the same data.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::metadata::{MemoryDomain, MemoryNode, Metadata};

/// Score `content` against `query`.
///
/// Blank query: 1 for everything. Otherwise 0 unless the lower-cased content
/// contains the whole lower-cased query, surrounding whitespace included; then
/// 1 + number of query words that individually occur in the content.
pub fn score_by_text(query: &str, content: &str) -> usize {
    if query.trim().is_empty() {
        return 1;
    }
    let content = content.to_lowercase();
    let query = query.to_lowercase();
    if !content.contains(&query) {
        return 0;
    }
    1 + query
        .split_whitespace()
        .filter(|word| content.contains(word))
        .count()
}

/// Case-insensitive AND over `keywords`. Blank keywords are ignored.
pub fn matches_keywords(keywords: &[String], content: &str) -> bool {
    let content = content.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .all(|k| content.contains(&k))
}

/// Caller-supplied metadata filters. All populated fields must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFilters {
    pub domain: Option<MemoryDomain>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub source_id: Option<String>,
    /// Every listed tag must be present
    #[serde(default)]
    pub tags: Vec<String>,
    pub min_confidence: Option<f64>,
}

impl MemoryFilters {
    pub fn matches(&self, metadata: &Metadata) -> bool {
        if let Some(domain) = self.domain {
            if metadata.domain != domain {
                return false;
            }
        }
        if let Some(ref agent_id) = self.agent_id {
            if metadata.agent_id.as_ref() != Some(agent_id) {
                return false;
            }
        }
        if let Some(ref user_id) = self.user_id {
            if metadata.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if let Some(ref source_id) = self.source_id {
            if &metadata.source_id != source_id {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if metadata.confidence_score < min {
                return false;
            }
        }
        self.tags.iter().all(|tag| metadata.tags.contains(tag))
    }
}

/// Identity of the reader, checked against a node's read allow-lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
}

impl Requester {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            user_id: None,
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            user_id: Some(user_id.into()),
        }
    }
}

/// Read ACL check. Nodes without read allow-lists are readable by anyone.
pub fn can_read(metadata: &Metadata, requester: Option<&Requester>) -> bool {
    let Some(ref read) = metadata.access.read else {
        return true;
    };
    let Some(requester) = requester else {
        return false;
    };
    let agent_ok = requester
        .agent_id
        .as_ref()
        .is_some_and(|id| read.agent_ids.contains(id));
    let user_ok = requester
        .user_id
        .as_ref()
        .is_some_and(|id| read.user_ids.contains(id));
    agent_ok || user_ok
}

/// A node with its text score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchResult {
    pub node: MemoryNode,
    pub score: usize,
}

/// Order by score desc, then `updated_at` desc.
pub fn compare_ranked(a: &MemorySearchResult, b: &MemorySearchResult) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.node.updated_at.cmp(&a.node.updated_at))
}

/// Dedup key used by compaction: attribution + domain + scope + tags + content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub source_id: String,
    pub domain: MemoryDomain,
    pub session: Option<String>,
    pub project: Option<String>,
    pub role: Option<String>,
    pub org: Option<String>,
    /// Sorted
    pub tags: Vec<String>,
    /// Lower-cased
    pub content: String,
}

impl Fingerprint {
    pub fn of(node: &MemoryNode) -> Self {
        let meta = &node.metadata;
        let mut tags: Vec<String> = meta.tags.iter().cloned().collect();
        tags.sort();
        Self {
            agent_id: meta.agent_id.clone(),
            user_id: meta.user_id.clone(),
            source_id: meta.source_id.clone(),
            domain: meta.domain,
            session: meta.scope.session.clone(),
            project: meta.scope.project.clone(),
            role: meta.scope.role.clone(),
            org: meta.scope.org.clone(),
            tags,
            content: node.content.to_lowercase(),
        }
    }

    /// Unambiguous string form, suitable for hashing into a column value.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataInput, NODE_SCHEMA_VERSION};
    use crate::normalize::{normalize_metadata, NormalizeDefaults};

    fn node(content: &str, input: MetadataInput, updated_at: i64) -> MemoryNode {
        MemoryNode {
            id: format!("id-{}", updated_at),
            content: content.into(),
            embedding: Vec::new(),
            metadata: normalize_metadata(input, 0, &NormalizeDefaults::default()),
            created_at: updated_at,
            updated_at,
            version: NODE_SCHEMA_VERSION,
        }
    }

    #[test]
    fn test_score_empty_query() {
        assert_eq!(score_by_text("", "anything"), 1);
        assert_eq!(score_by_text("   ", ""), 1);
    }

    #[test]
    fn test_score_substring_plus_words() {
        assert_eq!(score_by_text("alpha", "alpha beta"), 2);
        assert_eq!(score_by_text("ALPHA beta", "Alpha Beta gamma"), 3);
        assert_eq!(score_by_text("gamma", "alpha beta"), 0);
        // Words present individually but not as one substring
        assert_eq!(score_by_text("beta alpha", "alpha beta"), 0);
    }

    #[test]
    fn test_score_keeps_surrounding_whitespace() {
        assert_eq!(score_by_text("alpha ", "alpha"), 0);
        assert_eq!(score_by_text(" alpha", "alpha"), 0);
        assert_eq!(score_by_text("alpha ", "alpha beta"), 2);
    }

    #[test]
    fn test_matches_keywords_and_semantics() {
        let kws = vec!["Rust".to_string(), "tokio".to_string()];
        assert!(matches_keywords(&kws, "async rust with Tokio"));
        assert!(!matches_keywords(&kws, "async rust"));
        assert!(matches_keywords(&[], "anything"));
        assert!(matches_keywords(&[" ".to_string()], "anything"));
    }

    #[test]
    fn test_filters() {
        let meta = normalize_metadata(
            MetadataInput::new(MemoryDomain::UserPref)
                .with_agent("a1")
                .with_user("u1")
                .with_tags(["ui", "theme"])
                .with_confidence(0.6),
            0,
            &NormalizeDefaults::default(),
        );
        assert!(MemoryFilters::default().matches(&meta));
        assert!(MemoryFilters {
            domain: Some(MemoryDomain::UserPref),
            tags: vec!["ui".into()],
            min_confidence: Some(0.5),
            ..Default::default()
        }
        .matches(&meta));
        assert!(!MemoryFilters {
            tags: vec!["ui".into(), "audio".into()],
            ..Default::default()
        }
        .matches(&meta));
        assert!(!MemoryFilters {
            user_id: Some("u2".into()),
            ..Default::default()
        }
        .matches(&meta));
        assert!(!MemoryFilters {
            min_confidence: Some(0.7),
            ..Default::default()
        }
        .matches(&meta));
    }

    #[test]
    fn test_can_read() {
        let open = normalize_metadata(MetadataInput::default(), 0, &NormalizeDefaults::default());
        assert!(can_read(&open, None));

        let restricted = normalize_metadata(
            MetadataInput::default().with_readers(vec!["a1".into()], vec!["u1".into()]),
            0,
            &NormalizeDefaults::default(),
        );
        assert!(!can_read(&restricted, None));
        assert!(can_read(&restricted, Some(&Requester::agent("a1"))));
        assert!(can_read(&restricted, Some(&Requester::user("u1"))));
        assert!(!can_read(&restricted, Some(&Requester::agent("a2"))));
    }

    #[test]
    fn test_ranking_order() {
        let mut results = vec![
            MemorySearchResult {
                node: node("a", MetadataInput::default(), 1),
                score: 2,
            },
            MemorySearchResult {
                node: node("b", MetadataInput::default(), 5),
                score: 1,
            },
            MemorySearchResult {
                node: node("c", MetadataInput::default(), 3),
                score: 2,
            },
        ];
        results.sort_by(compare_ranked);
        let order: Vec<&str> = results.iter().map(|r| r.node.content.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_fingerprint_ignores_case_and_tag_order() {
        let a = node("Hello World", MetadataInput::default().with_tags(["x", "y"]), 1);
        let b = node("hello world", MetadataInput::default().with_tags(["y", "x"]), 2);
        let c = node("hello world", MetadataInput::default().with_agent("a9"), 3);
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
        assert_eq!(Fingerprint::of(&a).canonical(), Fingerprint::of(&b).canonical());
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&c));
    }
}
