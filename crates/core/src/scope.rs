//! Scope Hierarchy
//!
//! A scope is a partial key over four levels, ordered from most to least
//! specific: session > project > role > org. Visibility checks and
//! delete-by-scope both compare a node's scope against a requested scope
//! "at a level": the level itself plus every coarser level the request names.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// One level of the scope hierarchy.
///
/// Variant order is most specific first, so `Session < Org`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Session,
    Project,
    Role,
    Org,
}

impl ScopeLevel {
    /// All levels, most specific first.
    pub const ALL: [ScopeLevel; 4] = [
        ScopeLevel::Session,
        ScopeLevel::Project,
        ScopeLevel::Role,
        ScopeLevel::Org,
    ];

    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeLevel::Session => "session",
            ScopeLevel::Project => "project",
            ScopeLevel::Role => "role",
            ScopeLevel::Org => "org",
        }
    }

    /// Parse from database string representation
    pub fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "session" => Ok(ScopeLevel::Session),
            "project" => Ok(ScopeLevel::Project),
            "role" => Ok(ScopeLevel::Role),
            "org" => Ok(ScopeLevel::Org),
            _ => Err(CoreError::validation(format!("Invalid scope level: {}", s))),
        }
    }

    /// Levels strictly less specific than this one.
    pub fn coarser(&self) -> &'static [ScopeLevel] {
        match self {
            ScopeLevel::Session => &[ScopeLevel::Project, ScopeLevel::Role, ScopeLevel::Org],
            ScopeLevel::Project => &[ScopeLevel::Role, ScopeLevel::Org],
            ScopeLevel::Role => &[ScopeLevel::Org],
            ScopeLevel::Org => &[],
        }
    }
}

impl std::fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Partial scope key. Empty strings are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
}

impl Scope {
    pub fn session(value: impl Into<String>) -> Self {
        Self::default().with_session(value)
    }

    pub fn project(value: impl Into<String>) -> Self {
        Self::default().with_project(value)
    }

    pub fn role(value: impl Into<String>) -> Self {
        Self::default().with_role(value)
    }

    pub fn org(value: impl Into<String>) -> Self {
        Self::default().with_org(value)
    }

    pub fn with_session(mut self, value: impl Into<String>) -> Self {
        self.session = Some(value.into());
        self
    }

    pub fn with_project(mut self, value: impl Into<String>) -> Self {
        self.project = Some(value.into());
        self
    }

    pub fn with_role(mut self, value: impl Into<String>) -> Self {
        self.role = Some(value.into());
        self
    }

    pub fn with_org(mut self, value: impl Into<String>) -> Self {
        self.org = Some(value.into());
        self
    }

    /// Populated value at `level`, if any.
    pub fn get(&self, level: ScopeLevel) -> Option<&str> {
        let value = match level {
            ScopeLevel::Session => self.session.as_deref(),
            ScopeLevel::Project => self.project.as_deref(),
            ScopeLevel::Role => self.role.as_deref(),
            ScopeLevel::Org => self.org.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Most specific populated level.
    pub fn deepest_level(&self) -> Option<ScopeLevel> {
        ScopeLevel::ALL.into_iter().find(|level| self.get(*level).is_some())
    }

    /// Populated levels, most specific first.
    pub fn populated_levels(&self) -> Vec<ScopeLevel> {
        ScopeLevel::ALL
            .into_iter()
            .filter(|level| self.get(*level).is_some())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deepest_level().is_none()
    }

    /// Copy with blank values trimmed away.
    pub fn normalized(&self) -> Self {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }
        Self {
            session: clean(&self.session),
            project: clean(&self.project),
            role: clean(&self.role),
            org: clean(&self.org),
        }
    }
}

/// Whether `node` matches `requested` at `level`.
///
/// The level value must be equal on both sides, and every coarser level the
/// request names must also be equal on the node. Finer levels in the request
/// are ignored; they are handled by their own iteration.
pub fn scope_matches_at_level(node: &Scope, requested: &Scope, level: ScopeLevel) -> bool {
    let Some(wanted) = requested.get(level) else {
        return false;
    };
    if node.get(level) != Some(wanted) {
        return false;
    }
    level.coarser().iter().all(|coarser| match requested.get(*coarser) {
        Some(value) => node.get(*coarser) == Some(value),
        None => true,
    })
}

/// Whether a node is removed by `delete_by_scope(request, cascade)` targeting
/// `target` (the request's deepest populated level).
///
/// Non-cascading deletes only remove nodes whose own level is exactly `target`.
pub fn qualifies_for_delete(
    node_scope: &Scope,
    node_level: Option<ScopeLevel>,
    request: &Scope,
    target: ScopeLevel,
    cascade: bool,
) -> bool {
    if !scope_matches_at_level(node_scope, request, target) {
        return false;
    }
    match node_level {
        Some(level) if cascade => level <= target,
        Some(level) => level == target,
        None => false,
    }
}
