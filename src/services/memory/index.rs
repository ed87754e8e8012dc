//! Scope Index
//!
//! Four parallel maps, one per scope level, from scope key to node ids.
//! Entries exist exactly for nodes that have a value at that level; empty
//! id sets are pruned.

use std::collections::{HashMap, HashSet};

use agent_memory_core::{Scope, ScopeLevel};

#[derive(Debug, Default)]
pub struct ScopeIndex {
    session: HashMap<String, HashSet<String>>,
    project: HashMap<String, HashSet<String>>,
    role: HashMap<String, HashSet<String>>,
    org: HashMap<String, HashSet<String>>,
}

impl ScopeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn level_map(&self, level: ScopeLevel) -> &HashMap<String, HashSet<String>> {
        match level {
            ScopeLevel::Session => &self.session,
            ScopeLevel::Project => &self.project,
            ScopeLevel::Role => &self.role,
            ScopeLevel::Org => &self.org,
        }
    }

    fn level_map_mut(&mut self, level: ScopeLevel) -> &mut HashMap<String, HashSet<String>> {
        match level {
            ScopeLevel::Session => &mut self.session,
            ScopeLevel::Project => &mut self.project,
            ScopeLevel::Role => &mut self.role,
            ScopeLevel::Org => &mut self.org,
        }
    }

    pub fn insert(&mut self, id: &str, scope: &Scope) {
        for level in scope.populated_levels() {
            if let Some(key) = scope.get(level) {
                self.level_map_mut(level)
                    .entry(key.to_string())
                    .or_default()
                    .insert(id.to_string());
            }
        }
    }

    pub fn remove(&mut self, id: &str, scope: &Scope) {
        for level in scope.populated_levels() {
            let Some(key) = scope.get(level) else {
                continue;
            };
            let map = self.level_map_mut(level);
            if let Some(ids) = map.get_mut(key) {
                ids.remove(id);
                if ids.is_empty() {
                    map.remove(key);
                }
            }
        }
    }

    /// Ids indexed under `key` at `level`.
    pub fn ids(&self, level: ScopeLevel, key: &str) -> Vec<String> {
        self.level_map(level)
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct keys at `level`.
    pub fn key_count(&self, level: ScopeLevel) -> usize {
        self.level_map(level).len()
    }

    pub fn is_empty(&self) -> bool {
        ScopeLevel::ALL.iter().all(|l| self.level_map(*l).is_empty())
    }

    pub fn clear(&mut self) {
        for level in ScopeLevel::ALL {
            self.level_map_mut(level).clear();
        }
    }
}
