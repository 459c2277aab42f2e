//! Planner-chosen locations for queries the planner has seen.

use std::collections::BTreeMap;

use strata_core::engine::Engine;

use crate::query_rep::{clean_sql, QueryRep};

/// Exact-match lookup on cleaned SQL text. An indefinite policy: a miss
/// means "ask the definite policy".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedLocations {
    map: BTreeMap<String, Engine>,
}

impl CachedLocations {
    pub fn new(map: BTreeMap<String, Engine>) -> Self {
        let map = map
            .into_iter()
            .map(|(sql, e)| (clean_sql(&sql).to_string(), e))
            .collect();
        Self { map }
    }

    pub fn get(&self, query: &QueryRep) -> Option<Engine> {
        self.map.get(query.sql()).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Routed-query count per engine, for operator-facing summaries.
    pub fn summary(&self) -> String {
        let count = |e: Engine| self.map.values().filter(|v| **v == e).count();
        format!(
            "CachedLocations(Aurora={}, Redshift={}, Athena={})",
            count(Engine::Aurora),
            count(Engine::Redshift),
            count(Engine::Athena)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_uses_cleaned_text() {
        let mut m = BTreeMap::new();
        m.insert("SELECT * FROM t;".to_string(), Engine::Redshift);
        let cached = CachedLocations::new(m);
        assert_eq!(cached.get(&QueryRep::new("  SELECT * FROM t ")), Some(Engine::Redshift));
        assert_eq!(cached.get(&QueryRep::new("SELECT * FROM u")), None);
        assert_eq!(
            cached.summary(),
            "CachedLocations(Aurora=0, Redshift=1, Athena=0)"
        );
    }
}
