//! Change-tracking cache: remembers, per entity, the change id of the last
//! update batch that touched it. Derived relation results are only valid as
//! long as every referenced entity still carries the change id recorded at
//! resolution time.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::{element_id, ChangeId, Id};

#[derive(Default)]
pub struct RelationCache {
    entries: RwLock<HashMap<String, ChangeId>>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all entries. Called on a full store reload, invalidating every
    /// derived relation cache at once.
    pub fn reset(&self) {
        self.entries
            .write()
            .expect("relation cache lock poisoned")
            .clear();
    }

    pub fn register_changed_models(&self, collection: &str, ids: &[Id], change_id: ChangeId) {
        let mut entries = self.entries.write().expect("relation cache lock poisoned");
        for &id in ids {
            entries.insert(element_id(collection, id), change_id);
        }
    }

    /// A deleted entity can no longer validate any cache that referenced it;
    /// removing its entry forces recomputation, which then finds nothing.
    pub fn register_deleted_models(&self, collection: &str, ids: &[Id]) {
        let mut entries = self.entries.write().expect("relation cache lock poisoned");
        for &id in ids {
            entries.remove(&element_id(collection, id));
        }
    }

    pub fn query(&self, element_id: &str) -> Option<ChangeId> {
        self.entries
            .read()
            .expect("relation cache lock poisoned")
            .get(element_id)
            .copied()
    }

    /// True iff the recorded map is non-empty and every entry still matches
    /// the current change id exactly. An empty input is always invalid, so a
    /// result with no recorded targets is resolved at least once more.
    pub fn is_valid(&self, recorded: &HashMap<String, ChangeId>) -> bool {
        if recorded.is_empty() {
            return false;
        }
        let entries = self.entries.read().expect("relation cache lock poisoned");
        recorded
            .iter()
            .all(|(element_id, change_id)| entries.get(element_id) == Some(change_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_query() {
        let cache = RelationCache::new();
        cache.register_changed_models("demo/widget", &[1, 2], 5);
        assert_eq!(cache.query("demo/widget:1"), Some(5));
        assert_eq!(cache.query("demo/widget:2"), Some(5));
        assert_eq!(cache.query("demo/widget:3"), None);
    }

    #[test]
    fn test_deleted_models_are_forgotten() {
        let cache = RelationCache::new();
        cache.register_changed_models("demo/widget", &[1], 5);
        cache.register_deleted_models("demo/widget", &[1]);
        assert_eq!(cache.query("demo/widget:1"), None);
    }

    #[test]
    fn test_is_valid_requires_exact_match() {
        let cache = RelationCache::new();
        cache.register_changed_models("demo/widget", &[1], 5);

        let mut recorded = HashMap::new();
        recorded.insert("demo/widget:1".to_string(), 5);
        assert!(cache.is_valid(&recorded));

        cache.register_changed_models("demo/widget", &[1], 6);
        assert!(!cache.is_valid(&recorded));
    }

    #[test]
    fn test_empty_recorded_map_is_invalid() {
        let cache = RelationCache::new();
        assert!(!cache.is_valid(&HashMap::new()));
    }

    #[test]
    fn test_reset_clears_everything() {
        let cache = RelationCache::new();
        cache.register_changed_models("demo/widget", &[1], 5);
        cache.reset();
        assert_eq!(cache.query("demo/widget:1"), None);
    }
}
