//! Collection registry: maps a collection string to its descriptor and
//! repository. Every other component resolves types through this map.
//!
//! Registration order across feature modules is not guaranteed, so lookups
//! on unregistered collections return `None`/empty results and never fail.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

mod descriptor;

pub use descriptor::{CollectionDescriptor, GetterFn, TitleFn};

use crate::core::{parse_element_id, HasCollection};
use crate::repository::Repository;

struct CollectionEntry {
    descriptor: Arc<CollectionDescriptor>,
    repository: Arc<Repository>,
}

#[derive(Default)]
pub struct CollectionRegistry {
    entries: RwLock<HashMap<String, CollectionEntry>>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the (descriptor, repository) pair under the descriptor's
    /// collection string. Re-registration is tolerated, last write wins.
    pub fn register(&self, descriptor: Arc<CollectionDescriptor>, repository: Arc<Repository>) {
        self.entries
            .write()
            .expect("registry lock poisoned")
            .insert(
                descriptor.collection().to_string(),
                CollectionEntry {
                    descriptor,
                    repository,
                },
            );
    }

    /// Normalizes any collection identifier (string, descriptor or
    /// repository) to the collection string. Pure, no side effects.
    pub fn resolve_collection_string<C: HasCollection + ?Sized>(identifier: &C) -> &str {
        identifier.collection_string()
    }

    pub fn is_registered(&self, collection: &str) -> bool {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .contains_key(collection)
    }

    pub fn descriptor(&self, collection: &str) -> Option<Arc<CollectionDescriptor>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(collection)
            .map(|entry| entry.descriptor.clone())
    }

    pub fn repository(&self, collection: &str) -> Option<Arc<Repository>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(collection)
            .map(|entry| entry.repository.clone())
    }

    /// All registered repositories, ordered by collection string so commit
    /// passes run in a deterministic order.
    pub fn all_repositories(&self) -> Vec<Arc<Repository>> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let mut collections: Vec<&String> = entries.keys().collect();
        collections.sort();
        collections
            .into_iter()
            .map(|c| entries[c].repository.clone())
            .collect()
    }

    pub fn collection_strings(&self) -> Vec<String> {
        let mut collections: Vec<String> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        collections.sort();
        collections
    }

    /// Validates the external `"<collection>:<positive integer>"` wire
    /// format, including that the collection is registered.
    pub fn is_valid_element_id(&self, value: &str) -> bool {
        match parse_element_id(value) {
            Some((collection, _)) => self.is_registered(collection),
            None => false,
        }
    }
}
