//! Global view-model access across all registered collections. Lookups
//! delegate to the owning repository's table; unregistered collections
//! yield empty results.

use std::sync::Weak;

use crate::core::{HasCollection, Id};
use crate::registry::CollectionRegistry;
use crate::repository::Repository;

use super::ViewModel;

pub struct ViewModelStore {
    registry: Weak<CollectionRegistry>,
}

impl ViewModelStore {
    pub fn new(registry: Weak<CollectionRegistry>) -> Self {
        Self { registry }
    }

    fn repository<C: HasCollection + ?Sized>(
        &self,
        collection: &C,
    ) -> Option<std::sync::Arc<Repository>> {
        self.registry
            .upgrade()?
            .repository(collection.collection_string())
    }

    pub fn get<C: HasCollection + ?Sized>(&self, collection: &C, id: Id) -> Option<ViewModel> {
        self.repository(collection)?.get_view_model(id)
    }

    /// Missing ids are dropped silently.
    pub fn get_many<C: HasCollection + ?Sized>(&self, collection: &C, ids: &[Id]) -> Vec<ViewModel> {
        match self.repository(collection) {
            Some(repo) => ids.iter().filter_map(|id| repo.get_view_model(*id)).collect(),
            None => Vec::new(),
        }
    }

    pub fn get_all<C: HasCollection + ?Sized>(&self, collection: &C) -> Vec<ViewModel> {
        match self.repository(collection) {
            Some(repo) => repo.get_view_model_list(),
            None => Vec::new(),
        }
    }

    pub fn filter<C: HasCollection + ?Sized>(
        &self,
        collection: &C,
        predicate: impl Fn(&ViewModel) -> bool,
    ) -> Vec<ViewModel> {
        let mut models = self.get_all(collection);
        models.retain(|vm| predicate(vm));
        models
    }

    pub fn find<C: HasCollection + ?Sized>(
        &self,
        collection: &C,
        predicate: impl Fn(&ViewModel) -> bool,
    ) -> Option<ViewModel> {
        self.get_all(collection).into_iter().find(|vm| predicate(vm))
    }
}
