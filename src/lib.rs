//! A client-side reactive object graph: a normalized in-memory store of
//! `(collection, id)`-keyed models, derived view models with lazily
//! resolved relations, and an update-slot coordinator that batches change
//! notification into consistent commits.
//!
//! ```no_run
//! use std::sync::Arc;
//! use modelgraph::{CollectionDescriptor, MemoryStorage, ModelGraph, Relation};
//!
//! # async fn demo() -> modelgraph::Result<()> {
//! let graph = ModelGraph::new(Arc::new(MemoryStorage::new()));
//! graph.register(
//!     CollectionDescriptor::new("agenda/item")
//!         .relation(Relation::many_to_one("category", "category_id", "agenda/category")),
//! );
//! graph.register(CollectionDescriptor::new("agenda/category"));
//! graph.initialize().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod core;
pub mod registry;
pub mod relations;
pub mod repository;
pub mod storage;
pub mod store;
pub mod view;

use std::sync::Arc;

pub use crate::cache::RelationCache;
pub use crate::core::{element_id, parse_element_id, ChangeId, HasCollection, Id, Model, Result, StoreError};
pub use crate::registry::{CollectionDescriptor, CollectionRegistry};
pub use crate::relations::{Cardinality, NestedDescriptor, Relation, RelationManager};
pub use crate::repository::{ActionSender, Repository, SortFn, AUDIT_TIME};
pub use crate::storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use crate::store::{DataStore, UpdateManager, UpdateSlot};
pub use crate::view::{Resolved, ViewModel, ViewModelStore};

/// The assembled object graph. Owns the registry and shares the data
/// store, update manager and relation machinery between all repositories.
pub struct ModelGraph {
    registry: Arc<CollectionRegistry>,
    relation_cache: Arc<RelationCache>,
    update_manager: Arc<UpdateManager>,
    data_store: Arc<DataStore>,
    view_models: Arc<ViewModelStore>,
    relation_manager: Arc<RelationManager>,
}

impl ModelGraph {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        let registry = Arc::new(CollectionRegistry::new());
        let relation_cache = Arc::new(RelationCache::new());
        let update_manager = Arc::new(UpdateManager::new(
            Arc::downgrade(&registry),
            relation_cache.clone(),
        ));
        let data_store = Arc::new(DataStore::new(
            storage,
            update_manager.clone(),
            Arc::downgrade(&registry),
        ));
        let view_models = Arc::new(ViewModelStore::new(Arc::downgrade(&registry)));
        let relation_manager = Arc::new(RelationManager::new(
            view_models.clone(),
            relation_cache.clone(),
        ));
        Self {
            registry,
            relation_cache,
            update_manager,
            data_store,
            view_models,
            relation_manager,
        }
    }

    /// A graph persisted to process memory only. Mostly for tests and
    /// short-lived sessions.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Registers a collection with a default repository.
    pub fn register(&self, descriptor: CollectionDescriptor) -> Arc<Repository> {
        let descriptor = Arc::new(descriptor);
        let repository = Arc::new(Repository::new(
            descriptor.clone(),
            self.data_store.clone(),
            self.relation_manager.clone(),
        ));
        self.registry.register(descriptor, repository.clone());
        repository
    }

    /// Builds an unregistered repository so callers can attach an action
    /// sender or owner index before registering it.
    pub fn build_repository(&self, descriptor: CollectionDescriptor) -> Repository {
        Repository::new(
            Arc::new(descriptor),
            self.data_store.clone(),
            self.relation_manager.clone(),
        )
    }

    pub fn register_repository(&self, repository: Arc<Repository>) -> Arc<Repository> {
        self.registry.register(repository.descriptor(), repository.clone());
        repository
    }

    /// Finishes setup: lets every repository adopt its registered state,
    /// then loads the persisted snapshot into the store.
    pub async fn initialize(&self) -> Result<()> {
        for repository in self.registry.all_repositories() {
            repository.on_after_initial_load(&self.registry);
        }
        self.data_store.init_from_persisted().await
    }

    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    pub fn data_store(&self) -> &Arc<DataStore> {
        &self.data_store
    }

    pub fn view_models(&self) -> &Arc<ViewModelStore> {
        &self.view_models
    }

    pub fn update_manager(&self) -> &Arc<UpdateManager> {
        &self.update_manager
    }

    pub fn relation_cache(&self) -> &Arc<RelationCache> {
        &self.relation_cache
    }

    pub fn repository(&self, collection: &str) -> Option<Arc<Repository>> {
        self.registry.repository(collection)
    }

    pub async fn get_new_slot(&self) -> UpdateSlot {
        self.update_manager.get_new_slot().await
    }

    /// Commits the open slot, replaying its recorded changes into every
    /// repository.
    pub fn commit(&self, slot: UpdateSlot, change_id: ChangeId, reset_cache: bool) -> Result<()> {
        self.update_manager
            .commit(&self.data_store, slot, change_id, reset_cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget(id: u32, name: &str, owner_id: Option<u32>) -> Model {
        let mut payload = json!({ "id": id, "name": name });
        if let Some(owner_id) = owner_id {
            payload["owner_id"] = json!(owner_id);
        }
        Model::new("demo/widget", payload).unwrap()
    }

    #[tokio::test]
    async fn test_register_add_commit_and_resolve() {
        let graph = ModelGraph::in_memory();
        graph.register(
            CollectionDescriptor::new("demo/widget")
                .relation(Relation::many_to_one("owner", "owner_id", "demo/owner")),
        );
        graph.register(CollectionDescriptor::new("demo/owner"));
        graph.initialize().await.unwrap();

        let slot = graph.get_new_slot().await;
        graph
            .data_store()
            .add(
                vec![
                    widget(1, "first", Some(7)),
                    Model::new("demo/owner", json!({ "id": 7, "name": "owner" })).unwrap(),
                ],
                None,
            )
            .await
            .unwrap();
        graph.commit(slot, 1, false).unwrap();

        let widget = graph.view_models().get("demo/widget", 1).unwrap();
        assert_eq!(widget.title(), "first");
        let owner = widget.related("owner").unwrap().unwrap();
        assert_eq!(owner.element_id(), "demo/owner:7");
    }

    #[tokio::test]
    async fn test_commit_with_wrong_slot_fails() {
        let graph = ModelGraph::in_memory();
        graph.register(CollectionDescriptor::new("demo/widget"));
        graph.initialize().await.unwrap();

        let slot = graph.get_new_slot().await;
        graph.commit(slot, 1, false).unwrap();
        assert!(matches!(
            graph.commit(slot, 2, false),
            Err(StoreError::SlotMismatch)
        ));
    }

    #[tokio::test]
    async fn test_unregistered_collection_resolves_empty() {
        let graph = ModelGraph::in_memory();
        graph.initialize().await.unwrap();
        assert!(graph.view_models().get("demo/widget", 1).is_none());
        assert!(graph.view_models().get_all("demo/widget").is_empty());
    }
}
