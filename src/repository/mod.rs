//! Repositories: one per registered collection. A repository owns the
//! collection's view-model table, exposes observables over it and forwards
//! write requests to the configured action sender.
//!
//! Repositories never mutate their tables on their own; the update manager
//! drives them through `delete_models` / `changed_models` (pass one) and
//! `commit_update` (pass two).

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::core::{HasCollection, Id, Model, Result, StoreError};
use crate::registry::{CollectionDescriptor, CollectionRegistry};
use crate::relations::RelationManager;
use crate::store::DataStore;
use crate::view::ViewModel;

/// Debounce window for list observables: consecutive emissions within this
/// window collapse into the latest one.
pub const AUDIT_TIME: Duration = Duration::from_millis(1);

pub type SortFn = Arc<dyn Fn(&ViewModel, &ViewModel) -> Ordering + Send + Sync>;

/// Backend write interface. Repositories without one reject all writes.
#[async_trait]
pub trait ActionSender: Send + Sync {
    async fn create(&self, collection: &str, payload: Value) -> Result<Value>;
    async fn update(&self, collection: &str, id: Id, payload: Value) -> Result<()>;
    async fn patch(&self, collection: &str, id: Id, payload: Value) -> Result<()>;
    async fn delete(&self, collection: &str, id: Id) -> Result<()>;
}

pub struct Repository {
    collection: String,
    descriptor: RwLock<Arc<CollectionDescriptor>>,
    data_store: Arc<DataStore>,
    relation_manager: Arc<RelationManager>,
    view_models: RwLock<BTreeMap<Id, ViewModel>>,
    subjects: RwLock<HashMap<Id, watch::Sender<Option<ViewModel>>>>,
    list_subject: watch::Sender<Vec<ViewModel>>,
    general_subject: broadcast::Sender<ViewModel>,
    sort_fn: RwLock<SortFn>,
    action_sender: Option<Arc<dyn ActionSender>>,
    owner_index_key: Option<String>,
    owner_index: RwLock<HashMap<(String, Id), Id>>,
}

impl Repository {
    pub fn new(
        descriptor: Arc<CollectionDescriptor>,
        data_store: Arc<DataStore>,
        relation_manager: Arc<RelationManager>,
    ) -> Self {
        let (list_subject, _) = watch::channel(Vec::new());
        let (general_subject, _) = broadcast::channel(64);
        let sort_fn: SortFn = descriptor
            .default_sort()
            .cloned()
            .unwrap_or_else(|| Arc::new(|a: &ViewModel, b: &ViewModel| a.id().cmp(&b.id())));
        Self {
            collection: descriptor.collection().to_string(),
            descriptor: RwLock::new(descriptor),
            data_store,
            relation_manager,
            view_models: RwLock::new(BTreeMap::new()),
            subjects: RwLock::new(HashMap::new()),
            list_subject,
            general_subject,
            sort_fn: RwLock::new(sort_fn),
            action_sender: None,
            owner_index_key: None,
            owner_index: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_action_sender(mut self, sender: Arc<dyn ActionSender>) -> Self {
        self.action_sender = Some(sender);
        self
    }

    /// Maintains a `(owner collection, owner id) -> id` index over the given
    /// content-object field, for `get_by_content_object` lookups.
    pub fn with_owner_index(mut self, content_object_key: impl Into<String>) -> Self {
        self.owner_index_key = Some(content_object_key.into());
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn descriptor(&self) -> Arc<CollectionDescriptor> {
        self.descriptor.read().expect("descriptor poisoned").clone()
    }

    /// Called once after registration: adopts the registered descriptor and
    /// populates the table from whatever the data store already holds.
    pub fn on_after_initial_load(&self, registry: &Arc<CollectionRegistry>) {
        if let Some(descriptor) = registry.descriptor(&self.collection) {
            *self.descriptor.write().expect("descriptor poisoned") = descriptor;
        }
        let ids: Vec<Id> = self
            .data_store
            .get_all(self)
            .iter()
            .map(|model| model.id())
            .collect();
        if !ids.is_empty() {
            debug!(collection = %self.collection, count = ids.len(), "initial load");
            self.changed_models(&ids);
            self.commit_update(&ids);
        }
    }

    /// Rebuilds the view models for the given ids from the data store.
    /// Publishing is deferred to `commit_update`.
    pub(crate) fn changed_models(&self, ids: &[Id]) {
        let descriptor = self.descriptor();
        for &id in ids {
            match self.data_store.get(self, id) {
                Some(model) => {
                    if let Some(key) = &self.owner_index_key {
                        let mut index = self.owner_index.write().expect("owner index poisoned");
                        // The model may have moved to a new owner; stale
                        // entries must not keep answering for the old one.
                        index.retain(|_, owned| *owned != id);
                        if let Some(owner) = model.content_object_field(key) {
                            index.insert(owner, id);
                        }
                    }
                    let view_model = RelationManager::build_view_model(
                        &self.relation_manager,
                        model,
                        descriptor.clone(),
                    );
                    self.view_models
                        .write()
                        .expect("view models poisoned")
                        .insert(id, view_model);
                }
                None => {
                    self.view_models
                        .write()
                        .expect("view models poisoned")
                        .remove(&id);
                }
            }
        }
    }

    pub(crate) fn delete_models(&self, ids: &[Id]) {
        let mut table = self.view_models.write().expect("view models poisoned");
        for id in ids {
            table.remove(id);
        }
        drop(table);
        self.owner_index
            .write()
            .expect("owner index poisoned")
            .retain(|_, id| !ids.contains(id));
    }

    /// Pass two: publishes the new table state. Per-id subjects of deleted
    /// models receive `None`, the list subject receives the full sorted list.
    pub(crate) fn commit_update(&self, ids: &[Id]) {
        self.emit_list();
        let table = self.view_models.read().expect("view models poisoned");
        let subjects = self.subjects.read().expect("subjects poisoned");
        for id in ids {
            let current = table.get(id).cloned();
            if let Some(subject) = subjects.get(id) {
                subject.send_replace(current.clone());
            }
            if let Some(view_model) = current {
                let _ = self.general_subject.send(view_model);
            }
        }
    }

    pub(crate) fn clear_view_models(&self) {
        self.view_models
            .write()
            .expect("view models poisoned")
            .clear();
        self.owner_index
            .write()
            .expect("owner index poisoned")
            .clear();
        self.list_subject.send_replace(Vec::new());
        for subject in self.subjects.read().expect("subjects poisoned").values() {
            subject.send_replace(None);
        }
    }

    fn emit_list(&self) {
        self.list_subject.send_replace(self.get_sorted_view_model_list());
    }

    pub fn get_view_model(&self, id: Id) -> Option<ViewModel> {
        self.view_models
            .read()
            .expect("view models poisoned")
            .get(&id)
            .cloned()
    }

    /// All view models in ascending id order.
    pub fn get_view_model_list(&self) -> Vec<ViewModel> {
        self.view_models
            .read()
            .expect("view models poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// All view models in the repository's configured sort order.
    pub fn get_sorted_view_model_list(&self) -> Vec<ViewModel> {
        let sort_fn = self.sort_fn.read().expect("sort fn poisoned").clone();
        let mut list = self.get_view_model_list();
        list.sort_by(|a, b| sort_fn(a, b));
        list
    }

    /// Replaces the list sort order and re-emits the list immediately.
    pub fn set_sort_function(
        &self,
        sort_fn: impl Fn(&ViewModel, &ViewModel) -> Ordering + Send + Sync + 'static,
    ) {
        *self.sort_fn.write().expect("sort fn poisoned") = Arc::new(sort_fn);
        self.emit_list();
    }

    /// Per-id observable, seeded with the current value. Emits `None` when
    /// the model is deleted.
    pub fn get_view_model_observable(&self, id: Id) -> watch::Receiver<Option<ViewModel>> {
        let mut subjects = self.subjects.write().expect("subjects poisoned");
        subjects
            .entry(id)
            .or_insert_with(|| watch::channel(self.get_view_model(id)).0)
            .subscribe()
    }

    /// Sorted-list observable. Use `next_list_update` to read it debounced.
    pub fn get_view_model_list_observable(&self) -> watch::Receiver<Vec<ViewModel>> {
        self.list_subject.subscribe()
    }

    /// Fires once per changed view model at commit time.
    pub fn get_general_view_model_observable(&self) -> broadcast::Receiver<ViewModel> {
        self.general_subject.subscribe()
    }

    /// Awaits the next list emission, then sleeps out the audit window so a
    /// burst of emissions yields only the latest list.
    pub async fn next_list_update(
        rx: &mut watch::Receiver<Vec<ViewModel>>,
    ) -> Option<Vec<ViewModel>> {
        rx.changed().await.ok()?;
        tokio::time::sleep(AUDIT_TIME).await;
        Some(rx.borrow_and_update().clone())
    }

    /// Resolves the view model owning the given content object, if this
    /// repository maintains an owner index.
    pub fn get_by_content_object(&self, collection: &str, id: Id) -> Option<ViewModel> {
        let own_id = *self
            .owner_index
            .read()
            .expect("owner index poisoned")
            .get(&(collection.to_string(), id))?;
        self.get_view_model(own_id)
    }

    pub fn get_title(&self, view_model: &ViewModel) -> String {
        self.descriptor().title_for(view_model)
    }

    pub fn get_verbose_name(&self) -> String {
        self.descriptor().verbose_name().to_string()
    }

    fn sender(&self) -> Result<&Arc<dyn ActionSender>> {
        self.action_sender
            .as_ref()
            .ok_or_else(|| StoreError::Unsupported(self.collection.clone()))
    }

    pub async fn create(&self, payload: Value) -> Result<Value> {
        self.sender()?.create(&self.collection, payload).await
    }

    /// Full update: the current model fields overlaid with the update form
    /// the complete payload sent to the backend.
    pub async fn update(&self, update: Value, view_model: &ViewModel) -> Result<()> {
        let payload = merged_payload(view_model.model(), update)?;
        self.sender()?
            .update(&self.collection, view_model.id(), payload)
            .await
    }

    /// Partial update: only the given fields are sent.
    pub async fn patch(&self, update: Value, view_model: &ViewModel) -> Result<()> {
        self.sender()?
            .patch(&self.collection, view_model.id(), update)
            .await
    }

    pub async fn delete(&self, view_model: &ViewModel) -> Result<()> {
        self.sender()?
            .delete(&self.collection, view_model.id())
            .await
    }
}

impl HasCollection for Repository {
    fn collection_string(&self) -> &str {
        &self.collection
    }
}

fn merged_payload(model: &Model, update: Value) -> Result<Value> {
    let update = match update {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::InvalidModel(format!(
                "update payload must be a JSON object, got {}",
                other
            )))
        }
    };
    let mut merged: Map<String, Value> = model.fields().clone();
    for (key, value) in update {
        merged.insert(key, value);
    }
    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merged_payload_overlays_update() {
        let model = Model::new(
            "demo/widget",
            json!({ "id": 1, "name": "old", "weight": 2 }),
        )
        .unwrap();
        let merged = merged_payload(&model, json!({ "name": "new" })).unwrap();
        assert_eq!(merged, json!({ "id": 1, "name": "new", "weight": 2 }));
    }

    #[test]
    fn test_merged_payload_rejects_non_objects() {
        let model = Model::new("demo/widget", json!({ "id": 1 })).unwrap();
        assert!(merged_payload(&model, json!([1, 2])).is_err());
    }
}
