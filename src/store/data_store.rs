//! The normalized model store. Holds every raw model keyed by collection
//! and id, mirrors each model's serialized form for persistence, and
//! publishes change information either directly or through the open
//! update slot.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::core::{ChangeId, HasCollection, Id, Model, Result};
use crate::registry::CollectionRegistry;
use crate::storage::{KeyValueStorage, StorageError};

use super::UpdateManager;

const STORE_KEY: &str = "DS:store";
const MAX_CHANGE_ID_KEY: &str = "DS:max_change_id";

pub struct DataStore {
    model_store: RwLock<HashMap<String, BTreeMap<Id, Arc<Model>>>>,
    json_store: RwLock<HashMap<String, BTreeMap<Id, String>>>,
    max_change_id: RwLock<ChangeId>,
    changed_subjects: RwLock<HashMap<String, broadcast::Sender<Arc<Model>>>>,
    deleted_tx: broadcast::Sender<(String, Id)>,
    modified_tx: broadcast::Sender<()>,
    clear_tx: broadcast::Sender<()>,
    degraded: watch::Sender<bool>,
    storage: Arc<dyn KeyValueStorage>,
    registry: Weak<CollectionRegistry>,
    update_manager: Arc<UpdateManager>,
}

impl DataStore {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        update_manager: Arc<UpdateManager>,
        registry: Weak<CollectionRegistry>,
    ) -> Self {
        let (modified_tx, _) = broadcast::channel(64);
        let (clear_tx, _) = broadcast::channel(16);
        let (deleted_tx, _) = broadcast::channel(64);
        let (degraded, _) = watch::channel(false);
        Self {
            model_store: RwLock::new(HashMap::new()),
            json_store: RwLock::new(HashMap::new()),
            max_change_id: RwLock::new(0),
            changed_subjects: RwLock::new(HashMap::new()),
            deleted_tx,
            modified_tx,
            clear_tx,
            degraded,
            storage,
            registry,
            update_manager,
        }
    }

    pub fn get<C: HasCollection + ?Sized>(&self, collection: &C, id: Id) -> Option<Arc<Model>> {
        self.model_store
            .read()
            .expect("model store poisoned")
            .get(collection.collection_string())?
            .get(&id)
            .cloned()
    }

    /// Missing ids are dropped silently.
    pub fn get_many<C: HasCollection + ?Sized>(&self, collection: &C, ids: &[Id]) -> Vec<Arc<Model>> {
        let store = self.model_store.read().expect("model store poisoned");
        match store.get(collection.collection_string()) {
            Some(table) => ids.iter().filter_map(|id| table.get(id).cloned()).collect(),
            None => Vec::new(),
        }
    }

    pub fn get_all<C: HasCollection + ?Sized>(&self, collection: &C) -> Vec<Arc<Model>> {
        let store = self.model_store.read().expect("model store poisoned");
        match store.get(collection.collection_string()) {
            Some(table) => table.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn filter<C: HasCollection + ?Sized>(
        &self,
        collection: &C,
        predicate: impl Fn(&Model) -> bool,
    ) -> Vec<Arc<Model>> {
        let mut models = self.get_all(collection);
        models.retain(|m| predicate(m));
        models
    }

    pub fn find<C: HasCollection + ?Sized>(
        &self,
        collection: &C,
        predicate: impl Fn(&Model) -> bool,
    ) -> Option<Arc<Model>> {
        self.get_all(collection).into_iter().find(|m| predicate(m))
    }

    /// Inserts or updates models. With a change id the store is flushed to
    /// persistent storage afterwards.
    pub async fn add(&self, models: Vec<Model>, change_id: Option<ChangeId>) -> Result<()> {
        for model in models {
            let json = model.to_json_string()?;
            let model = Arc::new(model);
            {
                let mut store = self.model_store.write().expect("model store poisoned");
                store
                    .entry(model.collection().to_string())
                    .or_default()
                    .insert(model.id(), model.clone());
            }
            {
                let mut store = self.json_store.write().expect("json store poisoned");
                store
                    .entry(model.collection().to_string())
                    .or_default()
                    .insert(model.id(), json);
            }
            self.publish_changed(model);
        }
        if let Some(change_id) = change_id {
            self.flush_to_persistent_storage(change_id).await?;
        }
        Ok(())
    }

    /// Removes the given ids from a collection. Missing ids are ignored.
    pub async fn remove(
        &self,
        collection: &str,
        ids: &[Id],
        change_id: Option<ChangeId>,
    ) -> Result<()> {
        for &id in ids {
            let existed = {
                let mut store = self.model_store.write().expect("model store poisoned");
                store
                    .get_mut(collection)
                    .map(|table| table.remove(&id).is_some())
                    .unwrap_or(false)
            };
            {
                let mut store = self.json_store.write().expect("json store poisoned");
                if let Some(table) = store.get_mut(collection) {
                    table.remove(&id);
                }
            }
            if existed {
                self.publish_deleted(collection, id);
            }
        }
        if let Some(change_id) = change_id {
            self.flush_to_persistent_storage(change_id).await?;
        }
        Ok(())
    }

    /// Replaces the whole store content. Every previously held model is
    /// published as deleted before the new models are added.
    pub async fn set(&self, models: Option<Vec<Model>>, new_change_id: Option<ChangeId>) -> Result<()> {
        let old = {
            let mut model_store = self.model_store.write().expect("model store poisoned");
            let mut json_store = self.json_store.write().expect("json store poisoned");
            json_store.clear();
            std::mem::take(&mut *model_store)
        };
        for (collection, table) in old {
            for id in table.keys() {
                self.publish_deleted(&collection, *id);
            }
        }
        self.add(models.unwrap_or_default(), new_change_id).await
    }

    /// Wipes the store, persistent storage and every repository's view
    /// models, then notifies clear subscribers.
    pub async fn clear(&self) -> Result<()> {
        info!("clearing data store");
        self.model_store.write().expect("model store poisoned").clear();
        self.json_store.write().expect("json store poisoned").clear();
        *self.max_change_id.write().expect("change id poisoned") = 0;
        self.storage.remove(STORE_KEY).await?;
        self.storage.remove(MAX_CHANGE_ID_KEY).await?;
        if let Some(registry) = self.registry.upgrade() {
            for repo in registry.all_repositories() {
                repo.clear_view_models();
            }
        }
        let _ = self.clear_tx.send(());
        Ok(())
    }

    /// Loads the persisted snapshot. A missing, unreadable or corrupt
    /// snapshot falls back to an empty store.
    pub async fn init_from_persisted(&self) -> Result<()> {
        let raw = match self.storage.get(STORE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.clear().await,
            Err(err) => {
                warn!(%err, "failed to read persisted store, starting empty");
                return self.clear().await;
            }
        };

        let slot = self.update_manager.get_new_slot().await;
        match self.load_snapshot(&raw).await {
            Ok(max_change_id) => {
                self.update_manager.commit(self, slot, max_change_id, true)?;
                debug!(max_change_id, "initialized from persisted store");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "persisted store is corrupt, starting empty");
                self.update_manager.drop_slot();
                self.clear().await
            }
        }
    }

    async fn load_snapshot(&self, raw: &[u8]) -> Result<ChangeId> {
        let snapshot: HashMap<String, BTreeMap<Id, String>> = serde_json::from_slice(raw)?;
        let registry = self.registry.upgrade();
        for (collection, table) in snapshot {
            if let Some(registry) = &registry {
                if !registry.is_registered(&collection) {
                    debug!(%collection, "skipping persisted models of unknown collection");
                    continue;
                }
            }
            for (id, json) in table {
                let model = Arc::new(Model::from_json_str(&collection, &json)?);
                if model.id() != id {
                    warn!(%collection, id, "persisted model id mismatch, skipping");
                    continue;
                }
                {
                    let mut store = self.model_store.write().expect("model store poisoned");
                    store
                        .entry(collection.clone())
                        .or_default()
                        .insert(id, model.clone());
                }
                {
                    let mut store = self.json_store.write().expect("json store poisoned");
                    store.entry(collection.clone()).or_default().insert(id, json);
                }
                self.publish_changed(model);
            }
        }

        let max_change_id = match self.storage.get(MAX_CHANGE_ID_KEY).await {
            Ok(Some(raw)) => String::from_utf8_lossy(&raw).trim().parse().unwrap_or(0),
            _ => 0,
        };
        *self.max_change_id.write().expect("change id poisoned") = max_change_id;
        Ok(max_change_id)
    }

    /// Writes the serialized store and the max change id. Quota errors flip
    /// the degraded-persistence flag instead of failing the update. If the
    /// snapshot write degraded, the change-id write is skipped: a persisted
    /// change id newer than the persisted snapshot would claim updates the
    /// snapshot does not contain.
    pub async fn flush_to_persistent_storage(&self, change_id: ChangeId) -> Result<()> {
        *self.max_change_id.write().expect("change id poisoned") = change_id;
        let serialized = {
            let store = self.json_store.read().expect("json store poisoned");
            serde_json::to_vec(&*store)?
        };
        if !self.write_persisted(STORE_KEY, serialized).await? {
            return Ok(());
        }
        self.write_persisted(MAX_CHANGE_ID_KEY, change_id.to_string().into_bytes())
            .await?;
        Ok(())
    }

    /// Returns whether the write landed; a quota failure degrades instead
    /// of erroring.
    async fn write_persisted(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        match self.storage.set(key, value).await {
            Ok(()) => Ok(true),
            Err(StorageError::QuotaExceeded) => {
                warn!(key, "storage quota exceeded, persistence degraded");
                self.degraded.send_replace(true);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn max_change_id(&self) -> ChangeId {
        *self.max_change_id.read().expect("change id poisoned")
    }

    fn publish_changed(&self, model: Arc<Model>) {
        let collection = model.collection().to_string();
        let id = model.id();
        if let Some(tx) = self
            .changed_subjects
            .read()
            .expect("subjects poisoned")
            .get(&collection)
        {
            let _ = tx.send(model);
        }
        if !self.update_manager.record_changed(&collection, id) {
            self.trigger_modified();
        }
    }

    fn publish_deleted(&self, collection: &str, id: Id) {
        let _ = self.deleted_tx.send((collection.to_string(), id));
        if !self.update_manager.record_deleted(collection, id) {
            self.trigger_modified();
        }
    }

    /// Stream of raw model updates for one collection.
    pub fn change_observable(&self, collection: &str) -> broadcast::Receiver<Arc<Model>> {
        let mut subjects = self.changed_subjects.write().expect("subjects poisoned");
        subjects
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    pub fn deleted_observable(&self) -> broadcast::Receiver<(String, Id)> {
        self.deleted_tx.subscribe()
    }

    /// Fires once per settled mutation: directly for slot-less writes, once
    /// per commit otherwise.
    pub fn modified_observable(&self) -> broadcast::Receiver<()> {
        self.modified_tx.subscribe()
    }

    pub fn clear_observable(&self) -> broadcast::Receiver<()> {
        self.clear_tx.subscribe()
    }

    pub(crate) fn trigger_modified(&self) {
        let _ = self.modified_tx.send(());
    }

    /// Latched flag, set when a quota error degraded persistence.
    pub fn degraded_persistence(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    pub fn is_persistence_degraded(&self) -> bool {
        *self.degraded.borrow()
    }
}
