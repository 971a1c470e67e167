//! Update-slot coordination. At most one slot is open at a time; further
//! requesters queue FIFO and are woken when the current holder commits or
//! drops its slot.
//!
//! While a slot is open the data store records changed and deleted models
//! into it instead of notifying repositories directly. Committing replays
//! the recorded ids in two passes: first every repository deletes and
//! rebuilds its view models, then every repository publishes. This way a
//! relation resolved during publish never sees a half-updated foreign
//! collection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;
use tracing::debug;

use crate::cache::RelationCache;
use crate::core::{ChangeId, Id, Result, StoreError};
use crate::registry::CollectionRegistry;

use super::DataStore;

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque token for one exclusive update window. Only the matching
/// token can commit the window it opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSlot {
    id: u64,
}

struct SlotState {
    id: u64,
    changed: HashMap<String, Vec<Id>>,
    deleted: HashMap<String, Vec<Id>>,
}

impl SlotState {
    fn open() -> Self {
        Self {
            id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
            changed: HashMap::new(),
            deleted: HashMap::new(),
        }
    }

    fn token(&self) -> UpdateSlot {
        UpdateSlot { id: self.id }
    }

    fn record(map: &mut HashMap<String, Vec<Id>>, collection: &str, id: Id) {
        let ids = map.entry(collection.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
}

#[derive(Default)]
struct SlotQueue {
    current: Option<SlotState>,
    waiters: VecDeque<oneshot::Sender<UpdateSlot>>,
}

pub struct UpdateManager {
    state: Mutex<SlotQueue>,
    registry: Weak<CollectionRegistry>,
    relation_cache: Arc<RelationCache>,
}

impl UpdateManager {
    pub fn new(registry: Weak<CollectionRegistry>, relation_cache: Arc<RelationCache>) -> Self {
        Self {
            state: Mutex::new(SlotQueue::default()),
            registry,
            relation_cache,
        }
    }

    /// Opens a new update slot, waiting until the current holder commits or
    /// drops. Wakeups happen in request order.
    pub async fn get_new_slot(&self) -> UpdateSlot {
        let rx = {
            let mut queue = self.state.lock().expect("slot queue poisoned");
            if queue.current.is_none() {
                let state = SlotState::open();
                let token = state.token();
                queue.current = Some(state);
                return token;
            }
            let (tx, rx) = oneshot::channel();
            queue.waiters.push_back(tx);
            rx
        };
        // The sender lives in the queue guarded by `state`, which outlives
        // this borrow of self.
        rx.await.expect("slot queue dropped its waiter")
    }

    pub fn has_open_slot(&self) -> bool {
        self.state
            .lock()
            .expect("slot queue poisoned")
            .current
            .is_some()
    }

    /// Records a changed model in the open slot. Returns false if no slot
    /// is open, in which case the caller notifies directly.
    pub(crate) fn record_changed(&self, collection: &str, id: Id) -> bool {
        let mut queue = self.state.lock().expect("slot queue poisoned");
        match queue.current.as_mut() {
            Some(state) => {
                SlotState::record(&mut state.changed, collection, id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn record_deleted(&self, collection: &str, id: Id) -> bool {
        let mut queue = self.state.lock().expect("slot queue poisoned");
        match queue.current.as_mut() {
            Some(state) => {
                SlotState::record(&mut state.deleted, collection, id);
                true
            }
            None => false,
        }
    }

    /// Commits the slot: replays the recorded deletions and changes into
    /// every repository (pass one), then lets every repository publish
    /// (pass two), and finally hands the next queued waiter a fresh slot.
    pub fn commit(
        &self,
        store: &DataStore,
        slot: UpdateSlot,
        change_id: ChangeId,
        reset_cache: bool,
    ) -> Result<()> {
        let (changed, deleted) = {
            let queue = self.state.lock().expect("slot queue poisoned");
            match &queue.current {
                Some(state) if state.id == slot.id => (state.changed.clone(), state.deleted.clone()),
                _ => return Err(StoreError::SlotMismatch),
            }
        };
        debug!(
            slot_id = slot.id,
            change_id,
            collections = changed.len() + deleted.len(),
            "committing update slot"
        );

        if reset_cache {
            self.relation_cache.reset();
        }

        if let Some(registry) = self.registry.upgrade() {
            let repositories = registry.all_repositories();
            for repo in &repositories {
                let collection = repo.collection();
                let deleted_ids = deleted.get(collection).map(Vec::as_slice).unwrap_or(&[]);
                if !deleted_ids.is_empty() {
                    repo.delete_models(deleted_ids);
                    self.relation_cache
                        .register_deleted_models(collection, deleted_ids);
                }
                let changed_ids = changed.get(collection).map(Vec::as_slice).unwrap_or(&[]);
                if !changed_ids.is_empty() {
                    repo.changed_models(changed_ids);
                    self.relation_cache
                        .register_changed_models(collection, changed_ids, change_id);
                }
            }
            for repo in &repositories {
                let collection = repo.collection();
                let mut all = deleted.get(collection).cloned().unwrap_or_default();
                all.extend(changed.get(collection).iter().flat_map(|ids| ids.iter().copied()));
                if !all.is_empty() {
                    repo.commit_update(&all);
                }
            }
        }

        store.trigger_modified();

        let mut queue = self.state.lock().expect("slot queue poisoned");
        queue.current = None;
        Self::serve_next(&mut queue);
        Ok(())
    }

    /// Releases the slot without committing. Recorded ids are discarded and
    /// the next waiter is woken.
    pub fn drop_slot(&self) {
        let mut queue = self.state.lock().expect("slot queue poisoned");
        queue.current = None;
        Self::serve_next(&mut queue);
    }

    fn serve_next(queue: &mut SlotQueue) {
        while let Some(tx) = queue.waiters.pop_front() {
            let state = SlotState::open();
            let token = state.token();
            if tx.send(token).is_ok() {
                queue.current = Some(state);
                return;
            }
            // Waiter gave up, try the next one.
        }
    }
}
