//! Relation manager: builds view models and resolves their declared
//! relations, consulting the change-tracking cache to skip recomputation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::RelationCache;
use crate::core::{ChangeId, Model, Result, StoreError};
use crate::registry::CollectionDescriptor;
use crate::view::{CachedRelation, Resolved, ViewModel, ViewModelStore};

use super::{sort_view_models, Relation};

pub struct RelationManager {
    view_models: Arc<ViewModelStore>,
    change_cache: Arc<RelationCache>,
}

impl RelationManager {
    pub fn new(view_models: Arc<ViewModelStore>, change_cache: Arc<RelationCache>) -> Self {
        Self {
            view_models,
            change_cache,
        }
    }

    /// Builds a view model for the given raw model. Nested sub-entities are
    /// built eagerly here; top-level relations stay lazy and resolve on
    /// first property access.
    pub fn build_view_model(
        manager: &Arc<RelationManager>,
        model: Arc<Model>,
        descriptor: Arc<CollectionDescriptor>,
    ) -> ViewModel {
        let mut nested_map = HashMap::new();
        for nested in descriptor.nested_descriptors() {
            let mut children = Vec::new();
            if let Some(Value::Array(items)) = model.field(nested.own_key()) {
                for item in items {
                    match Model::new(nested.descriptor().collection(), item.clone()) {
                        Ok(child) => children.push(Self::build_view_model(
                            manager,
                            Arc::new(child),
                            nested.descriptor().clone(),
                        )),
                        Err(err) => {
                            warn!(
                                collection = model.collection(),
                                id = model.id(),
                                key = nested.own_key(),
                                %err,
                                "skipping malformed nested entity"
                            );
                        }
                    }
                }
            }
            sort_view_models(&mut children, nested.order());
            nested_map.insert(nested.own_key().to_string(), children);
        }
        ViewModel::new(model, descriptor, Arc::new(nested_map), Arc::clone(manager))
    }

    /// Resolves one relation against the current view-model tables. Absent
    /// targets resolve to nothing; only a generic relation resolving to an
    /// unexpected collection is an error.
    pub fn resolve(
        &self,
        model: &Model,
        view_model: &ViewModel,
        relation: &Relation,
    ) -> Result<Resolved> {
        match relation {
            Relation::Normal {
                own_id_key,
                foreign_collection,
                cardinality,
                order,
                ..
            } => {
                if cardinality.is_to_many() {
                    let ids = model.id_list_field(own_id_key).unwrap_or_default();
                    // getMany drops dangling ids, defensive against partial
                    // updates.
                    let mut foreign = self.view_models.get_many(foreign_collection.as_str(), &ids);
                    sort_view_models(&mut foreign, order.as_deref());
                    Ok(Resolved::Many(foreign))
                } else {
                    Ok(match model.id_field(own_id_key) {
                        Some(id) => self
                            .view_models
                            .get(foreign_collection.as_str(), id)
                            .map(Resolved::One)
                            .unwrap_or(Resolved::None),
                        None => Resolved::None,
                    })
                }
            }
            Relation::Reverse {
                foreign_id_key,
                foreign_collection,
                cardinality,
                order,
                ..
            } => {
                let own_id = model.id();
                if cardinality.is_to_many() {
                    let mut foreign = self.view_models.filter(foreign_collection.as_str(), |vm| {
                        vm.model().references(foreign_id_key, own_id)
                    });
                    sort_view_models(&mut foreign, order.as_deref());
                    Ok(Resolved::Many(foreign))
                } else {
                    Ok(self
                        .view_models
                        .find(foreign_collection.as_str(), |vm| {
                            vm.model().references(foreign_id_key, own_id)
                        })
                        .map(Resolved::One)
                        .unwrap_or(Resolved::None))
                }
            }
            Relation::Generic {
                own_key,
                own_content_object_key,
                possible_collections,
            } => {
                let Some((collection, id)) = model.content_object_field(own_content_object_key)
                else {
                    return Ok(Resolved::None);
                };
                match self.view_models.get(collection.as_str(), id) {
                    Some(foreign) => {
                        if possible_collections.iter().any(|c| c == &collection) {
                            Ok(Resolved::One(foreign))
                        } else {
                            Err(StoreError::InvalidGenericTarget {
                                own_key: own_key.clone(),
                                element_id: foreign.element_id(),
                            })
                        }
                    }
                    None => Ok(Resolved::None),
                }
            }
            Relation::Custom { get, .. } => Ok(get(model, view_model)),
        }
    }

    /// Cache-aware resolution. Reverse relations bypass the cache entirely:
    /// a newly created foreign entity touches only its own change id, so a
    /// cached reverse result could silently miss new members.
    pub fn resolve_with_cache(
        &self,
        key: &str,
        view_model: &ViewModel,
        model: &Model,
        relation: &Relation,
    ) -> Result<Resolved> {
        if relation.is_reverse() {
            return self.resolve(model, view_model, relation);
        }

        {
            let cache = view_model.relation_cache().lock().expect("relation cache poisoned");
            if let Some(entry) = cache.get(key) {
                if self.change_cache.is_valid(&entry.recorded) {
                    return Ok(entry.value.clone());
                }
            }
        }

        debug!(
            element_id = %model.element_id(),
            key,
            "recomputing relation"
        );
        let value = self.resolve(model, view_model, relation)?;

        let produced = match &value {
            Resolved::None => false,
            Resolved::Many(models) => !models.is_empty(),
            _ => true,
        };

        let mut cache = view_model.relation_cache().lock().expect("relation cache poisoned");
        if produced {
            let recorded = self.record_change_ids(view_model, relation, &value);
            cache.insert(
                key.to_string(),
                CachedRelation {
                    value: value.clone(),
                    recorded,
                },
            );
        } else {
            cache.remove(key);
        }
        Ok(value)
    }

    /// Snapshots the current change id of every foreign view model in the
    /// result. For custom relations the declaration designates a single
    /// cache-check object instead.
    fn record_change_ids(
        &self,
        view_model: &ViewModel,
        relation: &Relation,
        value: &Resolved,
    ) -> HashMap<String, ChangeId> {
        let mut recorded = HashMap::new();
        let mut record = |vm: &ViewModel| {
            let element_id = vm.element_id();
            let change_id = self.change_cache.query(&element_id).unwrap_or(0);
            recorded.insert(element_id, change_id);
        };
        if let Relation::Custom { cache_object, .. } = relation {
            if let Some(target) = cache_object(view_model) {
                record(&target);
            }
            return recorded;
        }
        match value {
            Resolved::One(vm) => record(vm),
            Resolved::Many(models) => models.iter().for_each(record),
            _ => {}
        }
        recorded
    }
}
