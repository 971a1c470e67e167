//! View models: read-only wrappers over raw models that expose computed
//! properties, eagerly built nested children, raw fields and lazily
//! resolved relations through a single `resolve` lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::core::{ChangeId, Id, Model, Result};
use crate::registry::CollectionDescriptor;
use crate::relations::RelationManager;

/// The result of a property lookup on a view model.
#[derive(Debug, Clone)]
pub enum Resolved {
    None,
    Field(Value),
    One(ViewModel),
    Many(Vec<ViewModel>),
}

/// A memoized relation result together with the change ids of its foreign
/// targets at resolution time. The entry stays valid only while every
/// recorded change id matches the change-tracking cache exactly.
pub(crate) struct CachedRelation {
    pub value: Resolved,
    pub recorded: HashMap<String, ChangeId>,
}

#[derive(Clone)]
pub struct ViewModel {
    model: Arc<Model>,
    descriptor: Arc<CollectionDescriptor>,
    nested: Arc<HashMap<String, Vec<ViewModel>>>,
    relation_cache: Arc<Mutex<HashMap<String, CachedRelation>>>,
    manager: Arc<RelationManager>,
}

impl ViewModel {
    pub(crate) fn new(
        model: Arc<Model>,
        descriptor: Arc<CollectionDescriptor>,
        nested: Arc<HashMap<String, Vec<ViewModel>>>,
        manager: Arc<RelationManager>,
    ) -> Self {
        Self {
            model,
            descriptor,
            nested,
            relation_cache: Arc::new(Mutex::new(HashMap::new())),
            manager,
        }
    }

    pub fn id(&self) -> Id {
        self.model.id()
    }

    pub fn collection(&self) -> &str {
        self.model.collection()
    }

    pub fn element_id(&self) -> String {
        self.model.element_id()
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn title(&self) -> String {
        self.descriptor.title_for(self)
    }

    pub fn verbose_name(&self) -> &str {
        self.descriptor.verbose_name()
    }

    /// Raw field access, bypassing getters, nested children and relations.
    pub fn field(&self, key: &str) -> Option<Value> {
        self.model.field(key).cloned()
    }

    /// Unified property lookup. Precedence: computed getters, then nested
    /// children, then raw fields, then declared relations. Unknown keys
    /// resolve to nothing.
    pub fn resolve(&self, key: &str) -> Result<Resolved> {
        if let Some(getter) = self.descriptor.getter_for(key) {
            return Ok(getter(self));
        }
        if let Some(children) = self.nested.get(key) {
            return Ok(Resolved::Many(children.clone()));
        }
        if let Some(value) = self.model.field(key) {
            return Ok(Resolved::Field(value.clone()));
        }
        if let Some(relation) = self.descriptor.relation_for(key) {
            return self
                .manager
                .resolve_with_cache(key, self, &self.model, relation);
        }
        Ok(Resolved::None)
    }

    /// Convenience for to-one relations.
    pub fn related(&self, key: &str) -> Result<Option<ViewModel>> {
        Ok(match self.resolve(key)? {
            Resolved::One(vm) => Some(vm),
            _ => None,
        })
    }

    /// Convenience for to-many relations and nested children.
    pub fn related_list(&self, key: &str) -> Result<Vec<ViewModel>> {
        Ok(match self.resolve(key)? {
            Resolved::Many(models) => models,
            Resolved::One(vm) => vec![vm],
            _ => Vec::new(),
        })
    }

    pub(crate) fn relation_cache(&self) -> &Mutex<HashMap<String, CachedRelation>> {
        &self.relation_cache
    }
}

impl fmt::Debug for ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModel")
            .field("element_id", &self.element_id())
            .finish()
    }
}
