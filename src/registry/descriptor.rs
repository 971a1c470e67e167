//! Collection descriptors: the static metadata a repository is built from.
//!
//! A descriptor is the registry's stand-in for a model/view-model
//! constructor pair. It names the collection, declares relations and nested
//! sub-entities, and carries the computed title and getter functions that
//! are injected into every built view model.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use std::cmp::Ordering;

use crate::core::HasCollection;
use crate::relations::{NestedDescriptor, Relation};
use crate::repository::SortFn;
use crate::view::{Resolved, ViewModel};

pub type TitleFn = Arc<dyn Fn(&ViewModel) -> String + Send + Sync>;
pub type GetterFn = Arc<dyn Fn(&ViewModel) -> Resolved + Send + Sync>;

pub struct CollectionDescriptor {
    collection: String,
    verbose_name: String,
    relations: HashMap<String, Relation>,
    nested: Vec<NestedDescriptor>,
    getters: HashMap<String, GetterFn>,
    title: TitleFn,
    sort: Option<SortFn>,
}

impl CollectionDescriptor {
    /// Creates a descriptor with no relations, a verbose name derived from
    /// the collection tail and a default title of the `title` or `name`
    /// field, falling back to the element id.
    pub fn new(collection: impl Into<String>) -> Self {
        let collection = collection.into();
        let verbose_name = collection
            .rsplit('/')
            .next()
            .unwrap_or(collection.as_str())
            .replace('-', " ");
        Self {
            collection,
            verbose_name,
            relations: HashMap::new(),
            nested: Vec::new(),
            getters: HashMap::new(),
            title: Arc::new(default_title),
            sort: None,
        }
    }

    pub fn with_verbose_name(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = verbose_name.into();
        self
    }

    pub fn with_title(
        mut self,
        title: impl Fn(&ViewModel) -> String + Send + Sync + 'static,
    ) -> Self {
        self.title = Arc::new(title);
        self
    }

    /// Declares a relation, exposed on view models under its own key.
    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.insert(relation.own_key().to_string(), relation);
        self
    }

    /// Declares nested sub-entities embedded in the raw payload. Unlike
    /// top-level relations these are built eagerly at view-model build time.
    pub fn nested(mut self, nested: NestedDescriptor) -> Self {
        self.nested.push(nested);
        self
    }

    /// Sets the repository's default list order. Without one, lists sort by
    /// ascending id.
    pub fn with_sort(
        mut self,
        sort: impl Fn(&ViewModel, &ViewModel) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.sort = Some(Arc::new(sort));
        self
    }

    /// Registers a computed property. Getters shadow raw fields and
    /// relations of the same name.
    pub fn getter(
        mut self,
        key: impl Into<String>,
        getter: impl Fn(&ViewModel) -> Resolved + Send + Sync + 'static,
    ) -> Self {
        self.getters.insert(key.into(), Arc::new(getter));
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn verbose_name(&self) -> &str {
        &self.verbose_name
    }

    pub fn relation_for(&self, key: &str) -> Option<&Relation> {
        self.relations.get(key)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn nested_descriptors(&self) -> &[NestedDescriptor] {
        &self.nested
    }

    pub fn getter_for(&self, key: &str) -> Option<&GetterFn> {
        self.getters.get(key)
    }

    pub fn default_sort(&self) -> Option<&SortFn> {
        self.sort.as_ref()
    }

    pub fn title_for(&self, view_model: &ViewModel) -> String {
        (self.title)(view_model)
    }
}

fn default_title(view_model: &ViewModel) -> String {
    for key in ["title", "name"] {
        if let Some(value) = view_model.model().field(key).and_then(|v| v.as_str()) {
            return value.to_string();
        }
    }
    view_model.element_id()
}

impl fmt::Debug for CollectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionDescriptor")
            .field("collection", &self.collection)
            .field("verbose_name", &self.verbose_name)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("nested", &self.nested.len())
            .finish()
    }
}

impl HasCollection for CollectionDescriptor {
    fn collection_string(&self) -> &str {
        &self.collection
    }
}
