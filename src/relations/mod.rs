//! Relation declarations: static metadata describing how one view-model
//! property is derived from foreign entities.
//!
//! The four variants form a closed union:
//! - `Normal`: this model holds the foreign id(s).
//! - `Reverse`: the foreign model holds the id pointing back at this one.
//! - `Generic`: a `(collection, id)` content object identifies a foreign
//!   model of one of several possible collections.
//! - `Custom`: an arbitrary getter plus a cache-check function naming the
//!   foreign view model that invalidates the cached result.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::core::Model;
use crate::view::{Resolved, ViewModel};

mod manager;

pub use manager::RelationManager;

/// Read as in an ER model with this model on the right side: `ManyToOne`
/// means many of us point at one foreign model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    pub fn is_to_many(&self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }
}

pub type CustomGetFn = Arc<dyn Fn(&Model, &ViewModel) -> Resolved + Send + Sync>;
pub type CacheObjectFn = Arc<dyn Fn(&ViewModel) -> Option<ViewModel> + Send + Sync>;

pub enum Relation {
    Normal {
        own_key: String,
        own_id_key: String,
        foreign_collection: String,
        cardinality: Cardinality,
        order: Option<String>,
    },
    Reverse {
        own_key: String,
        foreign_id_key: String,
        foreign_collection: String,
        cardinality: Cardinality,
        order: Option<String>,
    },
    Generic {
        own_key: String,
        own_content_object_key: String,
        possible_collections: Vec<String>,
    },
    Custom {
        own_key: String,
        get: CustomGetFn,
        cache_object: CacheObjectFn,
    },
}

impl Relation {
    pub fn many_to_one(
        own_key: impl Into<String>,
        own_id_key: impl Into<String>,
        foreign_collection: impl Into<String>,
    ) -> Self {
        Relation::Normal {
            own_key: own_key.into(),
            own_id_key: own_id_key.into(),
            foreign_collection: foreign_collection.into(),
            cardinality: Cardinality::ManyToOne,
            order: None,
        }
    }

    pub fn one_to_many(
        own_key: impl Into<String>,
        own_id_key: impl Into<String>,
        foreign_collection: impl Into<String>,
    ) -> Self {
        Relation::Normal {
            own_key: own_key.into(),
            own_id_key: own_id_key.into(),
            foreign_collection: foreign_collection.into(),
            cardinality: Cardinality::OneToMany,
            order: None,
        }
    }

    pub fn many_to_many(
        own_key: impl Into<String>,
        own_id_key: impl Into<String>,
        foreign_collection: impl Into<String>,
    ) -> Self {
        Relation::Normal {
            own_key: own_key.into(),
            own_id_key: own_id_key.into(),
            foreign_collection: foreign_collection.into(),
            cardinality: Cardinality::ManyToMany,
            order: None,
        }
    }

    /// Reverse relation: the foreign model's `foreign_id_key` points back at
    /// this model's id.
    pub fn reverse(
        own_key: impl Into<String>,
        foreign_id_key: impl Into<String>,
        foreign_collection: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Relation::Reverse {
            own_key: own_key.into(),
            foreign_id_key: foreign_id_key.into(),
            foreign_collection: foreign_collection.into(),
            cardinality,
            order: None,
        }
    }

    pub fn generic(
        own_key: impl Into<String>,
        own_content_object_key: impl Into<String>,
        possible_collections: Vec<String>,
    ) -> Self {
        Relation::Generic {
            own_key: own_key.into(),
            own_content_object_key: own_content_object_key.into(),
            possible_collections,
        }
    }

    pub fn custom(
        own_key: impl Into<String>,
        get: impl Fn(&Model, &ViewModel) -> Resolved + Send + Sync + 'static,
        cache_object: impl Fn(&ViewModel) -> Option<ViewModel> + Send + Sync + 'static,
    ) -> Self {
        Relation::Custom {
            own_key: own_key.into(),
            get: Arc::new(get),
            cache_object: Arc::new(cache_object),
        }
    }

    /// Sets the numeric sort key for relations producing lists. Ignored for
    /// generic and custom relations, which never sort.
    pub fn with_order(mut self, order_key: impl Into<String>) -> Self {
        match &mut self {
            Relation::Normal { order, .. } | Relation::Reverse { order, .. } => {
                *order = Some(order_key.into());
            }
            _ => {}
        }
        self
    }

    /// The property name exposed on the view model.
    pub fn own_key(&self) -> &str {
        match self {
            Relation::Normal { own_key, .. }
            | Relation::Reverse { own_key, .. }
            | Relation::Generic { own_key, .. }
            | Relation::Custom { own_key, .. } => own_key,
        }
    }

    pub fn is_reverse(&self) -> bool {
        matches!(self, Relation::Reverse { .. })
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Normal {
                own_key,
                own_id_key,
                foreign_collection,
                cardinality,
                order,
            } => f
                .debug_struct("Normal")
                .field("own_key", own_key)
                .field("own_id_key", own_id_key)
                .field("foreign_collection", foreign_collection)
                .field("cardinality", cardinality)
                .field("order", order)
                .finish(),
            Relation::Reverse {
                own_key,
                foreign_id_key,
                foreign_collection,
                cardinality,
                order,
            } => f
                .debug_struct("Reverse")
                .field("own_key", own_key)
                .field("foreign_id_key", foreign_id_key)
                .field("foreign_collection", foreign_collection)
                .field("cardinality", cardinality)
                .field("order", order)
                .finish(),
            Relation::Generic {
                own_key,
                own_content_object_key,
                possible_collections,
            } => f
                .debug_struct("Generic")
                .field("own_key", own_key)
                .field("own_content_object_key", own_content_object_key)
                .field("possible_collections", possible_collections)
                .finish(),
            Relation::Custom { own_key, .. } => {
                f.debug_struct("Custom").field("own_key", own_key).finish()
            }
        }
    }
}

/// Declares sub-entities embedded in the raw payload (e.g. options inside a
/// poll). Children are built eagerly at view-model build time from the
/// array stored under `own_key` and exposed there as view models.
pub struct NestedDescriptor {
    own_key: String,
    descriptor: Arc<crate::registry::CollectionDescriptor>,
    order: Option<String>,
}

impl NestedDescriptor {
    pub fn new(
        own_key: impl Into<String>,
        descriptor: Arc<crate::registry::CollectionDescriptor>,
    ) -> Self {
        Self {
            own_key: own_key.into(),
            descriptor,
            order: None,
        }
    }

    pub fn with_order(mut self, order_key: impl Into<String>) -> Self {
        self.order = Some(order_key.into());
        self
    }

    pub fn own_key(&self) -> &str {
        &self.own_key
    }

    pub fn descriptor(&self) -> &Arc<crate::registry::CollectionDescriptor> {
        &self.descriptor
    }

    pub fn order(&self) -> Option<&str> {
        self.order.as_deref()
    }
}

/// Sorts a relation result in place. With an order key, elements carrying a
/// numeric value for it come first, ascending; elements without the key come
/// after them. Ties fall back to ascending id, which makes the order total.
pub fn sort_view_models(models: &mut [ViewModel], order: Option<&str>) {
    models.sort_by(|a, b| compare_with_order(a, b, order));
}

pub(crate) fn compare_with_order(a: &ViewModel, b: &ViewModel, order: Option<&str>) -> Ordering {
    if let Some(key) = order {
        let by_key = match (a.model().number_field(key), b.model().number_field(key)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if by_key != Ordering::Equal {
            return by_key;
        }
    }
    a.id().cmp(&b.id())
}
