mod model;
mod store;

pub use model::{Resolved, ViewModel};
pub use store::ViewModelStore;

pub(crate) use model::CachedRelation;
