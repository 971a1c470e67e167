pub mod error;
pub mod model;
pub mod types;

pub use error::{Result, StoreError};
pub use model::Model;
pub use types::{element_id, parse_element_id, ChangeId, HasCollection, Id};
