mod data_store;
mod slot;

pub use data_store::DataStore;
pub use slot::{UpdateManager, UpdateSlot};
