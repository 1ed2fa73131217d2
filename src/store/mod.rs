pub mod memory;
pub mod snapshot;

pub use memory::{InMemoryContentStore, StoredUnit};
pub use snapshot::ContentSnapshot;
