pub mod index;
pub mod registry;
pub mod scoring;
pub mod store;

pub use index::{CorpusIndex, ScoredGroup};
pub use registry::IndexRegistry;
