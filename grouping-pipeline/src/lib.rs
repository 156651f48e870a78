pub mod batch;
pub mod pipeline;
pub mod state;
pub mod synthesizer;

pub use pipeline::{ingest_corpus, GroupingConfig, GroupingPipeline, GroupingReport};
