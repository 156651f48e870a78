pub mod answer;
pub mod conversation;
pub mod pipeline;
pub mod reformulation;

pub use pipeline::{CorpusAnswer, RetrievalConfig, RetrievalPipeline};
