use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAI,
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAI
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_grouping_batch_size")]
    pub grouping_batch_size: usize,
    #[serde(default = "default_grouping_preview_length")]
    pub grouping_preview_length: usize,
    #[serde(default = "default_top_k_results")]
    pub top_k_results: usize,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_generation_model() -> String {
    "anthropic/claude-3-sonnet".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_data_dir() -> String {
    "./data".to_string()
}

const fn default_grouping_batch_size() -> usize {
    30
}

const fn default_grouping_preview_length() -> usize {
    120
}

const fn default_top_k_results() -> usize {
    5
}

const fn default_max_history() -> usize {
    10
}

const fn default_llm_timeout_secs() -> u64 {
    120
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
