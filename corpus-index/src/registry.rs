use std::{collections::HashMap, path::PathBuf, sync::Arc};

use common::{error::AppError, types::group::Group, utils::embedding::EmbeddingProvider};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    index::CorpusIndex,
    store::{self, artifacts_exist},
};

/// Owns every resident corpus index and its on-disk artifacts.
///
/// Indexes are immutable snapshots behind `Arc`, so readers clone a handle
/// under a short read lock and search without holding anything. Writers
/// (create, load, evict) swap whole entries under the write lock; a search
/// running against a superseded snapshot simply finishes against the old
/// data.
pub struct IndexRegistry {
    data_dir: PathBuf,
    embedding: Arc<EmbeddingProvider>,
    resident: RwLock<HashMap<String, Arc<CorpusIndex>>>,
}

impl IndexRegistry {
    pub fn new(data_dir: impl Into<PathBuf>, embedding: Arc<EmbeddingProvider>) -> Self {
        Self {
            data_dir: data_dir.into(),
            embedding,
            resident: RwLock::new(HashMap::new()),
        }
    }

    pub fn embedding(&self) -> &Arc<EmbeddingProvider> {
        &self.embedding
    }

    /// Builds a fresh index for `corpus_id` from grouped content, replacing
    /// any resident snapshot. Nothing is replaced if the build fails.
    pub async fn create(
        &self,
        corpus_id: &str,
        groups: Vec<Group>,
    ) -> Result<Arc<CorpusIndex>, AppError> {
        let index = Arc::new(CorpusIndex::build(corpus_id, groups, &self.embedding).await?);
        self.resident
            .write()
            .await
            .insert(corpus_id.to_owned(), Arc::clone(&index));
        Ok(index)
    }

    /// Returns the resident snapshot for `corpus_id`, loading it from disk
    /// on first access.
    pub async fn get_or_load(&self, corpus_id: &str) -> Result<Arc<CorpusIndex>, AppError> {
        if let Some(index) = self.resident.read().await.get(corpus_id) {
            return Ok(Arc::clone(index));
        }
        self.load(corpus_id).await
    }

    /// Reads the persisted artifact pair for `corpus_id` from disk,
    /// replacing whatever is resident. A failed load leaves the previous
    /// resident snapshot (if any) untouched.
    pub async fn load(&self, corpus_id: &str) -> Result<Arc<CorpusIndex>, AppError> {
        let dir = store::corpus_dir(&self.data_dir, corpus_id);
        let expected_dimension = self.embedding.dimension();
        let index = Arc::new(store::load_index(corpus_id, &dir, expected_dimension)?);

        if let (Some(stored), Some(current)) = (index.model_code(), self.embedding.model_code()) {
            if stored != current {
                tracing::warn!(
                    corpus_id,
                    stored,
                    current = %current,
                    "corpus was embedded with a different model"
                );
            }
        }

        self.resident
            .write()
            .await
            .insert(corpus_id.to_owned(), Arc::clone(&index));
        Ok(index)
    }

    /// Persists the resident snapshot for `corpus_id`.
    pub async fn save(&self, corpus_id: &str) -> Result<(), AppError> {
        let index = {
            let resident = self.resident.read().await;
            resident
                .get(corpus_id)
                .cloned()
                .ok_or_else(|| AppError::CorpusNotFound(corpus_id.to_owned()))?
        };
        let dir = store::corpus_dir(&self.data_dir, corpus_id);
        store::save_index(&index, &dir)
    }

    /// Drops the resident snapshot; on-disk artifacts are untouched. Any
    /// in-flight search keeps its own `Arc` until it finishes.
    pub async fn evict(&self, corpus_id: &str) -> bool {
        let removed = self.resident.write().await.remove(corpus_id).is_some();
        if removed {
            debug!(corpus_id, "corpus index evicted");
        }
        removed
    }

    pub async fn is_resident(&self, corpus_id: &str) -> bool {
        self.resident.read().await.contains_key(corpus_id)
    }

    /// Corpus ids currently resident in memory, sorted for stable output.
    pub async fn resident_corpora(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.resident.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Corpus ids with a complete artifact pair on disk, sorted.
    pub fn persisted_corpora(&self) -> Result<Vec<String>, AppError> {
        let corpora_root = self.data_dir.join("corpora");
        if !corpora_root.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&corpora_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if artifacts_exist(&entry.path()) {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        info!(count = ids.len(), "persisted corpora listed");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::group::Importance;

    fn group(id: u64, text: &str) -> Group {
        Group {
            id,
            title: format!("Group {id}"),
            theme: "theme".into(),
            summary: String::new(),
            member_fragment_ids: vec![format!("frag-{id}")],
            representative_text: text.into(),
            pages: Vec::new(),
            importance: Importance::Medium,
        }
    }

    fn registry(data_dir: &std::path::Path) -> IndexRegistry {
        IndexRegistry::new(data_dir, Arc::new(EmbeddingProvider::new_hashed(16)))
    }

    #[tokio::test]
    async fn test_create_makes_corpus_resident() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry
            .create("gita", vec![group(0, "duty"), group(1, "devotion")])
            .await
            .unwrap();

        assert!(registry.is_resident("gita").await);
        assert_eq!(registry.resident_corpora().await, vec!["gita"]);
    }

    #[tokio::test]
    async fn test_save_then_load_after_evict() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry
            .create("bible", vec![group(0, "genesis"), group(1, "exodus")])
            .await
            .unwrap();
        registry.save("bible").await.unwrap();

        assert!(registry.evict("bible").await);
        assert!(!registry.is_resident("bible").await);

        let index = registry.get_or_load("bible").await.unwrap();
        assert_eq!(index.len(), 2);
        assert!(registry.is_resident("bible").await);
    }

    #[tokio::test]
    async fn test_load_unknown_corpus_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let err = registry.get_or_load("missing").await.unwrap_err();
        assert!(matches!(err, AppError::CorpusNotFound(_)));
        assert!(!registry.is_resident("missing").await);
    }

    #[tokio::test]
    async fn test_save_unknown_corpus_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let err = registry.save("missing").await.unwrap_err();
        assert!(matches!(err, AppError::CorpusNotFound(_)));
    }

    #[tokio::test]
    async fn test_corpora_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry
            .create("gita", vec![group(0, "krishna on duty")])
            .await
            .unwrap();
        registry
            .create("bible", vec![group(0, "sermon on the mount")])
            .await
            .unwrap();

        let gita = registry.get_or_load("gita").await.unwrap();
        let bible = registry.get_or_load("bible").await.unwrap();
        assert_eq!(gita.groups()[0].representative_text, "krishna on duty");
        assert_eq!(bible.groups()[0].representative_text, "sermon on the mount");
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry
            .create("gita", vec![group(0, "duty"), group(1, "devotion")])
            .await
            .unwrap();
        registry.save("gita").await.unwrap();

        // Corrupt one artifact on disk. An explicit reload must fail and
        // the resident snapshot must keep serving.
        let corpus = store::corpus_dir(dir.path(), "gita");
        std::fs::write(corpus.join(store::VECTORS_FILE), b"garbage").unwrap();

        let err = registry.load("gita").await.unwrap_err();
        assert!(matches!(err, AppError::CorruptIndex(_)));
        assert!(registry.is_resident("gita").await);
        assert_eq!(registry.get_or_load("gita").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persisted_corpora_lists_complete_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry
            .create("gita", vec![group(0, "duty")])
            .await
            .unwrap();
        registry.save("gita").await.unwrap();
        registry
            .create("quran", vec![group(0, "mercy")])
            .await
            .unwrap();

        assert_eq!(registry.persisted_corpora().unwrap(), vec!["gita"]);
    }
}
