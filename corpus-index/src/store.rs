use std::{
    fs,
    io::BufReader,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use common::{error::AppError, types::group::Group};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::index::CorpusIndex;

pub const VECTORS_FILE: &str = "vectors.json";
pub const GROUPS_FILE: &str = "groups.json";

/// Vector half of the persisted pair, versioned by embedding dimension.
#[derive(Serialize, Deserialize)]
struct VectorArtifact {
    dimension: usize,
    model_code: Option<String>,
    vectors: Vec<Vec<f32>>,
}

/// Metadata half of the persisted pair.
#[derive(Serialize, Deserialize)]
struct GroupArtifact {
    corpus_id: String,
    saved_at: DateTime<Utc>,
    groups: Vec<Group>,
}

pub fn corpus_dir(data_dir: &Path, corpus_id: &str) -> PathBuf {
    data_dir.join("corpora").join(corpus_id)
}

/// Both artifacts present on disk.
pub fn artifacts_exist(dir: &Path) -> bool {
    dir.join(VECTORS_FILE).exists() && dir.join(GROUPS_FILE).exists()
}

/// Persists the index as a matched artifact pair. Each file is written to a
/// temp file in the target directory and atomically renamed over the old
/// one, so a crash never leaves a half-written artifact behind.
pub fn save_index(index: &CorpusIndex, dir: &Path) -> Result<(), AppError> {
    fs::create_dir_all(dir)?;

    write_atomic(
        dir,
        VECTORS_FILE,
        &VectorArtifact {
            dimension: index.dimension(),
            model_code: index.model_code().map(str::to_owned),
            vectors: index.vectors().to_vec(),
        },
    )?;
    write_atomic(
        dir,
        GROUPS_FILE,
        &GroupArtifact {
            corpus_id: index.corpus_id().to_owned(),
            saved_at: Utc::now(),
            groups: index.groups().to_vec(),
        },
    )?;

    info!(
        corpus_id = index.corpus_id(),
        vectors = index.len(),
        path = %dir.display(),
        "corpus index saved"
    );
    Ok(())
}

/// Restores a persisted index. The pair must be loaded together: a lone
/// artifact, a count mismatch between the two, or a dimension other than
/// `expected_dimension` all fail with `CorruptIndex` before anything
/// becomes resident.
pub fn load_index(
    corpus_id: &str,
    dir: &Path,
    expected_dimension: usize,
) -> Result<CorpusIndex, AppError> {
    let vectors_path = dir.join(VECTORS_FILE);
    let groups_path = dir.join(GROUPS_FILE);

    match (vectors_path.exists(), groups_path.exists()) {
        (false, false) => {
            return Err(AppError::CorpusNotFound(corpus_id.to_owned()));
        }
        (true, true) => {}
        _ => {
            return Err(AppError::CorruptIndex(format!(
                "corpus '{corpus_id}' has an incomplete artifact pair; \
                 vectors and group metadata must be persisted together"
            )));
        }
    }

    let vector_artifact: VectorArtifact = read_artifact(corpus_id, &vectors_path)?;
    let group_artifact: GroupArtifact = read_artifact(corpus_id, &groups_path)?;

    if vector_artifact.dimension != expected_dimension {
        return Err(AppError::CorruptIndex(format!(
            "corpus '{corpus_id}' was persisted with dimension {}, \
             embedding model expects {expected_dimension}",
            vector_artifact.dimension
        )));
    }

    if vector_artifact.vectors.len() != group_artifact.groups.len() {
        return Err(AppError::CorruptIndex(format!(
            "corpus '{corpus_id}' artifacts disagree: {} vectors vs {} groups",
            vector_artifact.vectors.len(),
            group_artifact.groups.len()
        )));
    }

    for vector in &vector_artifact.vectors {
        if vector.len() != vector_artifact.dimension {
            return Err(AppError::CorruptIndex(format!(
                "corpus '{corpus_id}' contains a {}-dimensional row in a \
                 dimension-{} artifact",
                vector.len(),
                vector_artifact.dimension
            )));
        }
    }

    if group_artifact.corpus_id != corpus_id {
        warn!(
            requested = corpus_id,
            stored = %group_artifact.corpus_id,
            "persisted corpus id differs from requested id"
        );
    }

    info!(
        corpus_id,
        vectors = vector_artifact.vectors.len(),
        "corpus index loaded"
    );

    Ok(CorpusIndex::from_parts(
        corpus_id.to_owned(),
        vector_artifact.dimension,
        vector_artifact.model_code,
        vector_artifact.vectors,
        group_artifact.groups,
    ))
}

fn write_atomic<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), AppError> {
    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut file, value)?;
    file.persist(dir.join(name))
        .map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

fn read_artifact<T: DeserializeOwned>(corpus_id: &str, path: &Path) -> Result<T, AppError> {
    let file = fs::File::open(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        AppError::CorruptIndex(format!(
            "corpus '{corpus_id}' artifact {} is unreadable: {e}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{types::group::Importance, utils::embedding::EmbeddingProvider};

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

    async fn build_sample(corpus_id: &str, dimension: usize) -> CorpusIndex {
        let embedding = EmbeddingProvider::new_hashed(dimension);
        let groups = vec![group(0, "first text"), group(1, "second text")];
        CorpusIndex::build(corpus_id, groups, &embedding)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_load_round_trip_preserves_queries() {
        let dir = tempfile::tempdir().unwrap();
        let embedding = EmbeddingProvider::new_hashed(24);
        let index = build_sample("gita", 24).await;
        save_index(&index, dir.path()).unwrap();

        let reloaded = load_index("gita", dir.path(), 24).unwrap();
        assert_eq!(reloaded.len(), index.len());

        let query = embedding.embed("first text").await.unwrap();
        let before = index.search(&query, 2).unwrap();
        let after = reloaded.search(&query, 2).unwrap();

        let before_ids: Vec<u64> = before.iter().map(|h| h.group.id).collect();
        let after_ids: Vec<u64> = after.iter().map(|h| h.group.id).collect();
        assert_eq!(before_ids, after_ids);
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a.distance - b.distance).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_load_missing_corpus_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_index("nowhere", dir.path(), 24).unwrap_err();
        assert!(matches!(err, AppError::CorpusNotFound(_)));
    }

    #[tokio::test]
    async fn test_load_lone_artifact_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let index = build_sample("gita", 24).await;
        save_index(&index, dir.path()).unwrap();
        fs::remove_file(dir.path().join(GROUPS_FILE)).unwrap();

        let err = load_index("gita", dir.path(), 24).unwrap_err();
        assert!(matches!(err, AppError::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn test_load_count_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let index = build_sample("gita", 8).await;
        save_index(&index, dir.path()).unwrap();

        // Rewrite the vector artifact with one extra row: 10 vectors
        // against 9 groups must refuse to load.
        let vectors: Vec<Vec<f32>> = (0..10).map(|_| vec![0.0; 8]).collect();
        let groups: Vec<Group> = (0..9).map(|i| group(i, "text")).collect();
        write_atomic(
            dir.path(),
            VECTORS_FILE,
            &VectorArtifact {
                dimension: 8,
                model_code: None,
                vectors,
            },
        )
        .unwrap();
        write_atomic(
            dir.path(),
            GROUPS_FILE,
            &GroupArtifact {
                corpus_id: "gita".into(),
                saved_at: Utc::now(),
                groups,
            },
        )
        .unwrap();

        let err = load_index("gita", dir.path(), 8).unwrap_err();
        match err {
            AppError::CorruptIndex(message) => {
                assert!(message.contains("10 vectors vs 9 groups"));
            }
            other => panic!("expected CorruptIndex, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_dimension_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let index = build_sample("gita", 16).await;
        save_index(&index, dir.path()).unwrap();

        let err = load_index("gita", dir.path(), 32).unwrap_err();
        assert!(matches!(err, AppError::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn test_load_garbage_artifact_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let index = build_sample("gita", 8).await;
        save_index(&index, dir.path()).unwrap();
        fs::write(dir.path().join(VECTORS_FILE), b"not json").unwrap();

        let err = load_index("gita", dir.path(), 8).unwrap_err();
        assert!(matches!(err, AppError::CorruptIndex(_)));
    }
}
