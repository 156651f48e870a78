use std::cmp::Ordering;

use common::{error::AppError, types::group::Group, utils::embedding::EmbeddingProvider};
use tracing::{debug, info};

use crate::scoring::{distance_to_similarity, l2_distance};

/// One group hit from a similarity search.
#[derive(Debug, Clone)]
pub struct ScoredGroup {
    pub group: Group,
    pub distance: f32,
    pub score: f32,
}

/// Flat exact-scan similarity index over one corpus's groups. Immutable
/// after construction; re-ingestion replaces the whole index. Concurrent
/// reads are safe because nothing here ever mutates.
#[derive(Debug)]
pub struct CorpusIndex {
    corpus_id: String,
    dimension: usize,
    model_code: Option<String>,
    vectors: Vec<Vec<f32>>,
    groups: Vec<Group>,
}

impl CorpusIndex {
    /// Embeds each group's representative text and builds a fresh index.
    /// Any embedding failure aborts the whole build; no partial index is
    /// ever returned.
    pub async fn build(
        corpus_id: &str,
        groups: Vec<Group>,
        embedding: &EmbeddingProvider,
    ) -> Result<Self, AppError> {
        if groups.is_empty() {
            return Err(AppError::Validation(
                "cannot build an index from an empty group list".into(),
            ));
        }

        let texts: Vec<String> = groups
            .iter()
            .map(|group| group.representative_text.clone())
            .collect();
        let vectors = embedding.embed_batch(texts).await?;

        if vectors.len() != groups.len() {
            return Err(AppError::Embedding(format!(
                "embedding backend returned {} vectors for {} groups",
                vectors.len(),
                groups.len()
            )));
        }

        let dimension = embedding.dimension();
        for vector in &vectors {
            if vector.len() != dimension {
                return Err(AppError::Embedding(format!(
                    "embedding backend returned a {}-dimensional vector, expected {dimension}",
                    vector.len()
                )));
            }
        }

        info!(
            corpus_id,
            vectors = vectors.len(),
            dimension,
            "corpus index created"
        );

        Ok(Self {
            corpus_id: corpus_id.to_owned(),
            dimension,
            model_code: embedding.model_code(),
            vectors,
            groups,
        })
    }

    pub(crate) fn from_parts(
        corpus_id: String,
        dimension: usize,
        model_code: Option<String>,
        vectors: Vec<Vec<f32>>,
        groups: Vec<Group>,
    ) -> Self {
        Self {
            corpus_id,
            dimension,
            model_code,
            vectors,
            groups,
        }
    }

    pub fn corpus_id(&self) -> &str {
        &self.corpus_id
    }

    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_code(&self) -> Option<&str> {
        self.model_code.as_deref()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub(crate) fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Returns the `k` nearest groups by L2 distance, ascending. Ties are
    /// broken by ascending group id so results are reproducible. `k` larger
    /// than the corpus truncates to corpus size.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredGroup>, AppError> {
        if k == 0 {
            return Err(AppError::InvalidK(k));
        }
        if query.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "query vector has dimension {}, index expects {}",
                query.len(),
                self.dimension
            )));
        }

        let mut hits: Vec<(f32, &Group)> = self
            .vectors
            .iter()
            .zip(self.groups.iter())
            .map(|(vector, group)| (l2_distance(query, vector), group))
            .collect();

        hits.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        hits.truncate(k);

        debug!(
            corpus_id = %self.corpus_id,
            k,
            results = hits.len(),
            "similarity search completed"
        );

        Ok(hits
            .into_iter()
            .map(|(distance, group)| ScoredGroup {
                group: group.clone(),
                distance,
                score: distance_to_similarity(distance),
            })
            .collect())
    }
}
