use std::{collections::BTreeMap, sync::Arc};

use common::{
    error::AppError,
    types::conversation::{Exchange, SourceRef},
    utils::{config::AppConfig, generation::TextGenerator},
};
use corpus_index::IndexRegistry;
use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::{
    answer::{build_qa_prompt, source_refs, ANSWER_TEMPERATURE, NO_RESULTS_ANSWER, QA_SYSTEM_PROMPT},
    conversation::ConversationStore,
    reformulation::reformulate,
};

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Exchanges fed to question reformulation.
    pub reformulation_window: usize,
    /// Exchanges included verbatim in the answer prompt.
    pub history_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            reformulation_window: 3,
            history_window: 3,
        }
    }
}

impl RetrievalConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.top_k_results,
            ..Self::default()
        }
    }
}

/// One corpus's reply to a question.
#[derive(Debug, Clone)]
pub struct CorpusAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// Present when the question was rewritten against history before
    /// retrieval.
    pub reformulated_question: Option<String>,
}

/// Answers questions against one or more corpora, with per-corpus
/// conversation history. Corpora are queried concurrently and failures are
/// isolated: one broken corpus yields an error entry for itself and
/// nothing else.
pub struct RetrievalPipeline {
    registry: Arc<IndexRegistry>,
    generator: Arc<dyn TextGenerator>,
    conversations: ConversationStore,
    config: RetrievalConfig,
}

impl RetrievalPipeline {
    pub fn new(
        registry: Arc<IndexRegistry>,
        generator: Arc<dyn TextGenerator>,
        max_history: usize,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            registry,
            generator,
            conversations: ConversationStore::new(max_history),
            config,
        }
    }

    /// Fans `question` out to every corpus in `corpus_ids` concurrently.
    /// `k` overrides the configured result count; `use_context` enables
    /// history-aware reformulation and answer prompting.
    #[instrument(level = "debug", skip(self, corpus_ids), fields(corpora = corpus_ids.len()))]
    pub async fn query_multiple(
        &self,
        question: &str,
        corpus_ids: &[String],
        k: Option<usize>,
        use_context: bool,
    ) -> BTreeMap<String, Result<CorpusAnswer, AppError>> {
        let k = k.unwrap_or(self.config.top_k);

        let queries = corpus_ids.iter().map(|corpus_id| async move {
            let result = self.query_corpus(corpus_id, question, k, use_context).await;
            if let Err(error) = &result {
                warn!(corpus_id = %corpus_id, %error, "corpus query failed");
            }
            (corpus_id.clone(), result)
        });

        let results: BTreeMap<String, Result<CorpusAnswer, AppError>> =
            join_all(queries).await.into_iter().collect();

        info!(
            corpora = results.len(),
            failed = results.values().filter(|r| r.is_err()).count(),
            "multi-corpus query completed"
        );
        results
    }

    async fn query_corpus(
        &self,
        corpus_id: &str,
        question: &str,
        k: usize,
        use_context: bool,
    ) -> Result<CorpusAnswer, AppError> {
        if k == 0 {
            return Err(AppError::InvalidK(k));
        }

        let history = self.conversations.snapshot(corpus_id).await;
        let reformulated = if use_context {
            reformulate(
                self.generator.as_ref(),
                question,
                &history,
                self.config.reformulation_window,
            )
            .await
        } else {
            None
        };
        let effective_question = reformulated.as_deref().unwrap_or(question);

        let index = self.registry.get_or_load(corpus_id).await?;
        let query_vector = self.registry.embedding().embed(effective_question).await?;
        let hits = index.search(&query_vector, k)?;

        if hits.is_empty() {
            return Ok(CorpusAnswer {
                answer: NO_RESULTS_ANSWER.to_owned(),
                sources: Vec::new(),
                reformulated_question: reformulated,
            });
        }

        let prompt = build_qa_prompt(effective_question, &hits);
        let system = if use_context {
            format!(
                "{QA_SYSTEM_PROMPT}\n\n{}",
                history.history_text(self.config.history_window)
            )
        } else {
            QA_SYSTEM_PROMPT.to_owned()
        };
        let answer = self
            .generator
            .generate(&prompt, Some(&system), ANSWER_TEMPERATURE)
            .await?;

        let sources = source_refs(&hits);
        self.conversations
            .record(
                corpus_id,
                Exchange::new(question, answer.clone(), sources.clone()),
            )
            .await;

        Ok(CorpusAnswer {
            answer,
            sources,
            reformulated_question: reformulated,
        })
    }

    /// Clears one corpus's conversation, or all of them.
    pub async fn clear_conversation(&self, corpus_id: Option<&str>) -> usize {
        self.conversations.clear(corpus_id).await
    }

    pub async fn conversation_history(&self, corpus_id: &str) -> Vec<Exchange> {
        self.conversations.history(corpus_id, None).await
    }
}
