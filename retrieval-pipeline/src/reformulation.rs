use common::{types::conversation::ConversationState, utils::generation::TextGenerator};
use tracing::{debug, warn};

pub const REFORMULATION_TEMPERATURE: f32 = 0.3;

const REFORMULATION_SYSTEM: &str = "You rewrite follow-up questions so they stand alone \
without the conversation. Respond with the rewritten question and nothing else. If the \
question already stands alone, repeat it unchanged.";

pub fn build_reformulation_prompt(question: &str, context: &str) -> String {
    format!(
        "Recent conversation:\n{context}\n\n\
         Follow-up question: {question}\n\n\
         Rewrite the follow-up question so it can be understood without the conversation."
    )
}

/// Rewrites a follow-up question against recent history. Best effort: any
/// failure or unusable completion falls back to the original question by
/// returning `None`, so retrieval proceeds either way.
pub async fn reformulate(
    generator: &dyn TextGenerator,
    question: &str,
    history: &ConversationState,
    window: usize,
) -> Option<String> {
    if history.is_empty() {
        return None;
    }

    let context = history.context_window(window);
    let prompt = build_reformulation_prompt(question, &context);

    let raw = match generator
        .generate(&prompt, Some(REFORMULATION_SYSTEM), REFORMULATION_TEMPERATURE)
        .await
    {
        Ok(raw) => raw,
        Err(error) => {
            warn!(%error, "question reformulation failed, using original");
            return None;
        }
    };

    let rewritten = raw.trim().trim_matches('"').trim();
    if rewritten.is_empty() || rewritten == question {
        return None;
    }

    debug!(original = question, rewritten, "question reformulated");
    Some(rewritten.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{error::AppError, types::conversation::Exchange};

    struct CannedGenerator(Result<String, String>);

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _system: Option<&str>,
            _temperature: f32,
        ) -> Result<String, AppError> {
            self.0
                .clone()
                .map_err(AppError::Generation)
        }
    }

    fn history_with_one_turn() -> ConversationState {
        let mut state = ConversationState::default();
        state.add_exchange(Exchange::new(
            "what is dharma?",
            "dharma is righteous duty",
            Vec::new(),
        ));
        state
    }

    #[tokio::test]
    async fn test_no_history_skips_reformulation() {
        let generator = CannedGenerator(Ok("rewritten".into()));
        let state = ConversationState::default();
        assert!(reformulate(&generator, "and then?", &state, 3).await.is_none());
    }

    #[tokio::test]
    async fn test_rewritten_question_is_returned() {
        let generator = CannedGenerator(Ok("  \"what follows from dharma?\"  ".into()));
        let state = history_with_one_turn();
        let rewritten = reformulate(&generator, "and then?", &state, 3).await;
        assert_eq!(rewritten.as_deref(), Some("what follows from dharma?"));
    }

    #[tokio::test]
    async fn test_generation_error_falls_back() {
        let generator = CannedGenerator(Err("upstream down".into()));
        let state = history_with_one_turn();
        assert!(reformulate(&generator, "and then?", &state, 3).await.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_question_is_not_reported() {
        let generator = CannedGenerator(Ok("and then?".into()));
        let state = history_with_one_turn();
        assert!(reformulate(&generator, "and then?", &state, 3).await.is_none());
    }

    #[test]
    fn test_prompt_contains_history_and_question() {
        let state = history_with_one_turn();
        let prompt = build_reformulation_prompt("and then?", &state.context_window(3));
        assert!(prompt.contains("Q: what is dharma?"));
        assert!(prompt.contains("Follow-up question: and then?"));
    }
}
