use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default bound on retained exchanges per conversation.
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Characters of each past answer included in reformulation context.
const CONTEXT_ANSWER_CHARS: usize = 200;

/// Citation metadata for one retrieved group, attached to answers and
/// stored alongside the exchange that used it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub group_id: u64,
    pub title: String,
    pub theme: String,
    pub summary: String,
    pub pages: Vec<u32>,
    pub distance: f32,
    pub score: f32,
    pub preview: String,
}

/// One question/answer turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        sources: Vec<SourceRef>,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            sources,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded FIFO of recent exchanges for one corpus-query-session. An
/// explicit value type passed into orchestrator calls, never ambient
/// per-thread state, so concurrent multi-corpus queries cannot cross-talk.
#[derive(Debug, Clone)]
pub struct ConversationState {
    history: VecDeque<Exchange>,
    max_history: usize,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl ConversationState {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: VecDeque::new(),
            max_history: max_history.max(1),
        }
    }

    /// Appends an exchange, evicting the oldest once the bound is reached.
    pub fn add_exchange(&mut self, exchange: Exchange) {
        self.history.push_back(exchange);
        while self.history.len() > self.max_history {
            if let Some(removed) = self.history.pop_front() {
                tracing::debug!(
                    question = %truncate_chars(&removed.question, 50),
                    "evicted oldest exchange from history"
                );
            }
        }
    }

    /// Returns the most recent exchanges, oldest first. `None` returns the
    /// full retained history.
    pub fn get_history(&self, last_n: Option<usize>) -> Vec<Exchange> {
        let take = last_n.unwrap_or(self.history.len()).min(self.history.len());
        self.history
            .iter()
            .skip(self.history.len().saturating_sub(take))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        let count = self.history.len();
        self.history.clear();
        tracing::debug!(removed = count, "conversation history cleared");
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub const fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn last_question(&self) -> Option<&str> {
        self.history.back().map(|e| e.question.as_str())
    }

    pub fn last_answer(&self) -> Option<&str> {
        self.history.back().map(|e| e.answer.as_str())
    }

    /// Compact `Q:`/`A:` rendering of the last `last_n` exchanges for query
    /// reformulation; answers are truncated to keep the prompt small.
    /// Empty when there is no history.
    pub fn context_window(&self, last_n: usize) -> String {
        let mut parts = Vec::new();
        for exchange in self.get_history(Some(last_n)) {
            parts.push(format!("Q: {}", exchange.question));
            let mut answer = truncate_chars(&exchange.answer, CONTEXT_ANSWER_CHARS);
            if answer.len() < exchange.answer.len() {
                answer.push_str("...");
            }
            parts.push(format!("A: {answer}"));
        }
        parts.join("\n")
    }

    /// Full-text rendering of recent exchanges for inclusion in answer
    /// prompts.
    pub fn history_text(&self, last_n: usize) -> String {
        let history = self.get_history(Some(last_n));
        if history.is_empty() {
            return "No previous conversation.".to_owned();
        }

        let mut lines = vec!["Previous conversation:".to_owned()];
        for exchange in history {
            lines.push(format!("\nUser: {}", exchange.question));
            lines.push(format!("Assistant: {}", exchange.answer));
        }
        lines.join("\n")
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(question: &str, answer: &str) -> Exchange {
        Exchange::new(question, answer, Vec::new())
    }

    #[test]
    fn test_bounded_fifo_evicts_oldest() {
        let mut state = ConversationState::new(3);
        for i in 0..5 {
            state.add_exchange(exchange(&format!("q{i}"), &format!("a{i}")));
        }

        assert_eq!(state.len(), 3);
        let history = state.get_history(None);
        let questions: Vec<&str> = history.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_get_history_last_n() {
        let mut state = ConversationState::default();
        for i in 0..4 {
            state.add_exchange(exchange(&format!("q{i}"), "a"));
        }

        let recent = state.get_history(Some(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question, "q2");
        assert_eq!(recent[1].question, "q3");

        // Asking for more than retained returns everything
        assert_eq!(state.get_history(Some(100)).len(), 4);
    }

    #[test]
    fn test_zero_bound_is_clamped() {
        let mut state = ConversationState::new(0);
        state.add_exchange(exchange("q", "a"));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_clear_empties_history() {
        let mut state = ConversationState::default();
        state.add_exchange(exchange("q", "a"));
        state.clear();
        assert!(state.is_empty());
        assert!(state.last_question().is_none());
    }

    #[test]
    fn test_context_window_truncates_answers() {
        let mut state = ConversationState::default();
        let long_answer = "x".repeat(300);
        state.add_exchange(exchange("what is dharma?", &long_answer));

        let context = state.context_window(3);
        assert!(context.starts_with("Q: what is dharma?"));
        assert!(context.contains("..."));
        // 200 answer chars plus the ellipsis marker
        let answer_line = context
            .lines()
            .find(|line| line.starts_with("A: "))
            .unwrap();
        assert_eq!(answer_line.chars().count(), 3 + 200 + 3);
    }

    #[test]
    fn test_context_window_empty_without_history() {
        let state = ConversationState::default();
        assert!(state.context_window(3).is_empty());
    }

    #[test]
    fn test_history_text_placeholder_when_empty() {
        let state = ConversationState::default();
        assert_eq!(state.history_text(3), "No previous conversation.");
    }
}
