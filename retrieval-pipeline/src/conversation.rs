use std::collections::HashMap;

use common::types::conversation::{ConversationState, Exchange};
use tokio::sync::Mutex;
use tracing::debug;

/// Conversation histories keyed by corpus id. Each corpus gets its own
/// bounded history, so follow-up questions against one corpus never leak
/// context into another.
pub struct ConversationStore {
    max_history: usize,
    states: Mutex<HashMap<String, ConversationState>>,
}

impl ConversationStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Point-in-time copy of one corpus's history; empty state when the
    /// corpus has never been queried. Callers work against the copy so the
    /// lock is never held across model calls.
    pub async fn snapshot(&self, corpus_id: &str) -> ConversationState {
        self.states
            .lock()
            .await
            .get(corpus_id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(self.max_history))
    }

    pub async fn record(&self, corpus_id: &str, exchange: Exchange) {
        let mut states = self.states.lock().await;
        states
            .entry(corpus_id.to_owned())
            .or_insert_with(|| ConversationState::new(self.max_history))
            .add_exchange(exchange);
    }

    /// Clears one corpus's history, or every history when `corpus_id` is
    /// `None`. Returns the number of conversations affected.
    pub async fn clear(&self, corpus_id: Option<&str>) -> usize {
        let mut states = self.states.lock().await;
        let cleared = match corpus_id {
            Some(corpus_id) => usize::from(states.remove(corpus_id).is_some()),
            None => {
                let count = states.len();
                states.clear();
                count
            }
        };
        debug!(corpus_id = corpus_id.unwrap_or("*"), cleared, "conversation history cleared");
        cleared
    }

    pub async fn history(&self, corpus_id: &str, last_n: Option<usize>) -> Vec<Exchange> {
        self.states
            .lock()
            .await
            .get(corpus_id)
            .map(|state| state.get_history(last_n))
            .unwrap_or_default()
    }
}
