use serde::{Deserialize, Serialize};

/// Importance rating the grouping model assigns to a knowledge group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    #[default]
    Medium,
    Low,
}

/// A synthesized cluster of fragments, the unit actually indexed for
/// retrieval. Group ids are unique and monotonically non-decreasing within
/// one orchestrated grouping run; `member_fragment_ids` reference the
/// global fragment id namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub title: String,
    pub theme: String,
    pub summary: String,
    pub member_fragment_ids: Vec<String>,
    /// Concatenated member fragment text; this is what gets embedded.
    pub representative_text: String,
    #[serde(default)]
    pub pages: Vec<u32>,
    #[serde(default)]
    pub importance: Importance,
}

impl Group {
    pub fn member_count(&self) -> usize {
        self.member_fragment_ids.len()
    }
}
