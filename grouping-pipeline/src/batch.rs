use common::types::fragment::Fragment;
use serde::Serialize;

/// Condensed view of one fragment as presented to the grouping model.
/// `index` is batch-local and is what the model's `fragment_ids` refer to.
#[derive(Debug, Clone, Serialize)]
pub struct FragmentPreview {
    pub index: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// One slice of the fragment list, sized for a single model call.
#[derive(Debug, Clone)]
pub struct FragmentBatch {
    /// Index of the batch's first fragment in the full fragment list.
    pub offset: usize,
    pub previews: Vec<FragmentPreview>,
}

impl FragmentBatch {
    pub fn len(&self) -> usize {
        self.previews.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previews.is_empty()
    }
}

/// Flattens newlines and truncates on a char boundary.
pub fn preview_text(text: &str, preview_length: usize) -> String {
    let truncated: String = text.chars().take(preview_length).collect();
    truncated.replace('\n', " ").trim().to_owned()
}

/// Splits fragments into contiguous batches of at most `batch_size`,
/// preserving input order. A zero `batch_size` is treated as one.
pub fn split_into_batches(
    fragments: &[Fragment],
    batch_size: usize,
    preview_length: usize,
) -> Vec<FragmentBatch> {
    let batch_size = batch_size.max(1);
    fragments
        .chunks(batch_size)
        .enumerate()
        .map(|(batch_ix, chunk)| FragmentBatch {
            offset: batch_ix * batch_size,
            previews: chunk
                .iter()
                .enumerate()
                .map(|(local_ix, fragment)| FragmentPreview {
                    index: local_ix,
                    text: preview_text(&fragment.text, preview_length),
                    page: fragment.page,
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments(count: usize) -> Vec<Fragment> {
        (0..count)
            .map(|i| Fragment::new(format!("frag-{i}"), format!("fragment text {i}")))
            .collect()
    }

    #[test]
    fn test_split_sizes_and_offsets() {
        let batches = split_into_batches(&fragments(120), 50, 120);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 50);
        assert_eq!(batches[1].len(), 50);
        assert_eq!(batches[2].len(), 20);
        assert_eq!(batches[0].offset, 0);
        assert_eq!(batches[1].offset, 50);
        assert_eq!(batches[2].offset, 100);
    }

    #[test]
    fn test_split_indices_are_batch_local() {
        let batches = split_into_batches(&fragments(7), 3, 120);
        assert_eq!(batches[2].previews[0].index, 0);
        assert_eq!(batches[2].offset, 6);
    }

    #[test]
    fn test_zero_batch_size_treated_as_one() {
        let batches = split_into_batches(&fragments(3), 0, 120);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let text = "åäö".repeat(100);
        let preview = preview_text(&text, 10);
        assert_eq!(preview.chars().count(), 10);
    }

    #[test]
    fn test_preview_flattens_newlines() {
        assert_eq!(preview_text("line one\nline two\n", 120), "line one line two");
    }

    #[test]
    fn test_split_empty_input() {
        assert!(split_into_batches(&[], 30, 120).is_empty());
    }
}
