use common::types::conversation::SourceRef;
use corpus_index::ScoredGroup;

pub const ANSWER_TEMPERATURE: f32 = 0.7;

/// Characters of representative text carried on each citation.
const SOURCE_PREVIEW_CHARS: usize = 300;

const CONTEXT_SEPARATOR_WIDTH: usize = 80;

pub const QA_SYSTEM_PROMPT: &str = "You are a knowledgeable assistant answering questions \
about a body of text. Ground every answer in the provided excerpts. When the excerpts do \
not contain the answer, say so plainly instead of speculating. Mention group titles or \
page numbers when they help the reader find the passage.";

pub const NO_RESULTS_ANSWER: &str = "No relevant information found for your question.";

/// Renders retrieved groups into the context block of an answer prompt.
pub fn format_context(hits: &[ScoredGroup]) -> String {
    let separator = "=".repeat(CONTEXT_SEPARATOR_WIDTH);
    let sections: Vec<String> = hits
        .iter()
        .map(|hit| {
            let mut lines = vec![format!("[Group {}: {}]", hit.group.id, hit.group.title)];
            lines.push(format!("Theme: {}", hit.group.theme));
            if !hit.group.pages.is_empty() {
                let pages: Vec<String> =
                    hit.group.pages.iter().map(ToString::to_string).collect();
                lines.push(format!("Pages: {}", pages.join(", ")));
            }
            lines.push(String::new());
            lines.push(hit.group.representative_text.clone());
            lines.join("\n")
        })
        .collect();
    sections.join(&format!("\n{separator}\n"))
}

pub fn build_qa_prompt(question: &str, hits: &[ScoredGroup]) -> String {
    format!(
        "Excerpts from the text:\n\n{context}\n\nQuestion: {question}\n\n\
         Answer the question using the excerpts above.",
        context = format_context(hits),
    )
}

/// Citation metadata for the retrieved groups, in retrieval order.
pub fn source_refs(hits: &[ScoredGroup]) -> Vec<SourceRef> {
    hits.iter()
        .map(|hit| SourceRef {
            group_id: hit.group.id,
            title: hit.group.title.clone(),
            theme: hit.group.theme.clone(),
            summary: hit.group.summary.clone(),
            pages: hit.group.pages.clone(),
            distance: hit.distance,
            score: hit.score,
            preview: preview(&hit.group.representative_text),
        })
        .collect()
}

fn preview(text: &str) -> String {
    text.chars()
        .take(SOURCE_PREVIEW_CHARS)
        .collect::<String>()
        .replace('\n', " ")
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::group::{Group, Importance};

    fn hit(id: u64, title: &str, text: &str, pages: Vec<u32>) -> ScoredGroup {
        ScoredGroup {
            group: Group {
                id,
                title: title.into(),
                theme: "duty".into(),
                summary: "a summary".into(),
                member_fragment_ids: vec!["frag-0".into()],
                representative_text: text.into(),
                pages,
                importance: Importance::Medium,
            },
            distance: 0.5,
            score: 1.0 / 1.5,
        }
    }

    #[test]
    fn test_format_context_structure() {
        let hits = vec![
            hit(0, "Action", "do your duty", vec![12, 13]),
            hit(1, "Devotion", "surrender to the divine", vec![]),
        ];
        let context = format_context(&hits);

        assert!(context.contains("[Group 0: Action]"));
        assert!(context.contains("Theme: duty"));
        assert!(context.contains("Pages: 12, 13"));
        assert!(context.contains("[Group 1: Devotion]"));
        assert!(!context.contains("Pages: \n"));
        assert!(context.contains(&"=".repeat(80)));
    }

    #[test]
    fn test_qa_prompt_contains_question_and_context() {
        let hits = vec![hit(0, "Action", "do your duty", vec![])];
        let prompt = build_qa_prompt("what is karma yoga?", &hits);
        assert!(prompt.contains("what is karma yoga?"));
        assert!(prompt.contains("do your duty"));
    }

    #[test]
    fn test_source_refs_preview_is_bounded() {
        let long_text = "word ".repeat(200);
        let hits = vec![hit(3, "Long", &long_text, vec![7])];
        let sources = source_refs(&hits);

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].group_id, 3);
        assert_eq!(sources[0].pages, vec![7]);
        assert!(sources[0].preview.chars().count() <= 300);
        assert!((sources[0].score - 1.0 / 1.5).abs() < 1e-6);
    }
}
