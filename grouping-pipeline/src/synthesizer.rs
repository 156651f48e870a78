use common::{
    error::AppError,
    types::group::Importance,
    utils::generation::TextGenerator,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::FragmentBatch;

pub const GROUPING_TEMPERATURE: f32 = 0.3;

pub const GROUPING_SYSTEM_MESSAGE: &str = "You are an expert at analyzing documents and \
organizing their content into coherent thematic groups. You always answer with a single \
JSON object and nothing else.";

/// One group as the model describes it, before fragment ids are resolved.
/// `fragment_ids` are batch-local preview indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireGroup {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    pub fragment_ids: Vec<usize>,
    #[serde(default)]
    pub importance: Importance,
}

fn default_theme() -> String {
    "general".to_owned()
}

#[derive(Debug, Deserialize)]
struct GroupingResponse {
    groups: Vec<WireGroup>,
}

/// Result of one grouping attempt for one batch.
#[derive(Debug)]
pub enum SynthesisOutcome {
    Parsed(Vec<WireGroup>),
    Fallback { reason: String },
}

pub fn build_grouping_prompt(batch: &FragmentBatch) -> Result<String, AppError> {
    let previews = serde_json::to_string_pretty(&batch.previews)?;
    Ok(format!(
        "Below are {count} numbered text fragments from one document.\n\
         Organize them into between 5 and 15 thematic groups. Every fragment index \
         must appear in exactly one group; never drop or repeat an index.\n\n\
         Fragments:\n{previews}\n\n\
         Respond with exactly this JSON shape:\n\
         {{\n\
         \x20 \"groups\": [\n\
         \x20   {{\n\
         \x20     \"title\": \"short group title\",\n\
         \x20     \"summary\": \"one or two sentence summary\",\n\
         \x20     \"theme\": \"single thematic label\",\n\
         \x20     \"fragment_ids\": [0, 1, 2],\n\
         \x20     \"importance\": \"high | medium | low\"\n\
         \x20   }}\n\
         \x20 ]\n\
         }}",
        count = batch.len(),
    ))
}

/// Best-effort cleanup of common model output defects before JSON parsing:
/// markdown code fences, chatter around the object, trailing commas.
pub fn repair_response(raw: &str) -> String {
    let trimmed = strip_code_fences(raw.trim());
    let bounded = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };
    strip_trailing_commas(bounded)
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map_or(rest, str::trim_end)
}

// Walks the text outside of string literals and drops commas that sit
// directly before a closing bracket.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().copied().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some(']' | '}')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Parses a raw grouping completion and enforces full coverage: the union
/// of `fragment_ids` must be exactly `0..batch_len`, each index once.
pub fn parse_grouping_response(raw: &str, batch_len: usize) -> Result<Vec<WireGroup>, AppError> {
    let repaired = repair_response(raw);
    let response: GroupingResponse = serde_json::from_str(&repaired)
        .map_err(|e| AppError::LLMParsing(format!("grouping response is not valid JSON: {e}")))?;

    if response.groups.is_empty() {
        return Err(AppError::LLMParsing(
            "grouping response contains no groups".into(),
        ));
    }

    validate_coverage(&response.groups, batch_len)?;
    Ok(response.groups)
}

fn validate_coverage(groups: &[WireGroup], batch_len: usize) -> Result<(), AppError> {
    let mut seen = vec![0_usize; batch_len];
    for group in groups {
        for &index in &group.fragment_ids {
            let slot = seen.get_mut(index).ok_or_else(|| {
                AppError::Coverage(format!(
                    "fragment index {index} is out of range for a batch of {batch_len}"
                ))
            })?;
            *slot += 1;
        }
    }

    let duplicated: Vec<usize> = seen
        .iter()
        .enumerate()
        .filter(|(_, &count)| count > 1)
        .map(|(index, _)| index)
        .collect();
    if !duplicated.is_empty() {
        return Err(AppError::Coverage(format!(
            "fragment indexes assigned to more than one group: {duplicated:?}"
        )));
    }

    let missing: Vec<usize> = seen
        .iter()
        .enumerate()
        .filter(|(_, &count)| count == 0)
        .map(|(index, _)| index)
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Coverage(format!(
            "fragment indexes missing from every group: {missing:?}"
        )));
    }

    Ok(())
}

/// Runs exactly one model call for `batch`. Any failure, from transport to
/// coverage, degrades to a fallback marker instead of an error so one bad
/// batch never aborts a whole ingestion run.
pub async fn synthesize_batch(
    generator: &dyn TextGenerator,
    batch: &FragmentBatch,
) -> Result<SynthesisOutcome, AppError> {
    let prompt = build_grouping_prompt(batch)?;

    let raw = match generator
        .generate(&prompt, Some(GROUPING_SYSTEM_MESSAGE), GROUPING_TEMPERATURE)
        .await
    {
        Ok(raw) => raw,
        Err(error) => {
            warn!(offset = batch.offset, %error, "grouping call failed, falling back");
            return Ok(SynthesisOutcome::Fallback {
                reason: error.to_string(),
            });
        }
    };

    match parse_grouping_response(&raw, batch.len()) {
        Ok(groups) => {
            debug!(
                offset = batch.offset,
                groups = groups.len(),
                "grouping batch synthesized"
            );
            Ok(SynthesisOutcome::Parsed(groups))
        }
        Err(error) => {
            warn!(offset = batch.offset, %error, "grouping response rejected, falling back");
            Ok(SynthesisOutcome::Fallback {
                reason: error.to_string(),
            })
        }
    }
}
