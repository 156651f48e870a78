use std::sync::Arc;

use common::{
    error::AppError,
    types::{fragment::Fragment, group::Group, group::Importance},
    utils::{config::AppConfig, generation::TextGenerator},
};
use corpus_index::IndexRegistry;
use state_machines::core::GuardError;
use tracing::{info, instrument, warn};

use crate::{
    batch::{split_into_batches, FragmentBatch},
    state,
    synthesizer::{synthesize_batch, SynthesisOutcome, WireGroup},
};

const REPRESENTATIVE_SEPARATOR: &str = "\n\n---\n\n";
const FALLBACK_TITLE_CHARS: usize = 60;
const FALLBACK_THEME: &str = "general";

#[derive(Debug, Clone)]
pub struct GroupingConfig {
    pub batch_size: usize,
    pub preview_length: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            preview_length: 120,
        }
    }
}

impl GroupingConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.grouping_batch_size,
            preview_length: config.grouping_preview_length,
        }
    }
}

/// Counters for one grouping run, for operator-facing summaries.
#[derive(Debug, Clone, Default)]
pub struct GroupingReport {
    pub fragments_total: usize,
    pub groups_created: usize,
    pub batches_total: usize,
    pub batches_fallen_back: usize,
}

/// Splits a corpus's fragments into batches, asks the model to organize
/// each batch into thematic groups, and degrades failed batches to
/// singleton groups so every fragment always lands in exactly one group.
pub struct GroupingPipeline {
    generator: Arc<dyn TextGenerator>,
    config: GroupingConfig,
}

impl GroupingPipeline {
    pub fn new(generator: Arc<dyn TextGenerator>, config: GroupingConfig) -> Self {
        Self { generator, config }
    }

    /// Groups `fragments` into a flat list with run-unique, monotonically
    /// increasing group ids. Batches are processed in order; a batch that
    /// falls back contributes one singleton group per fragment.
    #[instrument(level = "debug", skip_all, fields(fragments = fragments.len()))]
    pub async fn group_fragments(
        &self,
        fragments: &[Fragment],
    ) -> Result<(Vec<Group>, GroupingReport), AppError> {
        if fragments.is_empty() {
            return Err(AppError::Validation(
                "cannot group an empty fragment list".into(),
            ));
        }

        let batches =
            split_into_batches(fragments, self.config.batch_size, self.config.preview_length);
        let mut report = GroupingReport {
            fragments_total: fragments.len(),
            batches_total: batches.len(),
            ..GroupingReport::default()
        };

        let mut groups = Vec::new();
        let mut next_id: u64 = 0;

        for batch in &batches {
            let machine = state::pending()
                .dispatch()
                .map_err(|(_, guard)| map_guard_error("dispatch", &guard))?;

            match synthesize_batch(self.generator.as_ref(), batch).await? {
                SynthesisOutcome::Parsed(wire_groups) => {
                    for wire in wire_groups {
                        groups.push(realize_group(next_id, wire, batch, fragments)?);
                        next_id += 1;
                    }
                    machine
                        .complete()
                        .map_err(|(_, guard)| map_guard_error("complete", &guard))?;
                }
                SynthesisOutcome::Fallback { reason } => {
                    warn!(
                        offset = batch.offset,
                        fragments = batch.len(),
                        %reason,
                        "batch degraded to singleton groups"
                    );
                    for local in 0..batch.len() {
                        groups.push(singleton_group(next_id, batch, local, fragments)?);
                        next_id += 1;
                    }
                    report.batches_fallen_back += 1;
                    machine
                        .fall_back()
                        .map_err(|(_, guard)| map_guard_error("fall_back", &guard))?;
                }
            }
        }

        report.groups_created = groups.len();
        info!(
            fragments = report.fragments_total,
            groups = report.groups_created,
            batches = report.batches_total,
            fallen_back = report.batches_fallen_back,
            "grouping run completed"
        );
        Ok((groups, report))
    }
}

/// Resolves a model-described group against the full fragment list,
/// mapping batch-local indices back to global fragment ids.
fn realize_group(
    id: u64,
    wire: WireGroup,
    batch: &FragmentBatch,
    fragments: &[Fragment],
) -> Result<Group, AppError> {
    let mut member_ids = Vec::with_capacity(wire.fragment_ids.len());
    let mut texts = Vec::with_capacity(wire.fragment_ids.len());
    let mut pages = Vec::new();

    for local in wire.fragment_ids {
        let fragment = fragments.get(batch.offset + local).ok_or_else(|| {
            AppError::Internal(format!(
                "validated fragment index {local} missing at batch offset {}",
                batch.offset
            ))
        })?;
        member_ids.push(fragment.id.clone());
        texts.push(fragment.text.as_str());
        if let Some(page) = fragment.page {
            pages.push(page);
        }
    }
    pages.sort_unstable();
    pages.dedup();

    Ok(Group {
        id,
        title: wire.title,
        theme: wire.theme,
        summary: wire.summary,
        member_fragment_ids: member_ids,
        representative_text: texts.join(REPRESENTATIVE_SEPARATOR),
        pages,
        importance: wire.importance,
    })
}

fn singleton_group(
    id: u64,
    batch: &FragmentBatch,
    local: usize,
    fragments: &[Fragment],
) -> Result<Group, AppError> {
    let fragment = fragments.get(batch.offset + local).ok_or_else(|| {
        AppError::Internal(format!(
            "fallback fragment index {local} missing at batch offset {}",
            batch.offset
        ))
    })?;
    let preview = &batch.previews[local].text;

    Ok(Group {
        id,
        title: preview.chars().take(FALLBACK_TITLE_CHARS).collect(),
        theme: FALLBACK_THEME.to_owned(),
        summary: String::new(),
        member_fragment_ids: vec![fragment.id.clone()],
        representative_text: fragment.text.clone(),
        pages: fragment.page.into_iter().collect(),
        importance: Importance::default(),
    })
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::Internal(format!(
        "invalid grouping batch transition during {event}: {guard:?}"
    ))
}

/// Full ingestion of one corpus: group, index, persist. The index only
/// becomes resident and on-disk once every step has succeeded.
pub async fn ingest_corpus(
    pipeline: &GroupingPipeline,
    registry: &IndexRegistry,
    corpus_id: &str,
    fragments: &[Fragment],
) -> Result<GroupingReport, AppError> {
    let (groups, report) = pipeline.group_fragments(fragments).await?;
    registry.create(corpus_id, groups).await?;
    registry.save(corpus_id).await?;
    info!(
        corpus_id,
        groups = report.groups_created,
        "corpus ingested and persisted"
    );
    Ok(report)
}
