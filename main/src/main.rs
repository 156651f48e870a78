use std::sync::Arc;

use common::{
    types::fragment::Fragment,
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
        generation::{OpenAiGenerator, TextGenerator},
    },
};
use corpus_index::IndexRegistry;
use grouping_pipeline::{ingest_corpus, GroupingConfig, GroupingPipeline};
use retrieval_pipeline::{CorpusAnswer, RetrievalConfig, RetrievalPipeline};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Fragment as it appears in an input file; ids are optional and filled in
/// on load.
#[derive(Deserialize)]
struct FragmentInput {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    position: Option<usize>,
}

const USAGE: &str = "usage:
  lectern ingest <corpus_id> <fragments.json>   group and index a corpus
  lectern ask <corpus_ids> <question>           one-shot query (comma-separated ids)
  lectern chat <corpus_ids>                     interactive session with history
  lectern list                                  list persisted corpora";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = Arc::new(EmbeddingProvider::from_config(
        &config,
        openai_client.clone(),
    ));
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "embedding provider initialized"
    );

    let generator: Arc<dyn TextGenerator> =
        Arc::new(OpenAiGenerator::from_config(&config, openai_client));
    let registry = Arc::new(IndexRegistry::new(
        config.data_dir.clone(),
        embedding_provider,
    ));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("ingest") => {
            let [_, corpus_id, path] = args.as_slice() else {
                return Err(USAGE.into());
            };
            ingest(&config, generator, &registry, corpus_id, path).await?;
        }
        Some("ask") => {
            let [_, corpus_ids, question] = args.as_slice() else {
                return Err(USAGE.into());
            };
            let pipeline = retrieval(&config, registry, generator);
            let results = pipeline
                .query_multiple(question, &parse_corpus_ids(corpus_ids), None, false)
                .await;
            for (corpus_id, result) in results {
                print_result(&corpus_id, &result);
            }
        }
        Some("chat") => {
            let [_, corpus_ids] = args.as_slice() else {
                return Err(USAGE.into());
            };
            let pipeline = retrieval(&config, registry, generator);
            chat(&pipeline, &parse_corpus_ids(corpus_ids)).await?;
        }
        Some("list") => {
            for corpus_id in registry.persisted_corpora()? {
                println!("{corpus_id}");
            }
        }
        _ => return Err(USAGE.into()),
    }

    Ok(())
}

fn retrieval(
    config: &AppConfig,
    registry: Arc<IndexRegistry>,
    generator: Arc<dyn TextGenerator>,
) -> RetrievalPipeline {
    RetrievalPipeline::new(
        registry,
        generator,
        config.max_history,
        RetrievalConfig::from_config(config),
    )
}

fn parse_corpus_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect()
}

async fn ingest(
    config: &AppConfig,
    generator: Arc<dyn TextGenerator>,
    registry: &IndexRegistry,
    corpus_id: &str,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let inputs: Vec<FragmentInput> = serde_json::from_str(&raw)?;
    let fragments: Vec<Fragment> = inputs
        .into_iter()
        .map(|input| Fragment {
            id: input.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            text: input.text,
            page: input.page,
            position: input.position,
        })
        .collect();

    let pipeline = GroupingPipeline::new(generator, GroupingConfig::from_config(config));
    let report = ingest_corpus(&pipeline, registry, corpus_id, &fragments).await?;

    println!(
        "ingested '{corpus_id}': {} fragments into {} groups ({} of {} batches degraded)",
        report.fragments_total,
        report.groups_created,
        report.batches_fallen_back,
        report.batches_total,
    );
    Ok(())
}

/// Interactive loop with per-corpus conversation history. `/clear` resets
/// every history, `/quit` exits.
async fn chat(
    pipeline: &RetrievalPipeline,
    corpus_ids: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("chatting with: {}", corpus_ids.join(", "));
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                let cleared = pipeline.clear_conversation(None).await;
                println!("cleared {cleared} conversation(s)");
                continue;
            }
            _ => {}
        }

        let results = pipeline
            .query_multiple(question, corpus_ids, None, true)
            .await;
        for (corpus_id, result) in results {
            print_result(&corpus_id, &result);
        }
    }
    Ok(())
}

fn print_result(corpus_id: &str, result: &Result<CorpusAnswer, common::error::AppError>) {
    println!("=== {corpus_id} ===");
    match result {
        Ok(answer) => {
            if let Some(rewritten) = &answer.reformulated_question {
                println!("(interpreted as: {rewritten})");
            }
            println!("{}\n", answer.answer);
            for source in &answer.sources {
                println!(
                    "  [{}] {} (score {:.3}) pages {:?}",
                    source.group_id, source.title, source.score, source.pages
                );
            }
        }
        Err(error) => println!("error: {error}"),
    }
    println!();
}
