//! One-shot CLI runner: upload a text file, run the full pipeline in the
//! foreground, and report the outcome. Useful for scripting and smoke tests
//! without the HTTP server.

use anyhow::{Context, bail};
use clap::Parser;
use dataforge::llm::{GenerationConfig, ProviderKind, ProviderSettings};
use dataforge::pipeline::PipelineRunner;
use dataforge::processing::PipelineSettings;
use dataforge::project::ProjectStore;
use dataforge::state::RunState;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "run-pipeline", about = "Run the dataset pipeline once for a project")]
struct Args {
    /// Projects root directory.
    #[arg(long, default_value = "projects")]
    root: PathBuf,

    /// Project name (created if missing).
    #[arg(long)]
    project: String,

    /// Input text file to upload as the project's raw text.
    #[arg(long)]
    input: PathBuf,

    /// Token budget per chunk.
    #[arg(long, default_value_t = 800)]
    chunk_size: usize,

    /// Token overlap between consecutive chunks.
    #[arg(long, default_value_t = 100)]
    chunk_overlap: usize,

    /// Cosine-similarity merge threshold.
    #[arg(long, default_value_t = 0.92)]
    similarity_threshold: f32,

    /// Model backend: local or openai.
    #[arg(long, default_value = "local")]
    provider: String,

    /// Model identifier passed to the provider.
    #[arg(long, default_value = "llama3")]
    model: String,

    /// Subject domain substituted into the prompt.
    #[arg(long, default_value = "general")]
    domain: String,

    /// QA pairs per 300 chunk tokens.
    #[arg(long, default_value_t = 1.0)]
    qa_density_factor: f32,

    /// API key for the hosted provider.
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL of the local model runtime.
    #[arg(long, default_value = "http://127.0.0.1:11434")]
    ollama_url: String,

    /// Base URL of the hosted API.
    #[arg(long, default_value = "https://api.openai.com")]
    openai_base_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dataforge::logging::init_tracing();
    let args = Args::parse();

    let provider = match args.provider.as_str() {
        "local" => ProviderKind::Local,
        "openai" => ProviderKind::OpenAi,
        other => bail!("unknown provider '{other}' (expected 'local' or 'openai')"),
    };

    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let store = ProjectStore::new(&args.root)?;
    if !store.project_exists(&args.project) {
        store.create_project(&args.project)?;
    }
    store.save_raw_text(&args.project, &text)?;

    let runner = PipelineRunner::new(
        store,
        ProviderSettings {
            ollama_url: args.ollama_url,
            openai_base_url: args.openai_base_url,
            openai_api_key: args.api_key.clone(),
        },
        384,
    );

    let settings = PipelineSettings {
        chunk_size: args.chunk_size,
        chunk_overlap: args.chunk_overlap,
        similarity_threshold: args.similarity_threshold,
    };
    let config = GenerationConfig {
        provider,
        model_name: args.model,
        temperature: 0.7,
        top_p: 1.0,
        max_tokens: None,
        frequency_penalty: 0.0,
        presence_penalty: 0.0,
        domain: args.domain,
        qa_density_factor: args.qa_density_factor,
        api_key: args.api_key,
    };

    runner.start_run(&args.project, settings, config)?;

    // The run executes as a background task; poll until it settles.
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        if runner.is_running(&args.project) {
            if let Some(progress) = runner.store().load_progress(&args.project) {
                eprintln!(
                    "{} [{} / {}] {:.1}%",
                    progress.status, progress.done, progress.total, progress.percent
                );
            }
            continue;
        }
        break;
    }

    let status = runner.store().status(&args.project)?;
    match status.state {
        RunState::Finished => {
            println!(
                "finished: {} chunks, {} QA pairs",
                status.chunk_count, status.qa_count
            );
            Ok(())
        }
        state => {
            if let Some(error) = status.error {
                eprintln!("{error}");
            }
            bail!("pipeline ended in state '{state}'");
        }
    }
}
