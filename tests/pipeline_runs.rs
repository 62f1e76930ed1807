//! End-to-end pipeline scenarios: full runs against a mock model server,
//! failure handling, stop/resume, and atomic result visibility.

use async_trait::async_trait;
use dataforge::generation::{GenerationEngine, GenerationError, GenerationOutcome, PromptTemplate, QAPair, ResumePoint};
use dataforge::llm::{GenerationConfig, ModelProvider, ProviderError, ProviderKind, ProviderSettings};
use dataforge::pipeline::{CancelToken, PipelineError, PipelineRunner};
use dataforge::processing::{Chunk, PipelineSettings};
use dataforge::project::ProjectStore;
use dataforge::state::RunState;
use httpmock::{Method::POST, MockServer};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const TWO_PAIR_RESPONSE: &str = r#"[
  {"question": "What is covered here?", "answer": "The text content."},
  {"question": "What else is covered?", "answer": "More of the text content."}
]"#;

fn sample_text() -> String {
    [
        "The mitochondrion is the powerhouse of the cell and produces energy in the form of ATP.",
        "Photosynthesis converts sunlight, water, and carbon dioxide into glucose and oxygen inside chloroplasts.",
        "Cell division proceeds through mitosis, producing two daughter cells with identical chromosomes.",
    ]
    .join("\n\n")
}

fn generation_config(provider: ProviderKind) -> GenerationConfig {
    GenerationConfig {
        provider,
        model_name: "test-model".into(),
        temperature: 0.0,
        top_p: 1.0,
        max_tokens: None,
        frequency_penalty: 0.0,
        presence_penalty: 0.0,
        domain: "biology".into(),
        qa_density_factor: 1.0,
        api_key: None,
    }
}

fn runner_against(server: &MockServer, root: &std::path::Path) -> PipelineRunner {
    let store = ProjectStore::new(root).expect("store");
    PipelineRunner::new(
        store,
        ProviderSettings {
            ollama_url: server.base_url(),
            openai_base_url: server.base_url(),
            openai_api_key: None,
        },
        32,
    )
}

async fn wait_until_settled(runner: &PipelineRunner, project: &str) {
    for _ in 0..400 {
        if !runner.is_running(project) && runner.store().run_state(project) != RunState::Running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("pipeline for '{project}' did not settle in time");
}

fn seed_chunks(store: &ProjectStore, project: &str, texts: &[&str]) -> Vec<Chunk> {
    let chunks: Vec<Chunk> = texts
        .iter()
        .enumerate()
        .map(|(chunk_id, text)| Chunk {
            chunk_id,
            text: (*text).to_string(),
            token_count: 300,
        })
        .collect();
    store.save_chunks(project, &chunks).expect("save chunks");
    chunks
}

// scenario A: full run against a well-behaved stub server

#[tokio::test]
async fn full_run_yields_two_pairs_per_chunk() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .json_body(json!({ "response": TWO_PAIR_RESPONSE, "done": true }));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let runner = runner_against(&server, dir.path());
    runner.store().create_project("demo").unwrap();
    runner.store().save_raw_text("demo", &sample_text()).unwrap();

    runner
        .start_run(
            "demo",
            PipelineSettings {
                chunk_size: 50,
                chunk_overlap: 5,
                similarity_threshold: 0.92,
            },
            generation_config(ProviderKind::Local),
        )
        .unwrap();
    wait_until_settled(&runner, "demo").await;

    let status = runner.store().status("demo").unwrap();
    assert_eq!(status.state, RunState::Finished);
    assert!(status.finished);
    assert!(!status.has_error, "unexpected error: {:?}", status.error);
    assert!(status.chunk_count > 0);
    assert_eq!(status.qa_count, 2 * status.chunk_count);

    let chunks = runner.store().load_chunks("demo").unwrap();
    let pairs = runner.store().load_qa_pairs("demo").unwrap();
    for chunk in &chunks {
        let for_chunk = pairs.iter().filter(|p| p.chunk_id == chunk.chunk_id).count();
        assert_eq!(for_chunk, 2, "chunk {} pair count", chunk.chunk_id);
    }

    let progress = runner.store().load_progress("demo").unwrap();
    assert_eq!(progress.status, "done");
    assert_eq!(progress.done, progress.total);
    assert!(!runner.store().has_partial_pairs("demo"));
}

// scenario B: provider down from the first chunk

#[tokio::test]
async fn first_chunk_failure_aborts_the_run() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(500).body("model exploded");
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let runner = runner_against(&server, dir.path());
    runner.store().create_project("demo").unwrap();
    runner.store().save_raw_text("demo", &sample_text()).unwrap();

    runner
        .start_run(
            "demo",
            PipelineSettings::default(),
            generation_config(ProviderKind::Local),
        )
        .unwrap();
    wait_until_settled(&runner, "demo").await;

    let status = runner.store().status("demo").unwrap();
    assert_eq!(status.state, RunState::Errored);
    assert!(status.has_error);
    assert_eq!(status.qa_count, 0);
    assert!(!status.error.unwrap_or_default().is_empty());
}

// conflict: only one run per project

#[tokio::test]
async fn second_start_while_running_is_a_conflict() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .delay(Duration::from_millis(250))
                .json_body(json!({ "response": TWO_PAIR_RESPONSE, "done": true }));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let runner = runner_against(&server, dir.path());
    runner.store().create_project("demo").unwrap();
    runner.store().save_raw_text("demo", &sample_text()).unwrap();

    runner
        .start_run(
            "demo",
            PipelineSettings::default(),
            generation_config(ProviderKind::Local),
        )
        .unwrap();

    let second = runner.start_run(
        "demo",
        PipelineSettings::default(),
        generation_config(ProviderKind::Local),
    );
    assert!(matches!(second, Err(PipelineError::Conflict(_))));

    wait_until_settled(&runner, "demo").await;
}

// engine-level stubs

/// Deterministic provider returning one pair naming the chunk it came from.
struct EchoProvider;

#[async_trait]
impl ModelProvider for EchoProvider {
    async fn generate(
        &self,
        prompt: &str,
        _config: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        // The chunk text is embedded in the prompt; echo its first word back.
        let marker = prompt
            .lines()
            .find(|line| line.starts_with("segment"))
            .unwrap_or("segment unknown")
            .to_string();
        Ok(format!(
            r#"[{{"question": "About {marker}?", "answer": "{marker}"}}]"#
        ))
    }
}

/// Fails every call whose prompt contains the marker; succeeds otherwise.
struct FailOnMarker {
    marker: &'static str,
}

#[async_trait]
impl ModelProvider for FailOnMarker {
    async fn generate(
        &self,
        prompt: &str,
        _config: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        if prompt.contains(self.marker) {
            return Err(ProviderError::Unavailable("stub outage".into()));
        }
        EchoProvider.generate(prompt, _config).await
    }
}

/// Succeeds, then flips the cancel token after a fixed number of calls.
struct CancellingProvider {
    cancel: CancelToken,
    cancel_after_calls: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl ModelProvider for CancellingProvider {
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        let response = EchoProvider.generate(prompt, config).await?;
        let made = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if made >= self.cancel_after_calls {
            self.cancel.cancel();
        }
        Ok(response)
    }
}

fn engine_fixture(texts: &[&str]) -> (tempfile::TempDir, ProjectStore, Vec<Chunk>) {
    let dir = tempfile::tempdir().unwrap();
    let store = ProjectStore::new(dir.path()).unwrap();
    store.create_project("demo").unwrap();
    let chunks = seed_chunks(&store, "demo", texts);
    (dir, store, chunks)
}

const FIVE_SEGMENTS: [&str; 5] = [
    "segment zero",
    "segment one",
    "segment two",
    "segment three",
    "segment four",
];

// scenario C: one mid-run failure is tolerated

#[tokio::test]
async fn mid_run_chunk_failure_does_not_abort() {
    let (_guard, store, _chunks) = engine_fixture(&FIVE_SEGMENTS);
    let engine = GenerationEngine::new(store.clone());
    let provider = FailOnMarker {
        marker: "segment three",
    };

    let outcome = engine
        .generate(
            "demo",
            &generation_config(ProviderKind::Local),
            &provider,
            &PromptTemplate::default(),
            &CancelToken::new(),
            ResumePoint::default(),
        )
        .await
        .expect("run completes despite one failed chunk");

    assert_eq!(
        outcome,
        GenerationOutcome::Completed {
            pairs: 4,
            failed_chunks: 1
        }
    );

    let pairs = store.load_qa_pairs("demo").unwrap();
    let mut chunk_ids: Vec<usize> = pairs.iter().map(|p| p.chunk_id).collect();
    chunk_ids.sort_unstable();
    assert_eq!(chunk_ids, vec![0, 1, 2, 4]);
}

#[tokio::test]
async fn all_chunks_failing_after_first_yields_zero_pair_error() {
    let (_guard, store, _chunks) = engine_fixture(&FIVE_SEGMENTS);
    let engine = GenerationEngine::new(store.clone());
    // First chunk succeeds but parses to nothing; the rest fail outright.
    struct EmptyThenFail {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl ModelProvider for EmptyThenFail {
        async fn generate(
            &self,
            _prompt: &str,
            _config: &GenerationConfig,
        ) -> Result<String, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok("[]".to_string())
            } else {
                Err(ProviderError::Unavailable("stub outage".into()))
            }
        }
    }

    let error = engine
        .generate(
            "demo",
            &generation_config(ProviderKind::Local),
            &EmptyThenFail {
                calls: AtomicUsize::new(0),
            },
            &PromptTemplate::default(),
            &CancelToken::new(),
            ResumePoint::default(),
        )
        .await
        .expect_err("zero pairs is a fatal outcome");

    assert!(matches!(
        error,
        GenerationError::NoPairs { failed_chunks: 4 }
    ));
    assert!(store.has_error("demo"));
}

// stop/resume

#[tokio::test]
async fn stop_checkpoints_and_resume_is_lossless() {
    let (_guard, store, _chunks) = engine_fixture(&FIVE_SEGMENTS);
    let engine = GenerationEngine::new(store.clone());
    let config = generation_config(ProviderKind::Local);

    let cancel = CancelToken::new();
    let provider = CancellingProvider {
        cancel: cancel.clone(),
        cancel_after_calls: 2,
        calls: AtomicUsize::new(0),
    };

    let outcome = engine
        .generate(
            "demo",
            &config,
            &provider,
            &PromptTemplate::default(),
            &cancel,
            ResumePoint::default(),
        )
        .await
        .expect("stop is a requested suspension, not an error");

    assert_eq!(
        outcome,
        GenerationOutcome::Stopped {
            next_chunk: 2,
            pairs: 2
        }
    );

    let partial = store.load_partial_pairs("demo").unwrap();
    let partial_ids: Vec<usize> = partial.iter().map(|p| p.chunk_id).collect();
    assert_eq!(partial_ids, vec![0, 1]);
    let progress = store.load_progress("demo").unwrap();
    assert_eq!(progress.status, "stopped");
    assert_eq!(progress.done, 2);

    // Resume from the checkpoint with a healthy provider.
    let outcome = engine
        .generate(
            "demo",
            &config,
            &EchoProvider,
            &PromptTemplate::default(),
            &CancelToken::new(),
            ResumePoint {
                resume_from: progress.done,
                seed_pairs: partial,
            },
        )
        .await
        .expect("resumed run completes");

    assert_eq!(
        outcome,
        GenerationOutcome::Completed {
            pairs: 5,
            failed_chunks: 0
        }
    );

    let pairs = store.load_qa_pairs("demo").unwrap();
    let mut chunk_ids: Vec<usize> = pairs.iter().map(|p| p.chunk_id).collect();
    chunk_ids.sort_unstable();
    assert_eq!(chunk_ids, vec![0, 1, 2, 3, 4]);
    assert!(!store.has_partial_pairs("demo"));
}

#[tokio::test]
async fn interrupted_run_equals_uninterrupted_run() {
    let config = generation_config(ProviderKind::Local);

    // Baseline: run to completion without interruption.
    let (_guard_a, store_a, _chunks) = engine_fixture(&FIVE_SEGMENTS);
    let engine_a = GenerationEngine::new(store_a.clone());
    engine_a
        .generate(
            "demo",
            &config,
            &EchoProvider,
            &PromptTemplate::default(),
            &CancelToken::new(),
            ResumePoint::default(),
        )
        .await
        .unwrap();
    let baseline = store_a.load_qa_pairs("demo").unwrap();

    // Same input, stopped after two chunks and resumed.
    let (_guard_b, store_b, _chunks) = engine_fixture(&FIVE_SEGMENTS);
    let engine_b = GenerationEngine::new(store_b.clone());
    let cancel = CancelToken::new();
    engine_b
        .generate(
            "demo",
            &config,
            &CancellingProvider {
                cancel: cancel.clone(),
                cancel_after_calls: 2,
                calls: AtomicUsize::new(0),
            },
            &PromptTemplate::default(),
            &cancel,
            ResumePoint::default(),
        )
        .await
        .unwrap();
    let partial = store_b.load_partial_pairs("demo").unwrap();
    let resume_from = store_b.load_progress("demo").unwrap().done;
    engine_b
        .generate(
            "demo",
            &config,
            &EchoProvider,
            &PromptTemplate::default(),
            &CancelToken::new(),
            ResumePoint {
                resume_from,
                seed_pairs: partial,
            },
        )
        .await
        .unwrap();
    let resumed = store_b.load_qa_pairs("demo").unwrap();

    assert_eq!(baseline, resumed);
}

// runner-level stop/resume over the mock server

#[tokio::test]
async fn runner_stop_then_resume_covers_every_chunk() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .delay(Duration::from_millis(100))
                .json_body(json!({ "response": TWO_PAIR_RESPONSE, "done": true }));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let runner = runner_against(&server, dir.path());
    runner.store().create_project("demo").unwrap();
    runner.store().save_raw_text("demo", &sample_text()).unwrap();

    runner
        .start_run(
            "demo",
            PipelineSettings {
                chunk_size: 30,
                chunk_overlap: 0,
                similarity_threshold: 1.0,
            },
            generation_config(ProviderKind::Local),
        )
        .unwrap();

    // Let at least one chunk land, then request a stop.
    for _ in 0..200 {
        if runner
            .store()
            .load_progress("demo")
            .map(|p| p.done >= 1)
            .unwrap_or(false)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // The run may already have finished for tiny inputs; only assert the
    // stop path when the request lands.
    if runner.stop_run("demo").is_ok() {
        wait_until_settled(&runner, "demo").await;
        let status = runner.store().status("demo").unwrap();
        if status.state == RunState::Stopped {
            assert!(status.stopped);
            assert!(runner.store().has_partial_pairs("demo"));

            runner
                .resume_run("demo", generation_config(ProviderKind::Local))
                .unwrap();
            wait_until_settled(&runner, "demo").await;
        }
    } else {
        wait_until_settled(&runner, "demo").await;
    }

    let status = runner.store().status("demo").unwrap();
    assert_eq!(status.state, RunState::Finished);
    let chunks = runner.store().load_chunks("demo").unwrap();
    let pairs = runner.store().load_qa_pairs("demo").unwrap();
    for chunk in &chunks {
        let for_chunk = pairs.iter().filter(|p| p.chunk_id == chunk.chunk_id).count();
        assert_eq!(for_chunk, 2, "chunk {} pair count", chunk.chunk_id);
    }
    assert!(!runner.store().has_partial_pairs("demo"));
}

// atomic persistence under a concurrent reader

#[tokio::test]
async fn concurrent_reader_never_observes_torn_results() {
    let texts: Vec<String> = (0..20).map(|i| format!("segment number {i}")).collect();
    let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let (_guard, store, _chunks) = engine_fixture(&text_refs);

    let qa_path = store.project_dir("demo").join("qa_pairs.json");
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let reader_done = done.clone();
    let reader = tokio::spawn(async move {
        let mut observed = 0usize;
        while !reader_done.load(Ordering::SeqCst) {
            if let Ok(bytes) = std::fs::read(&qa_path) {
                let parsed: Result<Vec<QAPair>, _> = serde_json::from_slice(&bytes);
                assert!(parsed.is_ok(), "reader observed a torn result file");
                observed += 1;
            }
            tokio::task::yield_now().await;
        }
        observed
    });

    /// Small pause per call so the reader interleaves with many writes.
    struct SlowEcho;
    #[async_trait]
    impl ModelProvider for SlowEcho {
        async fn generate(
            &self,
            prompt: &str,
            config: &GenerationConfig,
        ) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            EchoProvider.generate(prompt, config).await
        }
    }

    let engine = GenerationEngine::new(store.clone());
    engine
        .generate(
            "demo",
            &generation_config(ProviderKind::Local),
            &SlowEcho,
            &PromptTemplate::default(),
            &CancelToken::new(),
            ResumePoint::default(),
        )
        .await
        .unwrap();

    done.store(true, Ordering::SeqCst);
    let observed = reader.await.unwrap();
    assert!(observed > 0, "reader never saw the result file");
}
