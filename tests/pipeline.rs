//! End-to-end tests of the query pipeline through the library API.
//!
//! The generation service, passage search and record store are replaced by
//! in-process fakes so every stage can be observed and forced to fail. The
//! last tests swap in the real SQLite index and record store, and serve the
//! HTTP router over a loopback port.

use async_trait::async_trait;
use careline::error::{CarelineError, Result};
use careline::generation::{GenerationClient, GenerationProvider, ProviderError};
use careline::index::{create_index, insert_passage, SearchMode, SqliteIndex};
use careline::models::{OutcomeRecord, QueryOutcome, RiskAssessment, RiskTier, MAX_INPUT_CHARS};
use careline::pipeline::{QueryOrchestrator, Stage};
use careline::config::Config;
use careline::records::{LazyRecordStore, RecordStore, SqliteRecordStore};
use careline::retrieval::{PassageSearch, Retriever};
use careline::safety::{ClassifierErrorPolicy, SafetyClassifier};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

// ─── Fakes ──────────────────────────────────────────────────────────

const CLASSIFIER_SYSTEM: &str = "Medical safety check";
const ADVICE: &str = "Rest, drink fluids and take paracetamol if needed. Consult a doctor.";

/// Answers the safety classifier with `classifier_reply` and everything else
/// with canned advice, or fails every call.
struct FakeModel {
    classifier_reply: &'static str,
    fail: bool,
    classifier_calls: AtomicUsize,
    advice_calls: AtomicUsize,
    last_system: Mutex<String>,
    last_user: Mutex<String>,
}

impl FakeModel {
    fn answering(classifier_reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            classifier_reply,
            fail: false,
            classifier_calls: AtomicUsize::new(0),
            advice_calls: AtomicUsize::new(0),
            last_system: Mutex::new(String::new()),
            last_user: Mutex::new(String::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            classifier_reply: "",
            fail: true,
            classifier_calls: AtomicUsize::new(0),
            advice_calls: AtomicUsize::new(0),
            last_system: Mutex::new(String::new()),
            last_user: Mutex::new(String::new()),
        })
    }

    fn total_calls(&self) -> usize {
        self.classifier_calls.load(Ordering::SeqCst) + self.advice_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for FakeModel {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ProviderError> {
        let is_classifier = system_prompt == CLASSIFIER_SYSTEM;
        if is_classifier {
            self.classifier_calls.fetch_add(1, Ordering::SeqCst);
        } else {
            self.advice_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_system.lock().unwrap() = system_prompt.to_string();
            *self.last_user.lock().unwrap() = user_prompt.to_string();
        }

        if self.fail {
            return Err(ProviderError::Api {
                status: 503,
                body: "service unavailable".into(),
            });
        }
        if is_classifier {
            Ok(self.classifier_reply.to_string())
        } else {
            Ok(ADVICE.to_string())
        }
    }

    fn provider_name(&self) -> &str {
        "fake"
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }
}

struct FakeSearch {
    passages: Vec<&'static str>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeSearch {
    fn with(passages: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            passages,
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            passages: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PassageSearch for FakeSearch {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CarelineError::Retrieval("index unavailable".into()));
        }
        Ok(self.passages.iter().take(k).map(|p| p.to_string()).collect())
    }
}

#[derive(Default)]
struct MemoryStore {
    rows: Mutex<Vec<(String, RiskAssessment)>>,
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn append(&self, symptoms: &str, risk: &RiskAssessment) -> Result<i64> {
        let mut rows = self.rows.lock().unwrap();
        rows.push((symptoms.to_string(), *risk));
        Ok(rows.len() as i64)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<OutcomeRecord>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .enumerate()
            .rev()
            .take(limit as usize)
            .map(|(i, (symptoms, risk))| OutcomeRecord {
                id: i as i64 + 1,
                symptoms: symptoms.clone(),
                risk_level: risk.tier.to_string(),
                score: risk.score,
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .collect())
    }
}

struct FailingStore;

#[async_trait]
impl RecordStore for FailingStore {
    async fn append(&self, _symptoms: &str, _risk: &RiskAssessment) -> Result<i64> {
        Err(CarelineError::Persistence("database is locked".into()))
    }

    async fn recent(&self, _limit: i64) -> Result<Vec<OutcomeRecord>> {
        Err(CarelineError::Persistence("database is locked".into()))
    }
}

/// Shared buffer that collects formatted log lines.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

fn orchestrator(
    model: Arc<FakeModel>,
    search: Arc<dyn PassageSearch>,
    store: Arc<dyn RecordStore>,
) -> QueryOrchestrator {
    let client = GenerationClient::new(model);
    let safety = SafetyClassifier::new(client.clone(), ClassifierErrorPolicy::default());
    QueryOrchestrator::new(safety, Retriever::new(search, 3), client, store)
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_headache_query_runs_every_stage() {
    let model = FakeModel::answering("no");
    let search = FakeSearch::with(vec!["Headaches are often caused by dehydration."]);
    let store = Arc::new(MemoryStore::default());
    let orch = orchestrator(model.clone(), search.clone(), store.clone());

    let outcome = orch
        .process_query("Severe headache, fever, nausea", "Adult")
        .await
        .unwrap();

    let QueryOutcome::Completed(done) = outcome else {
        panic!("expected a completed outcome");
    };
    assert!(!done.emergency);
    assert_eq!(done.risk.tier, RiskTier::Low);
    assert!(done.report.contains("LOW (Score: 20%)"));
    assert!(done.report.contains("Severe headache, fever, nausea"));
    assert_eq!(done.response, ADVICE);
    assert_eq!(done.safe_medicines, vec!["Paracetamol".to_string()]);
    assert_eq!(done.symptoms.text, "severe headache, fever, nausea");

    assert_eq!(search.calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.classifier_calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.advice_calls.load(Ordering::SeqCst), 1);

    let user = model.last_user.lock().unwrap().clone();
    assert_eq!(
        user,
        "Context:\nHeadaches are often caused by dehydration.\n\nUser Symptoms:\nSevere headache, fever, nausea"
    );
    assert!(model
        .last_system
        .lock()
        .unwrap()
        .starts_with("You are a safe medical assistant for adult patients."));

    let rows = store.rows.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "Severe headache, fever, nausea");
    assert_eq!(rows[0].1.tier, RiskTier::Low);
}

#[tokio::test]
async fn test_emergency_halts_before_risk_and_retrieval() {
    let model = FakeModel::answering("no");
    let search = FakeSearch::with(vec!["unused"]);
    let store = Arc::new(MemoryStore::default());
    let orch = orchestrator(model.clone(), search.clone(), store.clone());

    let outcome = orch
        .process_query("unconscious and not breathing", "Adult")
        .await
        .unwrap();

    let QueryOutcome::Emergency(e) = &outcome else {
        panic!("expected an emergency outcome");
    };
    assert!(e.emergency);
    assert!(e.message.contains("emergency"));
    assert!(e.reason.is_some());

    let json = serde_json::to_value(&outcome).unwrap();
    assert!(json.get("risk").is_none());
    assert!(json.get("report").is_none());

    assert_eq!(model.total_calls(), 0);
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    assert!(store.rows.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_ai_classifier_can_flag_adult_emergency() {
    let model = FakeModel::answering("Yes, seek care now.");
    let search = FakeSearch::with(vec!["unused"]);
    let orch = orchestrator(model.clone(), search.clone(), Arc::new(MemoryStore::default()));

    let outcome = orch
        .process_query("sudden weakness on one side of my face", "adult")
        .await
        .unwrap();
    assert!(outcome.is_emergency());
    assert_eq!(model.advice_calls.load(Ordering::SeqCst), 0);
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_infant_uses_only_infant_signs() {
    let model = FakeModel::answering("yes");
    let search = FakeSearch::with(vec![]);
    let orch = orchestrator(model.clone(), search, Arc::new(MemoryStore::default()));

    // Adult phrase, infant rules: not an emergency and the classifier is never asked.
    let outcome = orch.process_query("chest pain", "Infant").await.unwrap();
    assert!(!outcome.is_emergency());
    assert_eq!(model.classifier_calls.load(Ordering::SeqCst), 0);
    assert!(model
        .last_system
        .lock()
        .unwrap()
        .contains("for infant patients"));

    let outcome = orch
        .process_query("baby is lethargic and not feeding", "Infant")
        .await
        .unwrap();
    assert!(outcome.is_emergency());
}

#[tokio::test]
async fn test_empty_input_rejected_before_any_component() {
    let model = FakeModel::answering("no");
    let search = FakeSearch::with(vec!["x"]);
    let store = Arc::new(MemoryStore::default());
    let orch = orchestrator(model.clone(), search.clone(), store.clone());

    for input in ["", "   \n\t"] {
        let err = orch.process_query(input, "Adult").await.unwrap_err();
        assert!(err.is_invalid_input(), "{input:?} gave {err:?}");
    }
    assert_eq!(model.total_calls(), 0);
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    assert!(store.rows.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_patient_category_rejected() {
    let model = FakeModel::answering("no");
    let orch = orchestrator(
        model.clone(),
        FakeSearch::with(vec![]),
        Arc::new(MemoryStore::default()),
    );
    let err = orch.process_query("headache", "Elderly").await.unwrap_err();
    assert!(err.is_invalid_input());
    assert_eq!(model.total_calls(), 0);
}

#[tokio::test]
async fn test_input_length_boundary() {
    let model = FakeModel::answering("no");
    let orch = orchestrator(
        model,
        FakeSearch::with(vec!["p"]),
        Arc::new(MemoryStore::default()),
    );

    let exact = "a".repeat(MAX_INPUT_CHARS);
    assert!(orch.process_query(&exact, "Adult").await.is_ok());

    let over = "a".repeat(MAX_INPUT_CHARS + 1);
    let err = orch.process_query(&over, "Adult").await.unwrap_err();
    assert!(err.is_invalid_input());
}

#[tokio::test]
async fn test_store_failure_is_logged_not_raised() {
    let (logs, _guard) = capture_logs();
    let model = FakeModel::answering("no");
    let orch = orchestrator(
        model,
        FakeSearch::with(vec!["passage"]),
        Arc::new(FailingStore),
    );

    let outcome = orch.process_query("fever and cough", "Adult").await.unwrap();
    let QueryOutcome::Completed(done) = outcome else {
        panic!("expected a completed outcome");
    };
    assert_eq!(done.risk.tier, RiskTier::Medium);
    assert!(done.report.contains("MEDIUM (Score: 50%)"));

    let logs = logs.contents();
    let line = logs
        .lines()
        .find(|l| l.contains("failed to record outcome"))
        .unwrap_or_else(|| panic!("no persistence error logged in:\n{logs}"));
    assert!(line.contains("ERROR"));
    assert!(line.contains("stage=persisted"));
    assert!(line.contains("database is locked"));
    assert!(line.contains("query_id"));
}

#[tokio::test]
async fn test_unreachable_record_store_still_completes() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let store = Arc::new(LazyRecordStore::new(blocker.join("records.sqlite")));

    let (logs, _guard) = capture_logs();
    let orch = orchestrator(
        FakeModel::answering("no"),
        FakeSearch::with(vec!["passage"]),
        store,
    );

    let outcome = orch.process_query("Severe headache", "Adult").await.unwrap();
    assert!(!outcome.is_emergency());
    assert!(logs.contents().contains("failed to record outcome"));
}

#[tokio::test]
async fn test_from_config_does_not_open_record_store() {
    let tmp = TempDir::new().unwrap();
    let index_path = tmp.path().join("medical.sqlite");
    create_index(&index_path).await.unwrap().close().await;
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    std::env::set_var("CARELINE_PIPELINE_TEST_KEY", "test-key");
    let mut config = Config::default();
    config.index.path = index_path;
    config.db.path = blocker.join("records.sqlite");
    config.generation.api_key_env = "CARELINE_PIPELINE_TEST_KEY".into();

    let orch = QueryOrchestrator::from_config(&config).await.unwrap();

    // Settled by the phrase list, so no model call is made.
    let outcome = orch.process_query("chest pain", "Adult").await.unwrap();
    assert!(outcome.is_emergency());

    let err = orch.records().recent(5).await.unwrap_err();
    assert!(matches!(err, CarelineError::Persistence(_)));
}

#[tokio::test]
async fn test_retrieval_failure_is_processing_error_without_persistence() {
    let model = FakeModel::answering("no");
    let store = Arc::new(MemoryStore::default());
    let orch = orchestrator(model.clone(), FakeSearch::failing(), store.clone());

    let err = orch.process_query("headache", "Adult").await.unwrap_err();
    match err {
        CarelineError::Processing { stage, source } => {
            assert_eq!(stage, Stage::Retrieved);
            assert!(matches!(*source, CarelineError::Retrieval(_)));
        }
        other => panic!("expected processing error, got {other:?}"),
    }
    assert_eq!(model.advice_calls.load(Ordering::SeqCst), 0);
    assert!(store.rows.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_generation_failure_is_processing_error() {
    // Classifier failures fall back to non-emergency, so the query reaches generation.
    let model = FakeModel::failing();
    let store = Arc::new(MemoryStore::default());
    let orch = orchestrator(model.clone(), FakeSearch::with(vec!["p"]), store.clone());

    let err = orch.process_query("headache", "Adult").await.unwrap_err();
    assert!(matches!(
        err,
        CarelineError::Processing {
            stage: Stage::Generated,
            ..
        }
    ));
    assert!(!err.is_invalid_input());
    assert_eq!(model.classifier_calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.advice_calls.load(Ordering::SeqCst), 1);
    assert!(store.rows.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_passages_sends_sentinel_context() {
    let model = FakeModel::answering("no");
    let orch = orchestrator(
        model.clone(),
        FakeSearch::with(vec![]),
        Arc::new(MemoryStore::default()),
    );

    orch.process_query("itchy elbow", "Adult").await.unwrap();
    let user = model.last_user.lock().unwrap().clone();
    assert!(user.starts_with("Context:\nNo relevant medical information found.\n\n"));
}

#[tokio::test]
async fn test_risk_is_stable_across_repeated_queries() {
    let model = FakeModel::answering("no");
    let orch = orchestrator(
        model,
        FakeSearch::with(vec!["p"]),
        Arc::new(MemoryStore::default()),
    );

    let mut scores = Vec::new();
    for _ in 0..3 {
        let QueryOutcome::Completed(done) = orch
            .process_query("Fever with a dry cough and headache", "Adult")
            .await
            .unwrap()
        else {
            panic!("expected a completed outcome");
        };
        scores.push((done.risk.tier, done.risk.score));
    }
    assert!(scores.iter().all(|s| *s == (RiskTier::Medium, 0.5)));
}

// ─── Real SQLite backends ───────────────────────────────────────────

#[tokio::test]
async fn test_sqlite_index_and_record_store() {
    let tmp = TempDir::new().unwrap();
    let index_path = tmp.path().join("vector_store/medical.sqlite");
    let pool = create_index(&index_path).await.unwrap();
    insert_passage(&pool, "who.pdf", 0, "Tension headache responds to rest and fluids.")
        .await
        .unwrap();
    insert_passage(&pool, "who.pdf", 1, "Measles presents with a rash.")
        .await
        .unwrap();
    pool.close().await;

    let index = SqliteIndex::open(&index_path, SearchMode::Keyword, None)
        .await
        .unwrap();
    let store = Arc::new(
        SqliteRecordStore::open(&tmp.path().join("database/records.sqlite"))
            .await
            .unwrap(),
    );

    let model = FakeModel::answering("no");
    let orch = orchestrator(model.clone(), Arc::new(index), store.clone());

    orch.process_query("Severe headache", "Adult").await.unwrap();

    let user = model.last_user.lock().unwrap().clone();
    assert!(user.contains("Tension headache responds to rest and fluids."));
    assert!(!user.contains("Measles"));

    let records = store.recent(5).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].symptoms, "Severe headache");
    assert_eq!(records[0].risk_level, "low");
    assert!((records[0].score - 0.2).abs() < 1e-9);
}

// ─── HTTP router ────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve(orch: QueryOrchestrator) -> (u16, tokio::task::JoinHandle<()>) {
    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    let app = careline::server::router(Arc::new(orch));
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (port, handle)
}

#[tokio::test]
async fn test_http_api_contract() {
    let store = Arc::new(MemoryStore::default());
    let orch = orchestrator(
        FakeModel::answering("no"),
        FakeSearch::with(vec!["Rest helps."]),
        store.clone(),
    );
    let (port, server) = serve(orch).await;
    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let resp = client
        .post(format!("{base}/query"))
        .json(&json!({"input": "chest pain", "patient": "adult"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["emergency"], true);

    let resp = client
        .post(format!("{base}/query"))
        .json(&json!({"input": "headache"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["emergency"], false);
    assert_eq!(body["risk"]["risk_level"], "low");
    assert!(body["report"].as_str().unwrap().contains("LOW (Score: 20%)"));

    let resp = client
        .post(format!("{base}/query"))
        .json(&json!({"input": "  ", "patient": "adult"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{base}/labs"))
        .json(&json!({"values": {"hemoglobin": 10.0, "wbc": 7000}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["findings"][0]["summary"],
        "hemoglobin LOW → Possible anemia/infection"
    );
    assert_eq!(body["findings"][1]["status"], "normal");

    let body: Value = client
        .get(format!("{base}/records?limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["records"].as_array().unwrap().len(), 1);
    assert_eq!(body["records"][0]["symptoms"], "headache");

    let resp = client
        .post(format!("{base}/query"))
        .json(&json!({"patient": "adult"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"].as_str().unwrap().contains("input"));

    let resp = client
        .post(format!("{base}/query"))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{base}/labs"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .get(format!("{base}/records?limit=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    server.abort();
}

#[tokio::test]
async fn test_http_processing_error() {
    let orch = orchestrator(
        FakeModel::answering("no"),
        FakeSearch::failing(),
        Arc::new(MemoryStore::default()),
    );
    let (port, server) = serve(orch).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/query", port))
        .json(&json!({"input": "headache", "patient": "adult"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "processing_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("retrieved"));

    server.abort();
}
