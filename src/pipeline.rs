//! Query orchestration.
//!
//! ```text
//! Received → Normalized → SafetyChecked ─┬─▶ Emergency
//!                                        └─▶ RiskScored → Retrieved → Generated → Persisted → Completed
//! ```
//!
//! `Emergency` is terminal: nothing after the safety check runs. Retrieval and
//! generation failures abort the query as [`CarelineError::Processing`] naming
//! the stage that could not be reached. Persistence is best-effort and its
//! failures are only logged.
//!
//! All collaborators are built once and injected; a single
//! [`QueryOrchestrator`] serves any number of concurrent queries.

use std::fmt;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::embedding;
use crate::error::{CarelineError, Result};
use crate::generation::{self, GenerationClient, MAX_USER_PROMPT_CHARS};
use crate::index::{SearchMode, SqliteIndex};
use crate::medicine::safe_medicines_mentioned;
use crate::models::{
    CompletedOutcome, EmergencyOutcome, PatientCategory, Query, QueryOutcome, RetrievedContext,
};
use crate::normalize::{normalize, preview};
use crate::records::{LazyRecordStore, RecordStore};
use crate::report::format_report;
use crate::retrieval::Retriever;
use crate::risk::assess_risk;
use crate::safety::{SafetyClassifier, EMERGENCY_MESSAGE};

const LOG_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Normalized,
    SafetyChecked,
    Emergency,
    RiskScored,
    Retrieved,
    Generated,
    Persisted,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Normalized => "normalized",
            Self::SafetyChecked => "safety_checked",
            Self::Emergency => "emergency",
            Self::RiskScored => "risk_scored",
            Self::Retrieved => "retrieved",
            Self::Generated => "generated",
            Self::Persisted => "persisted",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn system_prompt(patient: PatientCategory) -> String {
    format!(
        "You are a safe medical assistant for {} patients. Do not diagnose. \
         Provide general guidance only. Always recommend consulting a healthcare \
         professional for proper diagnosis.",
        patient.as_str()
    )
}

/// Build the generation prompt, clipping the context so the whole prompt
/// stays within [`MAX_USER_PROMPT_CHARS`].
fn user_prompt(context: &str, symptoms: &str) -> String {
    const HEAD: &str = "Context:\n";
    const MIDDLE: &str = "\n\nUser Symptoms:\n";
    let fixed = HEAD.len() + MIDDLE.len() + symptoms.chars().count();
    let budget = MAX_USER_PROMPT_CHARS.saturating_sub(fixed);
    format!("{}{}{}{}", HEAD, preview(context, budget), MIDDLE, symptoms)
}

pub struct QueryOrchestrator {
    safety: SafetyClassifier,
    retriever: Retriever,
    generator: GenerationClient,
    records: Arc<dyn RecordStore>,
}

impl QueryOrchestrator {
    pub fn new(
        safety: SafetyClassifier,
        retriever: Retriever,
        generator: GenerationClient,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            safety,
            retriever,
            generator,
            records,
        }
    }

    /// Wire every collaborator from config.
    ///
    /// # Errors
    ///
    /// [`CarelineError::Initialization`] for a missing credential, a missing
    /// or malformed passage index, or an unusable embedding provider. The
    /// record store is not touched until the first append.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let generator = GenerationClient::new(generation::create_provider(&config.generation)?);
        let safety = SafetyClassifier::new(generator.clone(), config.safety.on_classifier_error);

        let mode: SearchMode = config.retrieval.mode.parse()?;
        let embedder = match mode {
            SearchMode::Semantic => embedding::create_provider(&config.embedding)
                .map_err(|e| CarelineError::Initialization(e.to_string()))?,
            SearchMode::Keyword => None,
        };
        let index = SqliteIndex::open(&config.index.path, mode, embedder).await?;
        let retriever = Retriever::new(Arc::new(index), config.retrieval.top_k);

        let records = LazyRecordStore::new(&config.db.path);

        info!(
            model = generator.model_name(),
            top_k = retriever.top_k(),
            "query pipeline ready"
        );
        Ok(Self::new(safety, retriever, generator, Arc::new(records)))
    }

    pub fn records(&self) -> Arc<dyn RecordStore> {
        self.records.clone()
    }

    /// Caller-facing entry point taking the patient category as text.
    pub async fn process_query(&self, input: &str, patient: &str) -> Result<QueryOutcome> {
        let patient: PatientCategory = patient.parse()?;
        self.process(input, patient).await
    }

    pub async fn process(&self, input: &str, patient: PatientCategory) -> Result<QueryOutcome> {
        let query = Query::new(input, patient)?;
        let span = info_span!("query", query_id = %query.id, patient = %patient);
        self.run(query).instrument(span).await
    }

    async fn run(&self, query: Query) -> Result<QueryOutcome> {
        let input_preview = preview(&query.text, LOG_PREVIEW_CHARS);
        info!(stage = %Stage::Received, input = input_preview, "query received");

        let symptoms = normalize(&query.text)?;

        let verdict = self.safety.assess(query.patient, &symptoms.raw_text).await;
        if verdict.emergency {
            warn!(
                stage = %Stage::Emergency,
                reason = verdict.reason.as_deref().unwrap_or(""),
                input = input_preview,
                "query halted as emergency"
            );
            return Ok(QueryOutcome::Emergency(EmergencyOutcome {
                emergency: true,
                message: EMERGENCY_MESSAGE.to_string(),
                reason: verdict.reason,
            }));
        }

        let risk = assess_risk(&symptoms);
        info!(stage = %Stage::RiskScored, risk_level = %risk.tier, score = risk.score, "risk scored");

        let context = self
            .retriever
            .retrieve(&query.text)
            .await
            .map_err(|e| stage_failure(e, Stage::Retrieved, input_preview))?;
        if context == RetrievedContext::NothingFound {
            info!(stage = %Stage::Retrieved, "no relevant passages");
        }

        let advice = self
            .generator
            .generate(
                &system_prompt(query.patient),
                &user_prompt(context.as_text(), &query.text),
            )
            .await
            .map_err(|e| stage_failure(e, Stage::Generated, input_preview))?;

        let report = format_report(&query.text, &risk, &advice);
        let safe_medicines = safe_medicines_mentioned(&advice);

        match self.records.append(&query.text, &risk).await {
            Ok(id) => info!(stage = %Stage::Persisted, record_id = id, "outcome recorded"),
            Err(e) => error!(
                stage = %Stage::Persisted,
                error = %e,
                input = input_preview,
                "failed to record outcome"
            ),
        }

        info!(stage = %Stage::Completed, "query completed");
        Ok(QueryOutcome::Completed(CompletedOutcome {
            emergency: false,
            symptoms,
            risk,
            response: advice,
            report,
            safe_medicines,
        }))
    }
}

fn stage_failure(err: CarelineError, stage: Stage, input_preview: &str) -> CarelineError {
    error!(stage = %stage, error = %err, input = input_preview, "query failed");
    err.at_stage(stage)
}
