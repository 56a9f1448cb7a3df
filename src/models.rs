//! Core data types that flow through the triage pipeline.
//!
//! Everything here is created once per query and never mutated afterwards.
//! Only [`OutcomeRecord`] outlives a query (it is appended to the record store).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CarelineError;

/// Maximum accepted length of a symptom description, in characters.
pub const MAX_INPUT_CHARS: usize = 5000;

/// Which safety rule set applies to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatientCategory {
    Adult,
    Infant,
}

impl PatientCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adult => "adult",
            Self::Infant => "infant",
        }
    }
}

impl fmt::Display for PatientCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatientCategory {
    type Err = CarelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adult" => Ok(Self::Adult),
            "infant" => Ok(Self::Infant),
            other => Err(CarelineError::invalid(format!(
                "invalid patient category '{}'. Must be 'Adult' or 'Infant'",
                other
            ))),
        }
    }
}

/// A single user submission.
#[derive(Debug, Clone)]
pub struct Query {
    /// Correlates log lines for one pipeline run.
    pub id: Uuid,
    pub text: String,
    pub patient: PatientCategory,
    pub submitted_at: DateTime<Utc>,
}

impl Query {
    /// Validate raw input and build a query.
    ///
    /// The length bound applies to the raw text; the stored text is trimmed.
    pub fn new(input: &str, patient: PatientCategory) -> Result<Self, CarelineError> {
        if input.trim().is_empty() {
            return Err(CarelineError::invalid("user input cannot be empty"));
        }
        let len = input.chars().count();
        if len > MAX_INPUT_CHARS {
            return Err(CarelineError::invalid(format!(
                "input exceeds maximum length of {} characters (got {})",
                MAX_INPUT_CHARS, len
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            text: input.trim().to_string(),
            patient,
            submitted_at: Utc::now(),
        })
    }
}

/// Canonical, model-free view of the symptom text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSymptoms {
    pub raw_text: String,
    /// Lower-cased `raw_text`.
    pub text: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    Unknown,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskAssessment {
    #[serde(rename = "risk_level")]
    pub tier: RiskTier,
    /// Always within `[0, 1]`.
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyVerdict {
    pub emergency: bool,
    pub reason: Option<String>,
}

impl EmergencyVerdict {
    pub fn clear() -> Self {
        Self {
            emergency: false,
            reason: None,
        }
    }

    pub fn flagged(reason: impl Into<String>) -> Self {
        Self {
            emergency: true,
            reason: Some(reason.into()),
        }
    }
}

/// Grounding text handed to the generation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievedContext {
    Passages(String),
    NothingFound,
}

impl RetrievedContext {
    pub const NOT_FOUND_TEXT: &'static str = "No relevant medical information found.";

    pub fn as_text(&self) -> &str {
        match self {
            Self::Passages(text) => text,
            Self::NothingFound => Self::NOT_FOUND_TEXT,
        }
    }
}

/// A persisted row of the append-only `records` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRecord {
    pub id: i64,
    pub symptoms: String,
    pub risk_level: String,
    pub score: f64,
    /// ISO-8601 timestamp.
    pub created_at: String,
}

/// Result returned to the caller when an emergency halted the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyOutcome {
    pub emergency: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result returned to the caller after a full pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedOutcome {
    pub emergency: bool,
    pub symptoms: NormalizedSymptoms,
    pub risk: RiskAssessment,
    pub response: String,
    pub report: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub safe_medicines: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Emergency(EmergencyOutcome),
    Completed(CompletedOutcome),
}

impl QueryOutcome {
    pub fn is_emergency(&self) -> bool {
        matches!(self, Self::Emergency(_))
    }
}
