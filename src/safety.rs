//! Emergency detection.
//!
//! Three checks, composed per [`PatientCategory`]:
//!
//! | Category | Checks |
//! |----------|--------|
//! | `Adult` | [`rule_based_emergency`] OR [`SafetyClassifier::ai_emergency_check`] |
//! | `Infant` | [`infant_emergency`] only |
//!
//! The infant path intentionally bypasses both the adult phrase list and the
//! model classifier. An infant description mentioning "chest pain" is *not*
//! flagged.
//!
//! Failures of the model classifier never propagate. They are resolved by the
//! classifier's [`ClassifierErrorPolicy`].

use serde::Deserialize;
use tracing::{error, warn};

use crate::generation::GenerationClient;
use crate::models::{EmergencyVerdict, PatientCategory};
use crate::normalize::preview;

pub const EMERGENCY_RULES: &[&str] = &[
    "chest pain",
    "heart attack",
    "stroke",
    "difficulty breathing",
    "not breathing",
    "unconscious",
    "loss of consciousness",
    "severe bleeding",
    "seizure",
];

pub const INFANT_DANGER_SIGNS: &[&str] = &[
    "not feeding",
    "lethargic",
    "blue lips",
    "fast breathing",
    "fever in infant",
    "convulsion",
];

/// Shown to the caller whenever a query is halted as an emergency.
pub const EMERGENCY_MESSAGE: &str = "These symptoms may indicate a medical emergency. \
    Call your local emergency number or go to the nearest emergency department immediately. \
    Do not wait for an online assessment.";

const CLASSIFIER_SYSTEM_PROMPT: &str = "Medical safety check";
const CLASSIFIER_INPUT_CHARS: usize = 500;
const LOG_PREVIEW_CHARS: usize = 100;

/// First phrase of `phrases` found in the lower-cased `text`.
fn first_match(text: &str, phrases: &[&'static str]) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    phrases.iter().copied().find(|p| lowered.contains(p))
}

pub fn matched_emergency_rule(text: &str) -> Option<&'static str> {
    first_match(text, EMERGENCY_RULES)
}

pub fn matched_infant_sign(text: &str) -> Option<&'static str> {
    first_match(text, INFANT_DANGER_SIGNS)
}

pub fn rule_based_emergency(text: &str) -> bool {
    matched_emergency_rule(text).is_some()
}

pub fn infant_emergency(text: &str) -> bool {
    matched_infant_sign(text).is_some()
}

/// What the model classifier reports when its generation call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierErrorPolicy {
    /// Do not block the query on classifier errors.
    #[default]
    TreatAsNonEmergency,
    TreatAsEmergency,
}

impl ClassifierErrorPolicy {
    fn resolve(self) -> bool {
        matches!(self, Self::TreatAsEmergency)
    }
}

fn classifier_prompt(text: &str) -> String {
    format!(
        "\nYou are a medical safety classifier.\nAnswer ONLY yes or no.\n\nIs this a medical emergency:\n{}\n",
        preview(text, CLASSIFIER_INPUT_CHARS)
    )
}

pub struct SafetyClassifier {
    generator: GenerationClient,
    on_classifier_error: ClassifierErrorPolicy,
}

impl SafetyClassifier {
    pub fn new(generator: GenerationClient, on_classifier_error: ClassifierErrorPolicy) -> Self {
        Self {
            generator,
            on_classifier_error,
        }
    }

    /// Ask the model whether `text` describes an emergency.
    ///
    /// True iff the lower-cased reply contains `"yes"`. A failed call yields
    /// whatever the configured [`ClassifierErrorPolicy`] dictates.
    pub async fn ai_emergency_check(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            warn!("empty input to AI emergency check");
            return false;
        }

        match self
            .generator
            .generate(CLASSIFIER_SYSTEM_PROMPT, &classifier_prompt(text))
            .await
        {
            Ok(reply) => {
                let flagged = reply.to_lowercase().contains("yes");
                if flagged {
                    warn!(
                        input = preview(text, LOG_PREVIEW_CHARS),
                        "AI classifier detected emergency"
                    );
                }
                flagged
            }
            Err(e) => {
                let verdict = self.on_classifier_error.resolve();
                error!(
                    error = %e,
                    policy = ?self.on_classifier_error,
                    verdict,
                    "AI emergency check failed"
                );
                verdict
            }
        }
    }

    /// Run the checks that apply to `patient` and return the combined verdict.
    pub async fn assess(&self, patient: PatientCategory, text: &str) -> EmergencyVerdict {
        match patient {
            PatientCategory::Infant => match matched_infant_sign(text) {
                Some(sign) => {
                    warn!(
                        sign,
                        input = preview(text, LOG_PREVIEW_CHARS),
                        "infant emergency detected"
                    );
                    EmergencyVerdict::flagged(format!("infant danger sign: {}", sign))
                }
                None => EmergencyVerdict::clear(),
            },
            PatientCategory::Adult => {
                if let Some(rule) = matched_emergency_rule(text) {
                    warn!(
                        rule,
                        input = preview(text, LOG_PREVIEW_CHARS),
                        "emergency detected"
                    );
                    return EmergencyVerdict::flagged(format!("emergency phrase: {}", rule));
                }
                if self.ai_emergency_check(text).await {
                    return EmergencyVerdict::flagged("flagged by AI safety classifier");
                }
                EmergencyVerdict::clear()
            }
        }
    }
}
