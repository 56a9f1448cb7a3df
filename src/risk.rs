//! Coarse risk scoring over normalized symptom text.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! | Condition | Tier | Score |
//! |-----------|------|-------|
//! | contains `fever` and `cough` | `medium` | 0.5 |
//! | contains `headache` | `low` | 0.2 |
//! | otherwise | `unknown` | 0.1 |

use crate::models::{NormalizedSymptoms, RiskAssessment, RiskTier};

pub fn assess_risk(symptoms: &NormalizedSymptoms) -> RiskAssessment {
    let text = symptoms.text.as_str();

    if text.contains("fever") && text.contains("cough") {
        return RiskAssessment {
            tier: RiskTier::Medium,
            score: 0.5,
        };
    }

    if text.contains("headache") {
        return RiskAssessment {
            tier: RiskTier::Low,
            score: 0.2,
        };
    }

    RiskAssessment {
        tier: RiskTier::Unknown,
        score: 0.1,
    }
}
