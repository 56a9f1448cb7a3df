//! Lab value screening against fixed adult reference ranges.
//!
//! | Test | Low | High |
//! |------|-----|------|
//! | `hemoglobin` | 12 | 17 |
//! | `wbc` | 4000 | 11000 |
//! | `fasting_glucose` | 70 | 100 |
//! | `platelets` | 150000 | 450000 |
//!
//! Bounds are inclusive. Names are matched case-insensitively.

use serde::Serialize;
use std::fmt;

const NORMAL_RANGES: &[(&str, f64, f64)] = &[
    ("hemoglobin", 12.0, 17.0),
    ("wbc", 4000.0, 11000.0),
    ("fasting_glucose", 70.0, 100.0),
    ("platelets", 150000.0, 450000.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    Low,
    High,
    Normal,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabFinding {
    pub test: String,
    pub value: f64,
    pub status: LabStatus,
}

impl fmt::Display for LabFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            LabStatus::Low => write!(f, "{} LOW → Possible anemia/infection", self.test),
            LabStatus::High => write!(f, "{} HIGH → Possible risk", self.test),
            LabStatus::Normal => write!(f, "{} NORMAL", self.test),
            LabStatus::Unrecognized => write!(f, "{} UNRECOGNIZED", self.test),
        }
    }
}

pub fn normal_range(test: &str) -> Option<(f64, f64)> {
    let key = test.trim().to_ascii_lowercase();
    NORMAL_RANGES
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|&(_, low, high)| (low, high))
}

/// One finding per input value, in input order.
pub fn analyze_labs<S: AsRef<str>>(values: &[(S, f64)]) -> Vec<LabFinding> {
    values
        .iter()
        .map(|(test, value)| {
            let test = test.as_ref().trim();
            let status = match normal_range(test) {
                None => LabStatus::Unrecognized,
                Some((low, _)) if *value < low => LabStatus::Low,
                Some((_, high)) if *value > high => LabStatus::High,
                Some(_) => LabStatus::Normal,
            };
            LabFinding {
                test: test.to_string(),
                value: *value,
                status,
            }
        })
        .collect()
}
