//! Doctor-friendly plain-text report.

use crate::models::RiskAssessment;

pub fn format_report(symptoms: &str, risk: &RiskAssessment, advice: &str) -> String {
    format!(
        "\nMEDICAL SUMMARY REPORT\n\
         ----------------------------\n\
         \n\
         • Reported Symptoms:\n\
         {symptoms}\n\
         \n\
         • Risk Level:\n\
         {tier} (Score: {percent:.0}%)\n\
         \n\
         • General Medical Advice:\n\
         {advice}\n\
         \n\
         • Recommendation:\n\
         - Monitor symptoms closely\n\
         - Consult a healthcare professional if symptoms worsen\n\
         \n\
         Disclaimer:\n\
         This is NOT a medical diagnosis.\n",
        symptoms = symptoms,
        tier = risk.tier.as_str().to_uppercase(),
        percent = risk.score * 100.0,
        advice = advice,
    )
}
