//! Detailed JSON archive: the classification plus every raw answer, with a
//! small metadata block. Pretty-printed, two-space indent.

use serde::{Deserialize, Serialize};

use crate::domain::{Category, Response, ScoreTally};
use crate::util::iso_millis;

use super::{ExportError, Report};

pub const ARCHIVE_VERSION: &str = "1.0";
pub const ASSESSMENT_TYPE: &str = "Prakruti Parikshana";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveDocument {
    /// ISO-8601 UTC, millisecond precision.
    pub assessment_date: String,
    pub patient_details: ArchivedSubject,
    pub constitution: String,
    pub primary_dosha: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_dosha: Option<Category>,
    pub dosha_scores: ScoreTally,
    pub recommendations: Vec<String>,
    pub responses: Vec<Response>,
    pub metadata: ArchiveMetadata,
}

/// Subject block. Anonymous reports carry only the fallback name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedSubject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub version: String,
    pub total_questions: usize,
    pub assessment_type: String,
}

impl ArchiveDocument {
    pub fn from_report(report: &Report<'_>) -> Self {
        let result = report.result;
        let patient_details = match report.subject {
            Some(s) => ArchivedSubject {
                name: s.name.clone(),
                age: Some(s.age),
                mobile_number: Some(s.contact.clone()),
            },
            None => ArchivedSubject {
                name: report.subject_name().to_string(),
                age: None,
                mobile_number: None,
            },
        };

        ArchiveDocument {
            assessment_date: iso_millis(report.generated_at),
            patient_details,
            constitution: result.constitution.clone(),
            primary_dosha: result.primary,
            secondary_dosha: result.secondary,
            dosha_scores: result.scores,
            recommendations: result.recommendations.clone(),
            responses: report.responses.to_vec(),
            metadata: ArchiveMetadata {
                version: ARCHIVE_VERSION.to_string(),
                total_questions: report.total_questions,
                assessment_type: ASSESSMENT_TYPE.to_string(),
            },
        }
    }

    /// The classification this archive was written from.
    #[cfg(test)]
    pub fn classification(&self) -> crate::domain::ClassificationResult {
        crate::domain::ClassificationResult {
            scores: self.dosha_scores,
            primary: self.primary_dosha,
            secondary: self.secondary_dosha,
            constitution: self.constitution.clone(),
            recommendations: self.recommendations.clone(),
        }
    }
}

pub fn render_archive(report: &Report<'_>) -> Result<String, ExportError> {
    serde_json::to_string_pretty(&ArchiveDocument::from_report(report))
        .map_err(|e| ExportError::Serialization(e.to_string()))
}

#[cfg(test)]
pub fn parse_archive(text: &str) -> Result<ArchiveDocument, ExportError> {
    serde_json::from_str(text).map_err(|e| ExportError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::scoring::evaluate;

    #[test]
    fn archive_round_trips_classification_and_answers() {
        let (subject, responses) = (subject(), responses());
        let result = evaluate(&responses);
        let report = Report {
            result: &result,
            subject: Some(&subject),
            responses: &responses,
            total_questions: 18,
            generated_at: generated_at(),
        };
        let text = render_archive(&report).unwrap();
        let parsed = parse_archive(&text).unwrap();

        assert_eq!(parsed.classification(), result);
        assert_eq!(parsed.responses, responses);
        assert_eq!(parsed.patient_details.mobile_number.as_deref(), Some("+91 98765 43210"));
        assert_eq!(parsed.metadata.assessment_type, ASSESSMENT_TYPE);
        assert_eq!(parsed, ArchiveDocument::from_report(&report));
    }

    #[test]
    fn uses_archive_field_names() {
        let result = result();
        let report = Report {
            result: &result,
            subject: None,
            responses: &[],
            total_questions: 18,
            generated_at: generated_at(),
        };
        let v: serde_json::Value = serde_json::from_str(&render_archive(&report).unwrap()).unwrap();
        assert_eq!(v["assessmentDate"], "2026-10-18T09:30:00.000Z");
        assert_eq!(v["patientDetails"], serde_json::json!({ "name": "User" }));
        assert_eq!(v["primaryDosha"], "vata");
        assert_eq!(v["secondaryDosha"], "pitta");
        assert_eq!(v["doshaScores"]["kapha"], 9);
        assert_eq!(v["metadata"]["version"], "1.0");
        assert_eq!(v["metadata"]["totalQuestions"], 18);
        assert!(v["responses"].as_array().unwrap().is_empty());
    }

    #[test]
    fn absent_secondary_is_omitted() {
        let result = crate::scoring::classify(ScoreTally { vata: 0, pitta: 0, kapha: 20 });
        let report = Report {
            result: &result,
            subject: None,
            responses: &[],
            total_questions: 18,
            generated_at: generated_at(),
        };
        let text = render_archive(&report).unwrap();
        assert!(!text.contains("secondaryDosha"));
        assert!(text.contains("\n  \"constitution\": \"Kapha Dominant\""));
        assert_eq!(parse_archive(&text).unwrap().secondary_dosha, None);
    }
}
