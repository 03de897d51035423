//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ClassificationResult, Question, SubjectDetails};
use crate::export::ExportOutcome;
use crate::records::{AssessmentSummary, OwnerStats};
use crate::session::SessionState;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    StartSession {
        #[serde(default)]
        subject: SubjectForm,
        #[serde(rename = "ownerId", default)]
        owner_id: Option<String>,
    },
    GetSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Select {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "choiceIndex")]
        choice_index: usize,
    },
    Next {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Previous {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Complete {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Result {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Export {
        #[serde(rename = "sessionId")]
        session_id: String,
        format: String,
    },
    Catalog,
    Dashboard {
        #[serde(rename = "ownerId")]
        owner_id: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session {
        session: SessionView,
    },
    Result {
        result: ResultOut,
    },
    Exported {
        outcome: ExportOutcome,
    },
    Catalog {
        catalog: CatalogOut,
    },
    Dashboard {
        dashboard: DashboardOut,
    },
    Error {
        message: String,
        retryable: bool,
    },
}

/// Where a session stands, as shown to the taker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    /// Serialized inline: `"state": "presenting", "index": 3`.
    #[serde(flatten)]
    pub state: SessionState,
    pub total: usize,
    pub answered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<Question>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_choice: Option<usize>,
    pub can_advance: bool,
    pub finished: bool,
}

/// Subject details as a client submits them. Fields are loosely typed so an
/// absent or mistyped value reaches validation instead of failing to parse.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectForm {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub age: Option<Value>,
    #[serde(default)]
    pub mobile_number: Option<Value>,
}

impl SubjectForm {
    /// Unusable values become empty ones, which `SubjectDetails::validate`
    /// reports alongside every other violation.
    pub fn into_subject(self) -> SubjectDetails {
        SubjectDetails {
            name: text_field(self.name),
            age: age_field(self.age),
            contact: text_field(self.mobile_number),
        }
    }
}

fn text_field(value: Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Whole years; anything else reads as 0.
fn age_field(value: Option<Value>) -> u32 {
    let years = match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    years.map_or(0, |y| u32::try_from(y).unwrap_or(u32::MAX))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectIn {
    pub choice_index: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultOut {
    pub session_id: String,
    pub result: ClassificationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub finished_at: DateTime<Utc>,
    /// Rounded share of the primary category; absent when nothing was scored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_percentage: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogOut {
    pub total: usize,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOut {
    pub stats: OwnerStats,
    pub recent: Vec<AssessmentSummary>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(v: serde_json::Value) -> SubjectForm {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn complete_form_converts_as_is() {
        let s = form(json!({ "name": "Asha Rao", "age": 34, "mobileNumber": "9876543210" })).into_subject();
        assert_eq!(s, SubjectDetails { name: "Asha Rao".into(), age: 34, contact: "9876543210".into() });
    }

    #[test]
    fn missing_and_mistyped_fields_fail_validation_per_field() {
        let s = form(json!({ "name": ["Asha"], "age": "abc" })).into_subject();
        let err = s.validate().unwrap_err();
        let fields: Vec<&str> = err.violations().iter().map(|v| v.field).collect();
        assert_eq!(fields, vec!["name", "age", "mobileNumber"]);
        assert_eq!(err.violations()[2].message, "Mobile number is required");
    }

    #[test]
    fn numeric_strings_and_numbers_are_accepted() {
        let s = form(json!({ "name": "Li", "age": " 41 ", "mobileNumber": 9876543210u64 })).into_subject();
        assert_eq!(s.age, 41);
        assert_eq!(s.contact, "9876543210");
        assert!(s.validate().is_ok());

        assert_eq!(form(json!({ "age": -3 })).into_subject().age, 0);
        assert_eq!(form(json!({ "age": 34.5 })).into_subject().age, 0);
        assert_eq!(form(json!({ "age": 1u64 << 40 })).into_subject().age, u32::MAX);
    }
}
