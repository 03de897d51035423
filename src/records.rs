//! Remote record store: subjects and assessments persisted for an
//! authenticated practitioner.
//!
//! `RestRecordStore` speaks a PostgREST-style HTTP API (tables `patients` and
//! `assessments`). `InMemoryRecordStore` backs development runs and tests.
//!
//! NOTE: We never log the API key or contact numbers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::domain::{Category, ScoreTally, SubjectDetails};
use crate::util::trunc_for_log;

#[derive(Debug, Error)]
pub enum RecordStoreError {
  #[error("{operation} timed out after {after:?}")]
  Timeout { operation: &'static str, after: Duration },

  #[error("HTTP transport error: {0}")]
  Http(String),

  #[error("unexpected response body: {0}")]
  Decode(String),

  #[error("record store rejected request ({status}): {message}")]
  Rejected { status: u16, message: String },
}

/// Assessment to be created for a subject.
#[derive(Clone, Debug, PartialEq)]
pub struct NewAssessment {
  pub owner_id: String,
  pub subject_id: String,
  /// Question id → selected category id.
  pub responses: BTreeMap<String, String>,
  pub scores: ScoreTally,
  pub primary: Category,
}

/// Stored assessment row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AssessmentRecord {
  pub id: String,
  pub practitioner_id: String,
  pub patient_id: String,
  pub responses: BTreeMap<String, String>,
  pub vata_score: u64,
  pub pitta_score: u64,
  pub kapha_score: u64,
  pub primary_dosha: Category,
  pub created_at: DateTime<Utc>,
}

impl AssessmentRecord {
  #[cfg(test)]
  pub fn scores(&self) -> ScoreTally {
    ScoreTally { vata: self.vata_score, pitta: self.pitta_score, kapha: self.kapha_score }
  }
}

/// Dashboard listing entry: an assessment joined with its subject.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AssessmentSummary {
  pub id: String,
  pub created_at: DateTime<Utc>,
  pub primary_dosha: Category,
  pub vata_score: u64,
  pub pitta_score: u64,
  pub kapha_score: u64,
  #[serde(rename = "patients", default)]
  pub patient: Option<SubjectRow>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubjectRow {
  pub name: String,
  pub age: u32,
  pub mobile_number: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerStats {
  pub total_patients: usize,
  pub total_assessments: usize,
  pub recent_assessments: usize,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
  /// Subject id scoped to {owner, name, contact}, if one exists.
  async fn find_subject(&self, owner_id: &str, name: &str, contact: &str) -> Result<Option<String>, RecordStoreError>;

  async fn create_subject(&self, owner_id: &str, subject: &SubjectDetails) -> Result<String, RecordStoreError>;

  async fn create_assessment(&self, assessment: &NewAssessment) -> Result<AssessmentRecord, RecordStoreError>;

  /// Newest first.
  async fn list_recent_assessments(&self, owner_id: &str, limit: usize) -> Result<Vec<AssessmentSummary>, RecordStoreError>;

  async fn owner_stats(&self, owner_id: &str, since: DateTime<Utc>) -> Result<OwnerStats, RecordStoreError>;
}

// -------- In-memory --------

#[derive(Clone, Debug)]
struct StoredSubject {
  id: String,
  owner_id: String,
  details: SubjectDetails,
}

/// Record store kept in process memory. Supports failure and latency
/// injection so callers can exercise their retry paths.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
  subjects: Arc<RwLock<Vec<StoredSubject>>>,
  assessments: Arc<RwLock<Vec<AssessmentRecord>>>,
  failures_pending: Arc<AtomicUsize>,
  latency: Option<Duration>,
}

impl InMemoryRecordStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every call by `latency`.
  #[cfg(test)]
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// Make the next `n` calls fail with a 503 rejection.
  #[cfg(test)]
  pub fn fail_next_calls(&self, n: usize) {
    self.failures_pending.store(n, Ordering::SeqCst);
  }

  #[cfg(test)]
  pub async fn assessment_count(&self) -> usize {
    self.assessments.read().await.len()
  }

  #[cfg(test)]
  pub async fn subject_count(&self) -> usize {
    self.subjects.read().await.len()
  }

  async fn gate(&self) -> Result<(), RecordStoreError> {
    if let Some(d) = self.latency {
      tokio::time::sleep(d).await;
    }
    let took = self
      .failures_pending
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    if took.is_ok() {
      return Err(RecordStoreError::Rejected { status: 503, message: "injected failure".into() });
    }
    Ok(())
  }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
  async fn find_subject(&self, owner_id: &str, name: &str, contact: &str) -> Result<Option<String>, RecordStoreError> {
    self.gate().await?;
    let subjects = self.subjects.read().await;
    Ok(subjects
      .iter()
      .find(|s| s.owner_id == owner_id && s.details.name == name && s.details.contact == contact)
      .map(|s| s.id.clone()))
  }

  async fn create_subject(&self, owner_id: &str, subject: &SubjectDetails) -> Result<String, RecordStoreError> {
    self.gate().await?;
    let id = Uuid::new_v4().to_string();
    self.subjects.write().await.push(StoredSubject {
      id: id.clone(),
      owner_id: owner_id.to_string(),
      details: subject.clone(),
    });
    Ok(id)
  }

  async fn create_assessment(&self, a: &NewAssessment) -> Result<AssessmentRecord, RecordStoreError> {
    self.gate().await?;
    let record = AssessmentRecord {
      id: Uuid::new_v4().to_string(),
      practitioner_id: a.owner_id.clone(),
      patient_id: a.subject_id.clone(),
      responses: a.responses.clone(),
      vata_score: a.scores.vata,
      pitta_score: a.scores.pitta,
      kapha_score: a.scores.kapha,
      primary_dosha: a.primary,
      created_at: Utc::now(),
    };
    self.assessments.write().await.push(record.clone());
    Ok(record)
  }

  async fn list_recent_assessments(&self, owner_id: &str, limit: usize) -> Result<Vec<AssessmentSummary>, RecordStoreError> {
    self.gate().await?;
    let subjects = self.subjects.read().await;
    let assessments = self.assessments.read().await;
    let mut rows: Vec<AssessmentSummary> = assessments
      .iter()
      .filter(|a| a.practitioner_id == owner_id)
      .map(|a| AssessmentSummary {
        id: a.id.clone(),
        created_at: a.created_at,
        primary_dosha: a.primary_dosha,
        vata_score: a.vata_score,
        pitta_score: a.pitta_score,
        kapha_score: a.kapha_score,
        patient: subjects.iter().find(|s| s.id == a.patient_id).map(|s| SubjectRow {
          name: s.details.name.clone(),
          age: s.details.age,
          mobile_number: s.details.contact.clone(),
        }),
      })
      .collect();
    // Newest insert first among equal timestamps.
    rows.reverse();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows.truncate(limit);
    Ok(rows)
  }

  async fn owner_stats(&self, owner_id: &str, since: DateTime<Utc>) -> Result<OwnerStats, RecordStoreError> {
    self.gate().await?;
    let subjects = self.subjects.read().await;
    let assessments = self.assessments.read().await;
    let own: Vec<&AssessmentRecord> = assessments.iter().filter(|a| a.practitioner_id == owner_id).collect();
    Ok(OwnerStats {
      total_patients: subjects.iter().filter(|s| s.owner_id == owner_id).count(),
      total_assessments: own.len(),
      recent_assessments: own.iter().filter(|a| a.created_at >= since).count(),
    })
  }
}

// -------- PostgREST over HTTP --------

#[derive(Clone)]
pub struct RestRecordStore {
  pub client: reqwest::Client,
  pub base_url: String,
  pub api_key: String,
}

#[derive(Deserialize)]
struct IdRow {
  id: String,
}

#[derive(Serialize)]
struct SubjectInsert<'a> {
  practitioner_id: &'a str,
  name: &'a str,
  age: u32,
  mobile_number: &'a str,
}

#[derive(Serialize)]
struct AssessmentInsert<'a> {
  practitioner_id: &'a str,
  patient_id: &'a str,
  responses: &'a BTreeMap<String, String>,
  vata_score: u64,
  pitta_score: u64,
  kapha_score: u64,
  primary_dosha: Category,
}

impl RestRecordStore {
  /// Construct the client; `None` if the HTTP client cannot be built.
  pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Option<Self> {
    let client = reqwest::Client::builder().timeout(timeout).build().ok()?;
    Some(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
      api_key: api_key.to_string(),
    })
  }

  fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
    self
      .client
      .request(method, format!("{}/{}", self.base_url, table))
      .header(USER_AGENT, "prakruti-engine/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("apikey", &self.api_key)
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
  }

  async fn send_json<T: for<'a> Deserialize<'a>>(&self, req: reqwest::RequestBuilder) -> Result<T, RecordStoreError> {
    let start = std::time::Instant::now();
    let res = req.send().await.map_err(|e| RecordStoreError::Http(e.to_string()))?;
    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = extract_error_message(&body).unwrap_or(body);
      error!(target: "records", status = status.as_u16(), elapsed = ?start.elapsed(), body = %trunc_for_log(&message, 300), "Record store rejected request");
      return Err(RecordStoreError::Rejected { status: status.as_u16(), message });
    }
    let body = res.json::<T>().await.map_err(|e| RecordStoreError::Decode(e.to_string()))?;
    info!(target: "records", elapsed = ?start.elapsed(), "Record store call succeeded");
    Ok(body)
  }

  async fn count(&self, table: &str, filters: &[(&str, String)]) -> Result<usize, RecordStoreError> {
    let mut query: Vec<(&str, String)> = vec![("select", "id".into())];
    query.extend(filters.iter().cloned());
    let rows: Vec<IdRow> = self.send_json(self.request(reqwest::Method::GET, table).query(&query)).await?;
    Ok(rows.len())
  }
}

#[async_trait]
impl RecordStore for RestRecordStore {
  #[instrument(level = "info", skip(self, name, contact), fields(%owner_id))]
  async fn find_subject(&self, owner_id: &str, name: &str, contact: &str) -> Result<Option<String>, RecordStoreError> {
    let query = [
      ("select", "id".to_string()),
      ("practitioner_id", format!("eq.{owner_id}")),
      ("name", format!("eq.{name}")),
      ("mobile_number", format!("eq.{contact}")),
      ("limit", "1".to_string()),
    ];
    let rows: Vec<IdRow> = self.send_json(self.request(reqwest::Method::GET, "patients").query(&query)).await?;
    Ok(rows.into_iter().next().map(|r| r.id))
  }

  #[instrument(level = "info", skip(self, subject), fields(%owner_id))]
  async fn create_subject(&self, owner_id: &str, subject: &SubjectDetails) -> Result<String, RecordStoreError> {
    let body = SubjectInsert {
      practitioner_id: owner_id,
      name: &subject.name,
      age: subject.age,
      mobile_number: &subject.contact,
    };
    let req = self
      .request(reqwest::Method::POST, "patients")
      .query(&[("select", "id")])
      .header("Prefer", "return=representation")
      .json(&body);
    let rows: Vec<IdRow> = self.send_json(req).await?;
    rows
      .into_iter()
      .next()
      .map(|r| r.id)
      .ok_or_else(|| RecordStoreError::Decode("empty representation for created patient".into()))
  }

  #[instrument(level = "info", skip(self, a), fields(owner_id = %a.owner_id, subject_id = %a.subject_id))]
  async fn create_assessment(&self, a: &NewAssessment) -> Result<AssessmentRecord, RecordStoreError> {
    let body = AssessmentInsert {
      practitioner_id: &a.owner_id,
      patient_id: &a.subject_id,
      responses: &a.responses,
      vata_score: a.scores.vata,
      pitta_score: a.scores.pitta,
      kapha_score: a.scores.kapha,
      primary_dosha: a.primary,
    };
    let req = self
      .request(reqwest::Method::POST, "assessments")
      .header("Prefer", "return=representation")
      .json(&body);
    let rows: Vec<AssessmentRecord> = self.send_json(req).await?;
    rows
      .into_iter()
      .next()
      .ok_or_else(|| RecordStoreError::Decode("empty representation for created assessment".into()))
  }

  #[instrument(level = "info", skip(self), fields(%owner_id, limit = limit))]
  async fn list_recent_assessments(&self, owner_id: &str, limit: usize) -> Result<Vec<AssessmentSummary>, RecordStoreError> {
    let query = [
      ("select", "id,created_at,primary_dosha,vata_score,pitta_score,kapha_score,patients(name,age,mobile_number)".to_string()),
      ("practitioner_id", format!("eq.{owner_id}")),
      ("order", "created_at.desc".to_string()),
      ("limit", limit.to_string()),
    ];
    self.send_json(self.request(reqwest::Method::GET, "assessments").query(&query)).await
  }

  #[instrument(level = "info", skip(self), fields(%owner_id))]
  async fn owner_stats(&self, owner_id: &str, since: DateTime<Utc>) -> Result<OwnerStats, RecordStoreError> {
    let owner = ("practitioner_id", format!("eq.{owner_id}"));
    let total_patients = self.count("patients", &[owner.clone()]).await?;
    let total_assessments = self.count("assessments", &[owner.clone()]).await?;
    let recent_assessments = self
      .count("assessments", &[owner, ("created_at", format!("gte.{}", since.to_rfc3339()))])
      .await?;
    Ok(OwnerStats { total_patients, total_assessments, recent_assessments })
  }
}

/// PostgREST errors look like {"message": "...", "code": "...", ...}.
fn extract_error_message(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct ErrBody {
    message: Option<String>,
  }
  serde_json::from_str::<ErrBody>(body).ok().and_then(|e| e.message)
}
