//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Opening a session from subject details and driving it question by question
//!   - Finishing a session (remote persistence or local hand-off) and scoring it
//!   - Rendering or writing reports for finished sessions
//!   - The owner dashboard (recent assessments + counts)

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, instrument, warn};

use crate::domain::{Identity, SubjectDetails};
use crate::error::ServiceError;
use crate::export::{self, ExportFormat, ExportOutcome, Report};
use crate::protocol::{CatalogOut, DashboardOut, ResultOut, SessionView};
use crate::records::RecordStoreError;
use crate::scoring::evaluate;
use crate::session::{Advance, Completion};
use crate::state::{AppState, FinishedAssessment, SessionEntry, SharedEntry};
use crate::store::save_subject_details;

pub const DASHBOARD_RECENT_LIMIT: usize = 10;
pub const DASHBOARD_RECENT_DAYS: i64 = 7;

pub fn view(session_id: &str, entry: &SessionEntry) -> SessionView {
  let s = &entry.session;
  SessionView {
    session_id: session_id.to_string(),
    state: s.state(),
    total: s.catalog().len(),
    answered: s.responses().count(),
    question: s.current_question().cloned(),
    selected_choice: s.current_question().zip(s.current_response()).and_then(|(q, r)| {
      q.choices.iter().position(|c| *c == r.selected_option)
    }),
    can_advance: s.can_advance(),
    finished: entry.finished.is_some(),
  }
}

async fn entry_for(state: &AppState, session_id: &str) -> Result<SharedEntry, ServiceError> {
  state
    .get_session(session_id)
    .await
    .ok_or_else(|| ServiceError::UnknownSession(session_id.to_string()))
}

/// Store the subject details in a fresh session's local store and start it.
/// A session that refuses to start is discarded.
#[instrument(level = "info", skip(state, subject), fields(authenticated = identity.is_some()))]
pub async fn create_session(
  state: &AppState,
  subject: &SubjectDetails,
  identity: Option<Identity>,
) -> Result<SessionView, ServiceError> {
  let (id, entry) = state.open_session(identity).await;
  let started = {
    let mut guard = entry.lock().await;
    let res = start_entry(&mut guard, subject).await;
    res.map(|()| view(&id, &guard))
  };
  match started {
    Ok(v) => {
      info!(target: "assessment", session_id = %id, "Session opened");
      Ok(v)
    }
    Err(e) => {
      state.drop_session(&id).await;
      warn!(target: "assessment", error = %e, "Session refused to start");
      Err(e)
    }
  }
}

async fn start_entry(entry: &mut SessionEntry, subject: &SubjectDetails) -> Result<(), ServiceError> {
  save_subject_details(entry.local.as_ref(), subject).await?;
  entry.session.start().await?;
  Ok(())
}

#[instrument(level = "debug", skip(state))]
pub async fn get_view(state: &AppState, session_id: &str) -> Result<SessionView, ServiceError> {
  let entry = entry_for(state, session_id).await?;
  let guard = entry.lock().await;
  Ok(view(session_id, &guard))
}

#[instrument(level = "info", skip(state))]
pub async fn select(state: &AppState, session_id: &str, choice_index: usize) -> Result<SessionView, ServiceError> {
  let entry = entry_for(state, session_id).await?;
  let mut guard = entry.lock().await;
  guard.session.select_option(choice_index)?;
  Ok(view(session_id, &guard))
}

/// Advance; moving past the last question completes the session.
#[instrument(level = "info", skip(state))]
pub async fn next(state: &AppState, session_id: &str) -> Result<SessionView, ServiceError> {
  let entry = entry_for(state, session_id).await?;
  let mut guard = entry.lock().await;
  if let Advance::ReadyToComplete = guard.session.next()? {
    finish(&mut guard).await?;
  }
  Ok(view(session_id, &guard))
}

#[instrument(level = "info", skip(state))]
pub async fn previous(state: &AppState, session_id: &str) -> Result<SessionView, ServiceError> {
  let entry = entry_for(state, session_id).await?;
  let mut guard = entry.lock().await;
  guard.session.previous()?;
  Ok(view(session_id, &guard))
}

/// Run (or retry) completion. Already finished sessions are left as they are.
#[instrument(level = "info", skip(state))]
pub async fn complete(state: &AppState, session_id: &str) -> Result<SessionView, ServiceError> {
  let entry = entry_for(state, session_id).await?;
  let mut guard = entry.lock().await;
  if guard.finished.is_none() {
    finish(&mut guard).await?;
  }
  Ok(view(session_id, &guard))
}

async fn finish(entry: &mut SessionEntry) -> Result<(), ServiceError> {
  let finished = match entry.session.complete().await? {
    Completion::Persisted { subject, responses, record } => FinishedAssessment {
      result: evaluate(&responses),
      subject: Some(subject),
      responses,
      record_id: Some(record.id),
      finished_at: record.created_at,
    },
    Completion::StoredLocally { subject, responses } => FinishedAssessment {
      result: evaluate(&responses),
      subject: Some(subject),
      responses,
      record_id: None,
      finished_at: Utc::now(),
    },
  };
  info!(
    target: "assessment",
    primary = %finished.result.primary,
    constitution = %finished.result.constitution,
    persisted = finished.record_id.is_some(),
    "Assessment finished"
  );
  entry.finished = Some(finished);
  Ok(())
}

async fn finished_for(state: &AppState, session_id: &str) -> Result<FinishedAssessment, ServiceError> {
  let entry = entry_for(state, session_id).await?;
  let guard = entry.lock().await;
  guard
    .finished
    .clone()
    .ok_or_else(|| ServiceError::NotFinished(session_id.to_string()))
}

#[instrument(level = "info", skip(state))]
pub async fn result(state: &AppState, session_id: &str) -> Result<ResultOut, ServiceError> {
  let f = finished_for(state, session_id).await?;
  Ok(ResultOut {
    session_id: session_id.to_string(),
    primary_percentage: f.result.primary_percentage().map(|p| p.round() as u64),
    result: f.result,
    subject: f.subject,
    record_id: f.record_id,
    finished_at: f.finished_at,
  })
}

/// Rendered report bytes plus the file name to offer them under.
#[instrument(level = "info", skip(state, generated_at))]
pub async fn export_bytes(
  state: &AppState,
  session_id: &str,
  format: ExportFormat,
  generated_at: DateTime<Utc>,
) -> Result<(String, Vec<u8>), ServiceError> {
  let f = finished_for(state, session_id).await?;
  let report = Report {
    result: &f.result,
    subject: f.subject.as_ref(),
    responses: &f.responses,
    total_questions: state.catalog.len(),
    generated_at,
  };
  let bytes = export::render(format, &report)?;
  info!(target: "export", %format, bytes = bytes.len(), "Report rendered");
  Ok((report.file_name(format), bytes))
}

/// Write the report under the configured export directory.
#[instrument(level = "info", skip(state, generated_at))]
pub async fn export_to_dir(
  state: &AppState,
  session_id: &str,
  format: ExportFormat,
  generated_at: DateTime<Utc>,
) -> Result<ExportOutcome, ServiceError> {
  let f = finished_for(state, session_id).await?;
  let report = Report {
    result: &f.result,
    subject: f.subject.as_ref(),
    responses: &f.responses,
    total_questions: state.catalog.len(),
    generated_at,
  };
  Ok(export::write_report(format, &report, &state.export_dir).await)
}

pub fn catalog(state: &AppState) -> CatalogOut {
  CatalogOut {
    total: state.catalog.len(),
    questions: state.catalog.questions().to_vec(),
  }
}

/// Recent assessments and counts for one owner.
#[instrument(level = "info", skip(state, identity, now))]
pub async fn dashboard(state: &AppState, identity: &Identity, now: DateTime<Utc>) -> Result<DashboardOut, ServiceError> {
  let owner = identity.owner_id.as_str();
  let after = state.remote_timeout;
  let since = now - ChronoDuration::days(DASHBOARD_RECENT_DAYS);

  let recent = tokio::time::timeout(after, state.records.list_recent_assessments(owner, DASHBOARD_RECENT_LIMIT))
    .await
    .map_err(|_| RecordStoreError::Timeout { operation: "list_recent_assessments", after })??;
  let stats = tokio::time::timeout(after, state.records.owner_stats(owner, since))
    .await
    .map_err(|_| RecordStoreError::Timeout { operation: "owner_stats", after })??;

  info!(target: "assessment", recent = recent.len(), total = stats.total_assessments, "Dashboard served");
  Ok(DashboardOut { stats, recent })
}
