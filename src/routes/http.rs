//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented; failures are mapped to `{ error, retryable }`.

use std::sync::Arc;
use axum::{
  extract::{rejection::JsonRejection, Path, Query, State},
  http::{header, HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::Identity;
use crate::error::{ServiceError, SessionError, ValidationError};
use crate::export::{ExportError, ExportFormat};
use crate::logic;
use crate::protocol::*;
use crate::state::AppState;

/// Header carrying the authenticated owner id, set by the identity proxy.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Identity from `x-owner-id`, if present and non-empty.
pub fn identity_from(headers: &HeaderMap) -> Option<Identity> {
  headers
    .get(OWNER_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(|owner_id| Identity { owner_id: owner_id.to_string() })
}

#[derive(Serialize)]
struct ViolationOut<'a> {
  field: &'a str,
  message: &'a str,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
  #[serde(flatten)]
  base: ErrorOut,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  fields: Vec<ViolationOut<'a>>,
}

pub fn status_for(err: &ServiceError) -> StatusCode {
  match err {
    ServiceError::UnknownSession(_) => StatusCode::NOT_FOUND,
    ServiceError::NotFinished(_) => StatusCode::CONFLICT,
    ServiceError::Unauthenticated => StatusCode::UNAUTHORIZED,
    ServiceError::Session(SessionError::Persistence(_)) | ServiceError::Records(_) => StatusCode::BAD_GATEWAY,
    ServiceError::Session(SessionError::LocalStore(_)) | ServiceError::LocalStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
    ServiceError::Session(_) => StatusCode::BAD_REQUEST,
    ServiceError::Export(ExportError::UnsupportedFormat(_)) => StatusCode::BAD_REQUEST,
    ServiceError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl IntoResponse for ServiceError {
  fn into_response(self) -> Response {
    let status = status_for(&self);
    if status.is_server_error() {
      warn!(target: "prakruti_engine", %status, error = %self, "Request failed");
    }
    let fields = match &self {
      ServiceError::Session(SessionError::Validation(v)) => v
        .violations()
        .iter()
        .map(|v| ViolationOut { field: v.field, message: &v.message })
        .collect(),
      _ => Vec::new(),
    };
    let body = ErrorBody {
      base: ErrorOut { error: self.to_string(), retryable: self.is_retryable() },
      fields,
    };
    (status, Json(body)).into_response()
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::catalog(&state))
}

/// Open a session. Field problems (including absent or mistyped fields) come
/// back as a 400 listing every violated field.
#[instrument(level = "info", skip(state, headers, payload), fields(authenticated = headers.contains_key(OWNER_HEADER)))]
pub async fn http_create_session(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  payload: Result<Json<SubjectForm>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
  let subject = match payload {
    Ok(Json(form)) => form.into_subject(),
    Err(rejection) => {
      warn!(target: "assessment", reason = %rejection.body_text(), "Unreadable subject details");
      return Err(SessionError::from(ValidationError::missing_subject()).into());
    }
  };
  let view = logic::create_session(&state, &subject, identity_from(&headers)).await?;
  info!(target: "assessment", session_id = %view.session_id, "HTTP session created");
  Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionView>, ServiceError> {
  Ok(Json(logic::get_view(&state, &id).await?))
}

#[instrument(level = "info", skip(state, body), fields(choice_index = body.choice_index))]
pub async fn http_select(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<SelectIn>,
) -> Result<Json<SessionView>, ServiceError> {
  Ok(Json(logic::select(&state, &id, body.choice_index).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_next(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionView>, ServiceError> {
  Ok(Json(logic::next(&state, &id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_previous(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionView>, ServiceError> {
  Ok(Json(logic::previous(&state, &id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_complete(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionView>, ServiceError> {
  Ok(Json(logic::complete(&state, &id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_result(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<ResultOut>, ServiceError> {
  Ok(Json(logic::result(&state, &id).await?))
}

/// Report download. `format` defaults to `pdf`.
#[instrument(level = "info", skip(state, q), fields(format = q.format.as_deref().unwrap_or("pdf")))]
pub async fn http_export(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Query(q): Query<ExportQuery>,
) -> Result<Response, ServiceError> {
  let format: ExportFormat = q.format.as_deref().unwrap_or("pdf").parse()?;
  let (file_name, bytes) = logic::export_bytes(&state, &id, format, Utc::now()).await?;
  let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', ""));
  Ok((
    [
      (header::CONTENT_TYPE, format.content_type().to_string()),
      (header::CONTENT_DISPOSITION, disposition),
    ],
    bytes,
  )
    .into_response())
}

#[instrument(level = "info", skip(state, headers))]
pub async fn http_dashboard(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
) -> Result<Json<DashboardOut>, ServiceError> {
  let identity = identity_from(&headers).ok_or(ServiceError::Unauthenticated)?;
  Ok(Json(logic::dashboard(&state, &identity, Utc::now()).await?))
}
