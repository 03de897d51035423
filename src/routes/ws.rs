//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, error, info, instrument};

use crate::domain::Identity;
use crate::error::ServiceError;
use crate::export::ExportFormat;
use crate::logic;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "prakruti_engine", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "prakruti_engine", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        // Parse, dispatch, serialize response.
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "prakruti_engine", kind = message_kind(&incoming), "WS received");
            handle_client_ws(incoming, &state).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e), retryable: false },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e), "retryable": false }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "prakruti_engine", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "prakruti_engine", "WebSocket disconnected");
}

/// Message tag for logs; payloads carry subject details and are not logged.
fn message_kind(msg: &ClientWsMessage) -> &'static str {
  match msg {
    ClientWsMessage::Ping => "ping",
    ClientWsMessage::StartSession { .. } => "start_session",
    ClientWsMessage::GetSession { .. } => "get_session",
    ClientWsMessage::Select { .. } => "select",
    ClientWsMessage::Next { .. } => "next",
    ClientWsMessage::Previous { .. } => "previous",
    ClientWsMessage::Complete { .. } => "complete",
    ClientWsMessage::Result { .. } => "result",
    ClientWsMessage::Export { .. } => "export",
    ClientWsMessage::Catalog => "catalog",
    ClientWsMessage::Dashboard { .. } => "dashboard",
  }
}

fn error_reply(e: ServiceError) -> ServerWsMessage {
  ServerWsMessage::Error { retryable: e.is_retryable(), message: e.to_string() }
}

fn session_reply(res: Result<crate::protocol::SessionView, ServiceError>) -> ServerWsMessage {
  match res {
    Ok(session) => ServerWsMessage::Session { session },
    Err(e) => error_reply(e),
  }
}

#[instrument(level = "info", skip_all, fields(kind = message_kind(&msg)))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::StartSession { subject, owner_id } => {
      let identity = owner_id
        .filter(|o| !o.trim().is_empty())
        .map(|owner_id| Identity { owner_id });
      session_reply(logic::create_session(state, &subject.into_subject(), identity).await)
    }

    ClientWsMessage::GetSession { session_id } => session_reply(logic::get_view(state, &session_id).await),

    ClientWsMessage::Select { session_id, choice_index } =>
      session_reply(logic::select(state, &session_id, choice_index).await),

    ClientWsMessage::Next { session_id } => session_reply(logic::next(state, &session_id).await),

    ClientWsMessage::Previous { session_id } => session_reply(logic::previous(state, &session_id).await),

    ClientWsMessage::Complete { session_id } => session_reply(logic::complete(state, &session_id).await),

    ClientWsMessage::Result { session_id } => match logic::result(state, &session_id).await {
      Ok(result) => ServerWsMessage::Result { result },
      Err(e) => error_reply(e),
    },

    ClientWsMessage::Export { session_id, format } => {
      let format = match format.parse::<ExportFormat>() {
        Ok(f) => f,
        Err(e) => return error_reply(e.into()),
      };
      match logic::export_to_dir(state, &session_id, format, Utc::now()).await {
        Ok(outcome) => {
          info!(target: "export", ok = outcome.ok, file_name = %outcome.file_name, "WS export handled");
          ServerWsMessage::Exported { outcome }
        }
        Err(e) => error_reply(e),
      }
    }

    ClientWsMessage::Catalog => ServerWsMessage::Catalog { catalog: logic::catalog(state) },

    ClientWsMessage::Dashboard { owner_id } => {
      if owner_id.trim().is_empty() {
        return error_reply(ServiceError::Unauthenticated);
      }
      match logic::dashboard(state, &Identity { owner_id }, Utc::now()).await {
        Ok(dashboard) => ServerWsMessage::Dashboard { dashboard },
        Err(e) => error_reply(e),
      }
    }
  }
}
