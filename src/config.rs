//! Service configuration: an optional TOML file (ASSESSMENT_CONFIG_PATH)
//! overlaid by environment variables.
//!
//! TOML schema:
//! ```toml
//! export_dir = "./exports"
//! session_ttl_secs = 1800  # idle sessions are dropped after this long
//! local_store_dir = "./sessions"  # optional; session scratch stores in memory when unset
//!
//! [record_store]
//! base_url = "https://records.example.org/rest/v1"
//! api_key = "..."
//! timeout_secs = 10
//!
//! [[questions]]            # optional full catalog override
//! id = 1
//! topic = "Physical Constitution"
//! prompt = "What is your body frame like?"
//! choices = [{ text = "Thin", category = "vata", points = 3 }]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::domain::{Category, Choice, Question};
use crate::session::DEFAULT_REMOTE_TIMEOUT;
use crate::state::DEFAULT_SESSION_TTL;

pub const DEFAULT_EXPORT_DIR: &str = "./exports";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub export_dir: Option<PathBuf>,
  #[serde(default)]
  pub session_ttl_secs: Option<u64>,
  #[serde(default)]
  pub local_store_dir: Option<PathBuf>,
  #[serde(default)]
  pub record_store: Option<RecordStoreCfg>,
  #[serde(default)]
  pub questions: Vec<QuestionCfg>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RecordStoreCfg {
  #[serde(default)] pub base_url: Option<String>,
  #[serde(default)] pub api_key: Option<String>,
  #[serde(default)] pub timeout_secs: Option<u64>,
}

/// Question entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct QuestionCfg {
  pub id: u32,
  #[serde(default)] pub topic: String,
  pub prompt: String,
  pub choices: Vec<ChoiceCfg>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChoiceCfg {
  pub text: String,
  pub category: Category,
  #[serde(default = "default_points")] pub points: u32,
}

fn default_points() -> u32 { 3 }

impl AppConfig {
  /// Catalog from `[[questions]]` if present and valid, else the built-in one.
  pub fn catalog(&self) -> Catalog {
    if self.questions.is_empty() {
      return Catalog::builtin();
    }
    let questions = self
      .questions
      .iter()
      .map(|q| Question {
        id: q.id,
        topic: q.topic.clone(),
        prompt: q.prompt.clone(),
        choices: q
          .choices
          .iter()
          .map(|c| Choice { text: c.text.clone(), category: c.category, points: c.points })
          .collect(),
      })
      .collect();
    match Catalog::new(questions) {
      Ok(catalog) => {
        info!(target: "prakruti_engine", questions = catalog.len(), "Using catalog from config");
        catalog
      }
      Err(e) => {
        error!(target: "prakruti_engine", error = %e, "Invalid question catalog in config; using built-in catalog");
        Catalog::builtin()
      }
    }
  }
}

/// Attempt to load `AppConfig` from ASSESSMENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("ASSESSMENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "prakruti_engine", %path, "Loaded assessment config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "prakruti_engine", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "prakruti_engine", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

/// Effective runtime settings after merging file and environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
  pub export_dir: PathBuf,
  pub record_store_url: Option<String>,
  pub record_store_api_key: Option<String>,
  pub remote_timeout: Duration,
  pub session_ttl: Duration,
  pub local_store_dir: Option<PathBuf>,
}

impl Settings {
  pub fn from_env(cfg: &AppConfig) -> Self {
    Self::resolve(cfg, |key| std::env::var(key).ok())
  }

  /// Env values (via `lookup`) win over file values. Empty strings count as unset.
  pub fn resolve<F>(cfg: &AppConfig, lookup: F) -> Self
  where
    F: Fn(&str) -> Option<String>,
  {
    let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let remote = cfg.record_store.clone().unwrap_or_default();

    let export_dir = env("EXPORT_DIR")
      .map(PathBuf::from)
      .or_else(|| cfg.export_dir.clone())
      .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_DIR));

    let remote_timeout = match remote.timeout_secs {
      Some(0) => {
        warn!(target: "prakruti_engine", "record_store.timeout_secs = 0 ignored; using default");
        DEFAULT_REMOTE_TIMEOUT
      }
      Some(secs) => Duration::from_secs(secs),
      None => DEFAULT_REMOTE_TIMEOUT,
    };

    let ttl_env = env("SESSION_TTL_SECS");
    let ttl_secs = match ttl_env.as_deref().map(|v| v.trim().parse::<u64>()) {
      Some(Ok(secs)) => Some(secs),
      Some(Err(e)) => {
        warn!(target: "prakruti_engine", error = %e, "SESSION_TTL_SECS is not a number; ignoring");
        cfg.session_ttl_secs
      }
      None => cfg.session_ttl_secs,
    };
    let session_ttl = match ttl_secs {
      Some(0) => {
        warn!(target: "prakruti_engine", "session_ttl_secs = 0 ignored; using default");
        DEFAULT_SESSION_TTL
      }
      Some(secs) => Duration::from_secs(secs),
      None => DEFAULT_SESSION_TTL,
    };

    Self {
      export_dir,
      session_ttl,
      local_store_dir: env("LOCAL_STORE_DIR").map(PathBuf::from).or_else(|| cfg.local_store_dir.clone()),
      record_store_url: env("RECORD_STORE_URL").or(remote.base_url),
      record_store_api_key: env("RECORD_STORE_API_KEY").or(remote.api_key),
      remote_timeout,
    }
  }
}
