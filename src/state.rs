//! Application state: question catalog, live sessions, the record store and
//! export settings.
//!
//! Each live session owns its own local store (the per-taker scratch store
//! holding `subject-details` and `raw-responses`): in memory by default, or a
//! directory per session under `local_store_dir` when one is configured. Sessions are kept
//! behind a per-entry mutex so operations on one session are serialized
//! while different sessions proceed independently.
//!
//! Sessions idle for longer than the configured TTL, finished or not, are
//! swept from the registry by a background task, taking the subject details
//! and answers they hold with them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::{load_app_config_from_env, Settings};
use crate::domain::{ClassificationResult, Identity, Response, SubjectDetails};
use crate::records::{InMemoryRecordStore, RecordStore, RestRecordStore};
use crate::session::{AssessmentSession, SessionContext};
use crate::store::{FileLocalStore, LocalStore, MemoryLocalStore};

/// A completed assessment kept for result views and exports.
#[derive(Clone, Debug)]
pub struct FinishedAssessment {
    pub subject: Option<SubjectDetails>,
    pub responses: Vec<Response>,
    pub result: ClassificationResult,
    /// Remote record id when the assessment was persisted for an owner.
    pub record_id: Option<String>,
    pub finished_at: DateTime<Utc>,
}

pub struct SessionEntry {
    pub session: AssessmentSession,
    pub local: Arc<dyn LocalStore>,
    pub finished: Option<FinishedAssessment>,
}

pub type SharedEntry = Arc<Mutex<SessionEntry>>;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Registry slot: the entry plus when it was last looked up (unix millis).
pub struct TrackedSession {
    entry: SharedEntry,
    last_seen: AtomicI64,
}

impl TrackedSession {
    fn new(entry: SharedEntry, now: DateTime<Utc>) -> Self {
        Self { entry, last_seen: AtomicI64::new(now.timestamp_millis()) }
    }

    fn touch(&self, now: DateTime<Utc>) -> SharedEntry {
        self.last_seen.fetch_max(now.timestamp_millis(), Ordering::Relaxed);
        self.entry.clone()
    }

    fn idle_at(&self, now: DateTime<Utc>) -> Duration {
        let millis = now.timestamp_millis() - self.last_seen.load(Ordering::Relaxed);
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub sessions: Arc<RwLock<HashMap<String, TrackedSession>>>,
    pub records: Arc<dyn RecordStore>,
    pub export_dir: PathBuf,
    pub remote_timeout: Duration,
    /// Idle time after which a session is dropped.
    pub session_ttl: Duration,
    /// Parent directory of file-backed session stores; memory when unset.
    pub local_store_dir: Option<PathBuf>,
}

impl AppState {
    /// Build state from env: load config, resolve settings, pick the record store.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_app_config_from_env().unwrap_or_default();
        let settings = Settings::from_env(&cfg);
        let catalog = cfg.catalog();

        let rest = match (&settings.record_store_url, &settings.record_store_api_key) {
            (Some(url), Some(key)) => RestRecordStore::new(url, key, settings.remote_timeout),
            _ => None,
        };
        let records: Arc<dyn RecordStore> = match rest {
            Some(r) => {
                info!(target: "prakruti_engine", base_url = %r.base_url, "Remote record store enabled.");
                Arc::new(r)
            }
            None => {
                info!(target: "prakruti_engine", "No RECORD_STORE_URL/RECORD_STORE_API_KEY. Using in-memory record store.");
                Arc::new(InMemoryRecordStore::new())
            }
        };

        info!(
            target: "prakruti_engine",
            questions = catalog.len(),
            export_dir = %settings.export_dir.display(),
            remote_timeout = ?settings.remote_timeout,
            session_ttl = ?settings.session_ttl,
            "Startup configuration"
        );
        let mut state = Self::with_parts(catalog, records, settings.export_dir, settings.remote_timeout)
            .with_session_ttl(settings.session_ttl);
        state.local_store_dir = settings.local_store_dir;
        state
    }

    pub fn with_parts(
        catalog: Catalog,
        records: Arc<dyn RecordStore>,
        export_dir: PathBuf,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            records,
            export_dir,
            remote_timeout,
            session_ttl: DEFAULT_SESSION_TTL,
            local_store_dir: None,
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Create a session with a fresh local store. Returns its id and entry.
    #[instrument(level = "debug", skip(self), fields(authenticated = identity.is_some()))]
    pub async fn open_session(&self, identity: Option<Identity>) -> (String, SharedEntry) {
        let id = Uuid::new_v4().to_string();
        let local: Arc<dyn LocalStore> = match &self.local_store_dir {
            Some(dir) => Arc::new(FileLocalStore::new(dir.join(&id))),
            None => Arc::new(MemoryLocalStore::new()),
        };
        let ctx = SessionContext {
            identity,
            records: self.records.clone(),
            local: local.clone(),
            remote_timeout: self.remote_timeout,
        };
        let entry = Arc::new(Mutex::new(SessionEntry {
            session: AssessmentSession::new(self.catalog.clone(), ctx),
            local,
            finished: None,
        }));
        self.sessions
            .write()
            .await
            .insert(id.clone(), TrackedSession::new(entry.clone(), Utc::now()));
        (id, entry)
    }

    /// Look a session up and mark it as active.
    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn get_session(&self, id: &str) -> Option<SharedEntry> {
        self.sessions.read().await.get(id).map(|t| t.touch(Utc::now()))
    }

    pub async fn drop_session(&self, id: &str) {
        self.sessions.write().await.remove(id);
        self.discard_local(id).await;
    }

    /// Remove a file-backed session store from disk.
    async fn discard_local(&self, id: &str) {
        let Some(dir) = &self.local_store_dir else { return };
        match tokio::fs::remove_dir_all(dir.join(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(target: "assessment", session_id = %id, error = %e, "Failed to remove session store"),
        }
    }

    /// Drop every session idle for longer than the TTL as of `now`.
    /// Sessions whose entry is locked by an in-flight operation are kept.
    #[instrument(level = "debug", skip(self, now))]
    pub async fn sweep_idle_sessions(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.session_ttl;
        let mut evicted = Vec::new();
        let remaining = {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|id, t| {
                let keep = t.idle_at(now) <= ttl || t.entry.try_lock().is_err();
                if !keep {
                    evicted.push(id.clone());
                }
                keep
            });
            sessions.len()
        };
        for id in &evicted {
            self.discard_local(id).await;
        }
        if !evicted.is_empty() {
            info!(target: "assessment", evicted = evicted.len(), remaining, "Idle sessions dropped");
        }
        evicted.len()
    }

    /// Sweep idle sessions periodically for the life of the process.
    pub fn spawn_session_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let every = self.session_ttl.clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let evicted = self.sweep_idle_sessions(Utc::now()).await;
                debug!(target: "assessment", evicted, "Session sweep finished");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn state(ttl: Duration) -> AppState {
        AppState::with_parts(
            Catalog::builtin(),
            Arc::new(InMemoryRecordStore::new()),
            PathBuf::from("./unused"),
            Duration::from_secs(1),
        )
        .with_session_ttl(ttl)
    }

    #[tokio::test]
    async fn idle_sessions_are_swept() {
        let state = state(Duration::from_secs(60));
        let (id, _) = state.open_session(None).await;

        assert_eq!(state.sweep_idle_sessions(Utc::now()).await, 0);
        assert!(state.get_session(&id).await.is_some());

        let later = Utc::now() + ChronoDuration::seconds(61);
        assert_eq!(state.sweep_idle_sessions(later).await, 1);
        assert!(state.get_session(&id).await.is_none());
        assert!(state.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn lookups_keep_a_session_alive() {
        let state = state(Duration::from_secs(60));
        let (id, _) = state.open_session(None).await;
        let (stale, _) = state.open_session(None).await;

        let start = Utc::now();
        if let Some(tracked) = state.sessions.read().await.get(&id) {
            tracked.touch(start + ChronoDuration::seconds(50));
        }

        assert_eq!(state.sweep_idle_sessions(start + ChronoDuration::seconds(90)).await, 1);
        assert!(state.get_session(&id).await.is_some());
        assert!(state.get_session(&stale).await.is_none());
    }

    #[tokio::test]
    async fn file_backed_stores_are_removed_with_their_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut state = state(Duration::from_secs(60));
        state.local_store_dir = Some(dir.path().to_path_buf());

        let (id, entry) = state.open_session(None).await;
        entry
            .lock()
            .await
            .local
            .put("scratch-key", serde_json::json!({ "ok": true }))
            .await
            .unwrap();
        assert!(dir.path().join(&id).join("scratch-key.json").exists());

        let (dropped, _) = state.open_session(None).await;
        state.drop_session(&dropped).await;

        let later = Utc::now() + ChronoDuration::seconds(61);
        assert_eq!(state.sweep_idle_sessions(later).await, 1);
        assert!(!dir.path().join(&id).exists());
    }

    #[tokio::test]
    async fn busy_sessions_survive_a_sweep() {
        let state = state(Duration::from_secs(1));
        let (id, entry) = state.open_session(None).await;
        let guard = entry.lock().await;
        let later = Utc::now() + ChronoDuration::seconds(10);
        assert_eq!(state.sweep_idle_sessions(later).await, 0);
        drop(guard);
        assert_eq!(state.sweep_idle_sessions(later).await, 1);
        assert!(state.get_session(&id).await.is_none());
    }
}
