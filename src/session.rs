//! Assessment session state machine.
//!
//! ```text
//! AwaitingSubjectDetails --start--> Presenting(0)
//! Presenting(i) --next/previous--> Presenting(j)
//! Presenting(last) --next--> Completing
//! Completing --complete ok--> Done
//! Completing --complete err--> Completing (answers kept, caller may retry)
//! ```
//!
//! The session owns the in-progress answers. On a successful completion it
//! hands them (and the subject details) to the caller and keeps nothing.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::catalog::Catalog;
use crate::domain::{Identity, Question, Response, SubjectDetails};
use crate::error::{SessionError, ValidationError};
use crate::records::{AssessmentRecord, NewAssessment, RecordStore, RecordStoreError};
use crate::scoring::{aggregate, rank};
use crate::store::{load_raw_responses, load_subject_details, save_raw_responses, LocalStore};

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    AwaitingSubjectDetails,
    Presenting { index: usize },
    Completing,
    Done,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::AwaitingSubjectDetails => "awaiting subject details",
            SessionState::Presenting { .. } => "presenting questions",
            SessionState::Completing => "completing",
            SessionState::Done => "done",
        }
    }
}

/// Collaborators injected into a session.
#[derive(Clone)]
pub struct SessionContext {
    /// Present when an authenticated user drives the session.
    pub identity: Option<Identity>,
    pub records: Arc<dyn RecordStore>,
    pub local: Arc<dyn LocalStore>,
    /// Deadline for each remote call made while completing.
    pub remote_timeout: Duration,
}

/// Result of `next()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    Moved { index: usize },
    /// The last question was answered; the session is now `Completing`.
    ReadyToComplete,
}

/// What a successful completion handed off.
#[derive(Clone, Debug)]
pub enum Completion {
    /// Saved remotely for the authenticated owner.
    Persisted {
        subject: SubjectDetails,
        responses: Vec<Response>,
        record: AssessmentRecord,
    },
    /// Written to the local store under `raw-responses`, then read back
    /// through the typed boundary for the reporting step.
    StoredLocally {
        subject: SubjectDetails,
        responses: Vec<Response>,
    },
}

pub struct AssessmentSession {
    catalog: Arc<Catalog>,
    ctx: SessionContext,
    subject: Option<SubjectDetails>,
    responses: BTreeMap<u32, Response>,
    state: SessionState,
}

impl AssessmentSession {
    pub fn new(catalog: Arc<Catalog>, ctx: SessionContext) -> Self {
        Self {
            catalog,
            ctx,
            subject: None,
            responses: BTreeMap::new(),
            state: SessionState::AwaitingSubjectDetails,
        }
    }

    /// Read subject details from the local store and present the first question.
    /// Refuses to start when they are missing or invalid.
    #[instrument(level = "info", skip(self), fields(authenticated = self.ctx.identity.is_some()))]
    pub async fn start(&mut self) -> Result<&Question, SessionError> {
        if self.state != SessionState::AwaitingSubjectDetails {
            return Err(self.invalid("start"));
        }
        let subject = load_subject_details(self.ctx.local.as_ref())
            .await?
            .ok_or_else(ValidationError::missing_subject)?;
        subject.validate()?;

        self.subject = Some(subject);
        self.state = SessionState::Presenting { index: 0 };
        info!(target: "assessment", questions = self.catalog.len(), "Assessment started");
        self.current_question().ok_or_else(|| self.invalid("start"))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Answers recorded so far, ordered by question id.
    pub fn responses(&self) -> impl Iterator<Item = &Response> {
        self.responses.values()
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            SessionState::Presenting { index } => Some(index),
            _ => None,
        }
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.current_index().and_then(|i| self.catalog.at(i))
    }

    pub fn current_response(&self) -> Option<&Response> {
        self.current_question()
            .and_then(|q| self.responses.get(&q.id))
    }

    /// Record (or replace) the answer to the current question.
    pub fn select_option(&mut self, choice_index: usize) -> Result<&Response, SessionError> {
        let question = self
            .current_question()
            .ok_or_else(|| self.invalid("select an option"))?;
        let choice = question
            .choices
            .get(choice_index)
            .ok_or(SessionError::UnknownChoice {
                question_id: question.id,
                index: choice_index,
            })?
            .clone();
        let question_id = question.id;

        let slot = self.responses.entry(question_id).or_insert(Response {
            question_id,
            selected_option: choice.clone(),
        });
        slot.selected_option = choice;
        Ok(slot)
    }

    /// True iff the current question has an answer.
    pub fn can_advance(&self) -> bool {
        self.current_response().is_some()
    }

    pub fn next(&mut self) -> Result<Advance, SessionError> {
        let index = self.current_index().ok_or_else(|| self.invalid("advance"))?;
        if !self.can_advance() {
            let question_id = self.catalog.at(index).map(|q| q.id).unwrap_or_default();
            return Err(SessionError::IncompleteAnswer { question_id });
        }
        if index + 1 < self.catalog.len() {
            self.state = SessionState::Presenting { index: index + 1 };
            Ok(Advance::Moved { index: index + 1 })
        } else {
            self.state = SessionState::Completing;
            Ok(Advance::ReadyToComplete)
        }
    }

    /// Step back one question; stays on the first question.
    pub fn previous(&mut self) -> Result<usize, SessionError> {
        let index = self.current_index().ok_or_else(|| self.invalid("go back"))?;
        let index = index.saturating_sub(1);
        self.state = SessionState::Presenting { index };
        Ok(index)
    }

    /// Hand the answers off: to the record store when an identity is present,
    /// otherwise to the local store (and read them back from it). On any
    /// failure the session stays in `Completing` with every answer intact.
    #[instrument(level = "info", skip(self), fields(authenticated = self.ctx.identity.is_some(), answers = self.responses.len()))]
    pub async fn complete(&mut self) -> Result<Completion, SessionError> {
        if self.state != SessionState::Completing {
            return Err(self.invalid("complete"));
        }
        if let Some(q) = self
            .catalog
            .questions()
            .iter()
            .find(|q| !self.responses.contains_key(&q.id))
        {
            return Err(SessionError::IncompleteAnswer { question_id: q.id });
        }
        let subject = self
            .subject
            .clone()
            .ok_or_else(ValidationError::missing_subject)?;
        let responses: Vec<Response> = self.responses.values().cloned().collect();

        let completion = match self.ctx.identity.clone() {
            Some(identity) => {
                let record = self.persist_remote(&identity, &subject, &responses).await?;
                info!(target: "assessment", record_id = %record.id, "Assessment persisted remotely");
                Completion::Persisted { subject, responses, record }
            }
            None => {
                let local = self.ctx.local.as_ref();
                save_raw_responses(local, &responses).await?;
                let stored = load_raw_responses(local, &self.catalog).await?;
                let subject = load_subject_details(local).await?.unwrap_or(subject);
                info!(target: "assessment", "Assessment stored locally for reporting");
                Completion::StoredLocally { subject, responses: stored }
            }
        };

        self.responses.clear();
        self.subject = None;
        self.state = SessionState::Done;
        Ok(completion)
    }

    async fn persist_remote(
        &self,
        identity: &Identity,
        subject: &SubjectDetails,
        responses: &[Response],
    ) -> Result<AssessmentRecord, SessionError> {
        let records = self.ctx.records.as_ref();
        let owner = identity.owner_id.as_str();

        let existing = self
            .bounded("find_subject", records.find_subject(owner, &subject.name, &subject.contact))
            .await?;
        let subject_id = match existing {
            Some(id) => id,
            None => {
                self.bounded("create_subject", records.create_subject(owner, subject))
                    .await?
            }
        };

        let scores = aggregate(responses);
        let new = NewAssessment {
            owner_id: owner.to_string(),
            subject_id,
            responses: responses
                .iter()
                .map(|r| (r.question_id.to_string(), r.selected_option.category.id().to_string()))
                .collect(),
            scores,
            primary: rank(&scores)[0].0,
        };
        Ok(self
            .bounded("create_assessment", records.create_assessment(&new))
            .await?)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, RecordStoreError>
    where
        F: Future<Output = Result<T, RecordStoreError>>,
    {
        let after = self.ctx.remote_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(target: "assessment", operation, ?after, "Remote call timed out");
                Err(RecordStoreError::Timeout { operation, after })
            }
        }
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            operation,
            state: self.state.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use crate::records::InMemoryRecordStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::store::{save_subject_details, LocalStoreError, MemoryLocalStore, RAW_RESPONSES_KEY};

    fn subject() -> SubjectDetails {
        SubjectDetails {
            name: "Asha Rao".into(),
            age: 34,
            contact: "9876543210".into(),
        }
    }

    struct Fixture {
        session: AssessmentSession,
        local: Arc<MemoryLocalStore>,
        records: InMemoryRecordStore,
    }

    async fn fixture(identity: Option<&str>, records: InMemoryRecordStore, timeout: Duration) -> Fixture {
        let local = Arc::new(MemoryLocalStore::new());
        save_subject_details(local.as_ref(), &subject()).await.unwrap();
        let ctx = SessionContext {
            identity: identity.map(|id| Identity { owner_id: id.into() }),
            records: Arc::new(records.clone()),
            local: local.clone(),
            remote_timeout: timeout,
        };
        let mut session = AssessmentSession::new(Arc::new(Catalog::builtin()), ctx);
        session.start().await.unwrap();
        Fixture { session, local, records }
    }

    async fn anonymous() -> Fixture {
        fixture(None, InMemoryRecordStore::new(), DEFAULT_REMOTE_TIMEOUT).await
    }

    fn answer_all(session: &mut AssessmentSession, choice: usize) {
        loop {
            session.select_option(choice).unwrap();
            if session.next().unwrap() == Advance::ReadyToComplete {
                break;
            }
        }
    }

    #[tokio::test]
    async fn refuses_to_start_without_subject_details() {
        let ctx = SessionContext {
            identity: None,
            records: Arc::new(InMemoryRecordStore::new()),
            local: Arc::new(MemoryLocalStore::new()),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        };
        let mut session = AssessmentSession::new(Arc::new(Catalog::builtin()), ctx);
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert_eq!(session.state(), SessionState::AwaitingSubjectDetails);
    }

    #[tokio::test]
    async fn refuses_to_start_with_invalid_subject_details() {
        let local = Arc::new(MemoryLocalStore::new());
        let mut bad = subject();
        bad.age = 0;
        save_subject_details(local.as_ref(), &bad).await.unwrap();
        let ctx = SessionContext {
            identity: None,
            records: Arc::new(InMemoryRecordStore::new()),
            local,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        };
        let mut session = AssessmentSession::new(Arc::new(Catalog::builtin()), ctx);
        match session.start().await {
            Err(SessionError::Validation(v)) => assert_eq!(v.violations()[0].field, "age"),
            other => panic!("expected validation error, got {:?}", other.map(|q| q.id)),
        }
    }

    #[tokio::test]
    async fn reselecting_replaces_the_answer() {
        let mut f = anonymous().await;
        f.session.select_option(0).unwrap();
        f.session.select_option(2).unwrap();
        let answers: Vec<&Response> = f.session.responses().collect();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].question_id, 1);
        assert_eq!(answers[0].selected_option.category, Category::Kapha);
    }

    #[tokio::test]
    async fn unknown_choice_is_rejected() {
        let mut f = anonymous().await;
        assert!(matches!(
            f.session.select_option(3),
            Err(SessionError::UnknownChoice { question_id: 1, index: 3 })
        ));
        assert!(!f.session.can_advance());
    }

    #[tokio::test]
    async fn cannot_advance_without_an_answer() {
        let mut f = anonymous().await;
        assert!(!f.session.can_advance());
        assert!(matches!(
            f.session.next(),
            Err(SessionError::IncompleteAnswer { question_id: 1 })
        ));
        assert_eq!(f.session.state(), SessionState::Presenting { index: 0 });
    }

    #[tokio::test]
    async fn last_question_unanswered_does_not_complete() {
        let mut f = anonymous().await;
        for _ in 0..17 {
            f.session.select_option(1).unwrap();
            f.session.next().unwrap();
        }
        assert_eq!(f.session.current_index(), Some(17));
        assert!(!f.session.can_advance());
        assert!(f.session.next().is_err());
        assert_eq!(f.session.state(), SessionState::Presenting { index: 17 });
    }

    #[tokio::test]
    async fn previous_stops_at_first_question_and_keeps_answers() {
        let mut f = anonymous().await;
        assert_eq!(f.session.previous().unwrap(), 0);
        f.session.select_option(0).unwrap();
        f.session.next().unwrap();
        assert_eq!(f.session.previous().unwrap(), 0);
        assert!(f.session.can_advance());
    }

    #[tokio::test]
    async fn anonymous_completion_writes_local_store() {
        let mut f = anonymous().await;
        answer_all(&mut f.session, 0);
        assert_eq!(f.session.state(), SessionState::Completing);
        assert!(f.session.select_option(0).is_err());

        let completion = f.session.complete().await.unwrap();
        match completion {
            Completion::StoredLocally { subject: s, responses } => {
                assert_eq!(s, subject());
                assert_eq!(responses.len(), 18);
            }
            other => panic!("expected local hand-off, got {other:?}"),
        }
        assert_eq!(f.session.state(), SessionState::Done);
        assert_eq!(f.session.responses().count(), 0);

        let stored = load_raw_responses(f.local.as_ref(), &Catalog::builtin()).await.unwrap();
        assert_eq!(stored.len(), 18);
        assert_eq!(f.records.assessment_count().await, 0);
    }

    /// Memory store whose next `n` reads of `raw-responses` fail.
    struct FlakyReads {
        inner: MemoryLocalStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl LocalStore for FlakyReads {
        async fn put(&self, key: &str, value: Value) -> Result<(), LocalStoreError> {
            self.inner.put(key, value).await
        }

        async fn get(&self, key: &str) -> Result<Option<Value>, LocalStoreError> {
            let fail = key == RAW_RESPONSES_KEY
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if fail {
                return Err(LocalStoreError::Io("disk unavailable".into()));
            }
            self.inner.get(key).await
        }

        async fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn failed_local_read_back_keeps_answers_and_allows_retry() {
        let local = Arc::new(FlakyReads { inner: MemoryLocalStore::new(), failures: AtomicUsize::new(1) });
        save_subject_details(local.as_ref(), &subject()).await.unwrap();
        let ctx = SessionContext {
            identity: None,
            records: Arc::new(InMemoryRecordStore::new()),
            local,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        };
        let mut session = AssessmentSession::new(Arc::new(Catalog::builtin()), ctx);
        session.start().await.unwrap();
        answer_all(&mut session, 2);

        let err = session.complete().await.unwrap_err();
        assert!(matches!(err, SessionError::LocalStore(LocalStoreError::Io(_))));
        assert!(err.is_retryable());
        assert_eq!(session.state(), SessionState::Completing);
        assert_eq!(session.responses().count(), 18);

        match session.complete().await.unwrap() {
            Completion::StoredLocally { responses, .. } => assert_eq!(responses.len(), 18),
            other => panic!("expected local hand-off, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Done);
    }

    #[tokio::test]
    async fn authenticated_completion_persists_remotely() {
        let mut f = fixture(Some("dr-a"), InMemoryRecordStore::new(), DEFAULT_REMOTE_TIMEOUT).await;
        answer_all(&mut f.session, 1);
        match f.session.complete().await.unwrap() {
            Completion::Persisted { record, responses, subject: s } => {
                assert_eq!(record.primary_dosha, Category::Pitta);
                assert_eq!(record.pitta_score, 54);
                assert_eq!(record.responses.len(), 18);
                assert_eq!(record.responses.get("7").map(String::as_str), Some("pitta"));
                assert_eq!(responses.len(), 18);
                assert_eq!(s, subject());
            }
            other => panic!("expected remote persistence, got {other:?}"),
        }
        assert_eq!(f.session.state(), SessionState::Done);
        assert_eq!(f.records.subject_count().await, 1);
        assert_eq!(f.local.get(RAW_RESPONSES_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn existing_subject_is_reused() {
        let records = InMemoryRecordStore::new();
        for _ in 0..2 {
            let mut f = fixture(Some("dr-a"), records.clone(), DEFAULT_REMOTE_TIMEOUT).await;
            answer_all(&mut f.session, 2);
            f.session.complete().await.unwrap();
        }
        assert_eq!(records.subject_count().await, 1);
        assert_eq!(records.assessment_count().await, 2);
    }

    #[tokio::test]
    async fn remote_failure_keeps_answers_and_allows_retry() {
        let records = InMemoryRecordStore::new();
        let mut f = fixture(Some("dr-a"), records.clone(), DEFAULT_REMOTE_TIMEOUT).await;
        answer_all(&mut f.session, 0);

        records.fail_next_calls(1);
        let err = f.session.complete().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.session.state(), SessionState::Completing);
        assert_eq!(f.session.responses().count(), 18);

        assert!(f.session.complete().await.is_ok());
        assert_eq!(f.session.state(), SessionState::Done);
    }

    #[tokio::test]
    async fn remote_timeout_is_retryable() {
        let records = InMemoryRecordStore::new().with_latency(Duration::from_millis(200));
        let mut f = fixture(Some("dr-a"), records, Duration::from_millis(10)).await;
        answer_all(&mut f.session, 0);
        let err = f.session.complete().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Persistence(RecordStoreError::Timeout { operation: "find_subject", .. })
        ));
        assert!(err.is_retryable());
        assert_eq!(f.session.responses().count(), 18);
    }

    #[tokio::test]
    async fn complete_is_rejected_outside_completing() {
        let mut f = anonymous().await;
        assert!(matches!(
            f.session.complete().await,
            Err(SessionError::InvalidTransition { operation: "complete", .. })
        ));
        assert!(matches!(
            f.session.start().await,
            Err(SessionError::InvalidTransition { operation: "start", .. })
        ));
    }
}
