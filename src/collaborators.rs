//! # External Collaborators
//!
//! The orchestrator consumes three interfaces owned by the CRUD side
//! of the platform: fetching the job context, fetching the candidate
//! record, and persisting the interview result. They are traits here
//! so the core never depends on how that side stores anything; an
//! in-memory implementation backs tests and standalone operation
//! (the `start_interview` frame may also carry the job context
//! inline, bypassing the lookup).

use crate::assessment::AssessmentOutcome;
use crate::error::{AppError, AppResult};
use crate::session::conversation::{JobContext, TranscriptEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct CandidateRecord {
    pub cv_text: String,
    /// Authoritative name from the source of record.
    pub confirmed_name: Option<String>,
}

#[async_trait]
pub trait JobContextSource: Send + Sync {
    async fn fetch_job_context(&self, job_offer_id: &str) -> AppResult<JobContext>;
}

#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn fetch_candidate(&self, application_id: &str) -> AppResult<CandidateRecord>;
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist_result(
        &self,
        session_id: &str,
        transcript: &[TranscriptEntry],
        assessment: &AssessmentOutcome,
    ) -> AppResult<()>;
}

/// The bundle handed to each connection.
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobContextSource>,
    pub candidates: Arc<dyn CandidateSource>,
    pub results: Arc<dyn ResultSink>,
}

impl Collaborators {
    /// In-memory collaborators for tests and standalone runs.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            jobs: store.clone(),
            candidates: store.clone(),
            results: store,
        }
    }
}

/// Shared in-memory backing for all three interfaces.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, JobContext>>,
    candidates: RwLock<HashMap<String, CandidateRecord>>,
}

impl MemoryStore {
    pub fn insert_job(&self, id: &str, context: JobContext) {
        self.jobs
            .write()
            .expect("jobs lock poisoned")
            .insert(id.to_string(), context);
    }

    pub fn insert_candidate(&self, id: &str, record: CandidateRecord) {
        self.candidates
            .write()
            .expect("candidates lock poisoned")
            .insert(id.to_string(), record);
    }
}

#[async_trait]
impl JobContextSource for MemoryStore {
    async fn fetch_job_context(&self, job_offer_id: &str) -> AppResult<JobContext> {
        self.jobs
            .read()
            .expect("jobs lock poisoned")
            .get(job_offer_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Job offer '{}' not found", job_offer_id)))
    }
}

#[async_trait]
impl CandidateSource for MemoryStore {
    async fn fetch_candidate(&self, application_id: &str) -> AppResult<CandidateRecord> {
        self.candidates
            .read()
            .expect("candidates lock poisoned")
            .get(application_id)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("Application '{}' not found", application_id))
            })
    }
}

#[async_trait]
impl ResultSink for MemoryStore {
    async fn persist_result(
        &self,
        session_id: &str,
        transcript: &[TranscriptEntry],
        assessment: &AssessmentOutcome,
    ) -> AppResult<()> {
        // The real sink lives in the CRUD service; standalone runs just
        // record that a result was produced.
        info!(
            session_id = %session_id,
            turns = transcript.len(),
            recommendation = ?assessment.recommendation,
            "Interview result ready for persistence"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::default();
        store.insert_job(
            "job-1",
            JobContext {
                job_title: "SRE".to_string(),
                required_languages: vec!["English".to_string()],
                start_language: "English".to_string(),
                ..Default::default()
            },
        );
        store.insert_candidate(
            "app-1",
            CandidateRecord {
                cv_text: "Ten years of ops.".to_string(),
                confirmed_name: Some("Dana Flores".to_string()),
            },
        );

        let job = store.fetch_job_context("job-1").await.unwrap();
        assert_eq!(job.job_title, "SRE");

        let candidate = store.fetch_candidate("app-1").await.unwrap();
        assert_eq!(candidate.confirmed_name.as_deref(), Some("Dana Flores"));

        assert!(store.fetch_job_context("missing").await.is_err());
    }
}
