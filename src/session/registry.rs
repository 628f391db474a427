//! # Session Registry
//!
//! The only cross-task shared resource in the service: a guarded map
//! of session-id → session handle. The registry guards map mutation
//! only; session *content* is owned by the connection actor that
//! created it and is never touched by another task.

use crate::error::{AppError, AppResult};
use crate::session::conversation::{ConversationState, JobContext, SessionConfig};
use crate::session::dedup::DedupFilter;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Everything the owning connection needs for one live session.
pub struct SessionHandle {
    pub config: SessionConfig,
    pub state: Mutex<ConversationState>,
    pub dedup: Mutex<DedupFilter>,
    last_activity: Mutex<Instant>,
}

impl SessionHandle {
    pub fn touch(&self) {
        *self.last_activity.lock().expect("activity lock poisoned") = Instant::now();
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_activity
            .lock()
            .expect("activity lock poisoned")
            .elapsed()
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, std::sync::Arc<SessionHandle>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Create a session and return its id plus the handle. Ids are
    /// random UUIDs; the collision re-check makes the impossible
    /// explicit rather than trusting it.
    pub fn create(
        &self,
        config: SessionConfig,
        job_context: JobContext,
        budget_minutes: f64,
    ) -> AppResult<(String, std::sync::Arc<SessionHandle>)> {
        let mut sessions = self.sessions.write().expect("registry lock poisoned");

        if sessions.len() >= self.max_sessions {
            return Err(AppError::Internal(format!(
                "Maximum concurrent sessions reached ({})",
                self.max_sessions
            )));
        }

        let mut session_id = Uuid::new_v4().to_string();
        while sessions.contains_key(&session_id) {
            session_id = Uuid::new_v4().to_string();
        }

        let handle = std::sync::Arc::new(SessionHandle {
            config,
            state: Mutex::new(ConversationState::new(
                session_id.clone(),
                job_context,
                budget_minutes,
            )),
            dedup: Mutex::new(DedupFilter::new()),
            last_activity: Mutex::new(Instant::now()),
        });

        sessions.insert(session_id.clone(), handle.clone());
        info!(session_id = %session_id, total = sessions.len(), "Session created");
        Ok((session_id, handle))
    }

    pub fn get(&self, session_id: &str) -> AppResult<std::sync::Arc<SessionHandle>> {
        self.sessions
            .read()
            .expect("registry lock poisoned")
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Session '{}' not found", session_id)))
    }

    /// Idempotent removal.
    pub fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write().expect("registry lock poisoned");
        if sessions.remove(session_id).is_some() {
            info!(session_id = %session_id, total = sessions.len(), "Session removed");
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().expect("registry lock poisoned").len()
    }

    /// Sweep sessions whose connection vanished without teardown.
    pub fn cleanup_expired(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().expect("registry lock poisoned");
        let before = sessions.len();
        sessions.retain(|session_id, handle| {
            let keep = handle.idle_duration() < max_idle;
            if !keep {
                warn!(session_id = %session_id, "Removing idle session");
            }
            keep
        });
        before - sessions.len()
    }
}
