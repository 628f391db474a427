//! # Conversation State
//!
//! Per-session interview state. One `ConversationState` exists per
//! live connection and is owned exclusively by the task handling that
//! connection; nothing here is shared across sessions.
//!
//! ## Invariants
//! - `phase` only moves forward (AUDIO_CHECK → NAME_CHECK → INTERVIEW
//!   → COMPLETED), never back.
//! - `confirmed_name` is write-once: later transcription noise must
//!   never overwrite it.
//! - `tested_languages` only grows, and contains `start_language`
//!   from the moment of creation.
//! - `questions_in_current_language` is only incremented for
//!   completed INTERVIEW-phase exchanges and resets to zero whenever
//!   the current language changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Macro-state of a session. The derive order gives
/// `AudioCheck < NameCheck < Interview < Completed`, which is what the
/// forward-only transition rule compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AudioCheck,
    NameCheck,
    Interview,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::AudioCheck => "audio_check",
            Phase::NameCheck => "name_check",
            Phase::Interview => "interview",
            Phase::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Candidate,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A single message in provider chat format.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Read-only job snapshot supplied at session creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobContext {
    pub job_title: String,
    #[serde(default)]
    pub job_description: String,
    #[serde(default)]
    pub cv_text: String,
    #[serde(default)]
    pub custom_questions: Vec<String>,
    #[serde(default)]
    pub evaluation_weights: Option<serde_json::Value>,
    pub required_languages: Vec<String>,
    pub start_language: String,
    /// Authoritative candidate name from the source of record, if any.
    #[serde(default)]
    pub record_name: Option<String>,
}

/// Per-session provider selections. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub stt_provider: String,
    pub stt_model: String,
    pub tts_provider: String,
    pub tts_model: String,
    pub voice_id: String,
    pub llm_provider: String,
    pub llm_model: String,
}

#[derive(Debug)]
pub struct ConversationState {
    pub session_id: String,
    phase: Phase,
    transcript: Vec<TranscriptEntry>,
    pub candidate_name: Option<String>,
    confirmed_name: Option<String>,
    pub required_languages: Vec<String>,
    pub start_language: String,
    pub current_language: String,
    tested_languages: Vec<String>,
    pub questions_in_current_language: u32,
    covered_topics: Vec<String>,
    pub started_at: DateTime<Utc>,
    start_instant: Instant,
    pub budget_minutes: f64,
    pub job_context: JobContext,
}

impl ConversationState {
    pub fn new(session_id: String, job_context: JobContext, budget_minutes: f64) -> Self {
        let start_language = if job_context.start_language.is_empty() {
            job_context
                .required_languages
                .first()
                .cloned()
                .unwrap_or_else(|| "English".to_string())
        } else {
            job_context.start_language.clone()
        };

        Self {
            session_id,
            phase: Phase::AudioCheck,
            transcript: Vec::new(),
            candidate_name: None,
            confirmed_name: None,
            required_languages: job_context.required_languages.clone(),
            current_language: start_language.clone(),
            // The start language counts as tested from the outset.
            tested_languages: vec![start_language.clone()],
            start_language,
            questions_in_current_language: 0,
            covered_topics: Vec::new(),
            started_at: Utc::now(),
            start_instant: Instant::now(),
            budget_minutes,
            job_context,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move the phase forward. Requests to regress are ignored and
    /// reported as `false`; the caller treats that as a logic bug to
    /// log, not an error to surface.
    pub fn advance_phase(&mut self, to: Phase) -> bool {
        if to > self.phase {
            self.phase = to;
            true
        } else {
            false
        }
    }

    pub fn append(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn confirmed_name(&self) -> Option<&str> {
        self.confirmed_name.as_deref()
    }

    /// Write-once. Returns `false` when a name is already confirmed.
    pub fn confirm_name(&mut self, name: impl Into<String>) -> bool {
        if self.confirmed_name.is_some() {
            return false;
        }
        self.confirmed_name = Some(name.into());
        true
    }

    pub fn tested_languages(&self) -> &[String] {
        &self.tested_languages
    }

    pub fn mark_language_tested(&mut self, language: &str) {
        if !self
            .tested_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(language))
        {
            self.tested_languages.push(language.to_string());
        }
    }

    pub fn is_language_tested(&self, language: &str) -> bool {
        self.tested_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(language))
    }

    /// Required languages the candidate has not yet produced content in,
    /// in required-language order.
    pub fn untested_languages(&self) -> Vec<String> {
        self.required_languages
            .iter()
            .filter(|l| !self.is_language_tested(l))
            .cloned()
            .collect()
    }

    /// Switch the active language. Resets the per-language question
    /// counter. No-op when the language is unchanged.
    pub fn change_language(&mut self, language: &str) {
        if !self.current_language.eq_ignore_ascii_case(language) {
            self.current_language = language.to_string();
            self.questions_in_current_language = 0;
        }
    }

    /// Record one completed candidate/system exchange. Only counts
    /// toward the language quota while interviewing.
    pub fn record_exchange(&mut self) {
        if self.phase == Phase::Interview {
            self.questions_in_current_language += 1;
        }
    }

    pub fn cover_topic(&mut self, topic: &str) {
        if !self.covered_topics.iter().any(|t| t == topic) {
            self.covered_topics.push(topic.to_string());
        }
    }

    pub fn covered_topics(&self) -> &[String] {
        &self.covered_topics
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.start_instant.elapsed().as_secs_f64() / 60.0
    }

    /// Transcript in chat-completion form: system utterances map to
    /// the `assistant` role.
    pub fn history_for_llm(&self) -> Vec<ChatMessage> {
        self.transcript
            .iter()
            .map(|entry| ChatMessage {
                role: match entry.speaker {
                    Speaker::Candidate => "user".to_string(),
                    Speaker::System => "assistant".to_string(),
                },
                content: entry.text.clone(),
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn set_elapsed_for_test(&mut self, minutes: f64) {
        self.start_instant =
            Instant::now() - std::time::Duration::from_secs_f64(minutes * 60.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_context() -> JobContext {
        JobContext {
            job_title: "Backend Engineer".to_string(),
            required_languages: vec!["English".to_string(), "French".to_string()],
            start_language: "English".to_string(),
            ..Default::default()
        }
    }

    fn state() -> ConversationState {
        ConversationState::new("s-1".to_string(), job_context(), 15.0)
    }

    #[test]
    fn test_phase_never_regresses() {
        let mut s = state();
        assert!(s.advance_phase(Phase::NameCheck));
        assert!(s.advance_phase(Phase::Interview));
        assert!(!s.advance_phase(Phase::NameCheck));
        assert!(!s.advance_phase(Phase::AudioCheck));
        assert_eq!(s.phase(), Phase::Interview);
        assert!(s.advance_phase(Phase::Completed));
        assert!(!s.advance_phase(Phase::Interview));
    }

    #[test]
    fn test_confirmed_name_is_write_once() {
        let mut s = state();
        assert!(s.confirm_name("Alice Martin"));
        assert!(!s.confirm_name("Bob Noise"));
        assert_eq!(s.confirmed_name(), Some("Alice Martin"));
    }

    #[test]
    fn test_start_language_tested_at_creation() {
        let s = state();
        assert!(s.is_language_tested("English"));
        assert_eq!(s.untested_languages(), vec!["French".to_string()]);
    }

    #[test]
    fn test_tested_languages_only_grow() {
        let mut s = state();
        s.mark_language_tested("French");
        s.mark_language_tested("french");
        assert_eq!(s.tested_languages().len(), 2);
        assert!(s.untested_languages().is_empty());
    }

    #[test]
    fn test_language_change_resets_counter() {
        let mut s = state();
        s.advance_phase(Phase::NameCheck);
        s.advance_phase(Phase::Interview);
        s.record_exchange();
        s.record_exchange();
        assert_eq!(s.questions_in_current_language, 2);

        s.change_language("French");
        assert_eq!(s.questions_in_current_language, 0);
        assert_eq!(s.current_language, "French");

        // Same language again is a no-op.
        s.record_exchange();
        s.change_language("french");
        assert_eq!(s.questions_in_current_language, 1);
    }

    #[test]
    fn test_exchanges_not_counted_during_precheck() {
        let mut s = state();
        s.record_exchange();
        assert_eq!(s.questions_in_current_language, 0);

        s.advance_phase(Phase::NameCheck);
        s.record_exchange();
        assert_eq!(s.questions_in_current_language, 0);

        s.advance_phase(Phase::Interview);
        s.record_exchange();
        assert_eq!(s.questions_in_current_language, 1);
    }

    #[test]
    fn test_history_maps_system_to_assistant() {
        let mut s = state();
        s.append(Speaker::System, "Hello, can you hear me?");
        s.append(Speaker::Candidate, "Yes, loud and clear.");

        let history = s.history_for_llm();
        assert_eq!(history[0].role, "assistant");
        assert_eq!(history[1].role, "user");
    }

    #[test]
    fn test_missing_start_language_falls_back_to_first_required() {
        let mut ctx = job_context();
        ctx.start_language = String::new();
        let s = ConversationState::new("s-2".to_string(), ctx, 10.0);
        assert_eq!(s.start_language, "English");
        assert_eq!(s.current_language, "English");
    }
}
