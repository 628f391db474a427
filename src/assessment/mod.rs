//! # Assessment Pipeline
//!
//! Runs at interview termination. Produces a scored report only when
//! the session actually reached the interview phase and the transcript
//! carries enough substantive content to judge; otherwise a fixed
//! record is stored so downstream consumers always get *something*.

pub mod scores;

use crate::error::AppResult;
use crate::providers::{LanguageModel, PromptContext};
use crate::session::conversation::{ChatMessage, Phase, Speaker, TranscriptEntry};
use scores::{extract_recommendation, extract_scores, Recommendation, ScoreReport};
use tracing::info;

/// A candidate or system turn shorter than this is treated as
/// pre-check noise rather than interview content. Approximate by
/// design; see the boilerplate filter below.
const MIN_SUBSTANTIVE_CHARS: usize = 20;
const MIN_SUBSTANTIVE_TURNS: usize = 2;

/// Pre-check wording that must not count toward the substantive gate
/// even when it is long enough.
const PRECHECK_MARKERS: &[&str] = &[
    "can you hear",
    "audio check",
    "checking the audio",
    "state your name",
    "your full name",
    "my name is",
];

pub const INSUFFICIENT_CONVERSATION_TEXT: &str =
    "**Insufficient Conversation**\n\nThe interview did not contain enough substantive \
     exchanges to produce a reliable assessment. No scores were generated.";

pub const ENDED_EARLY_TEXT: &str =
    "**Interview Ended Early**\n\nThe session ended during the pre-interview checks, \
     before any evaluation questions were asked. No assessment was generated.";

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssessmentOutcome {
    pub text: String,
    pub scores: Option<ScoreReport>,
    pub recommendation: Recommendation,
}

impl AssessmentOutcome {
    fn fixed(text: &str) -> Self {
        Self {
            text: text.to_string(),
            scores: None,
            recommendation: Recommendation::Unknown,
        }
    }
}

/// Generate the end-of-interview assessment.
///
/// `phase_at_termination` is the phase the session was in when the
/// trigger fired: pre-check termination yields the fixed ended-early
/// record and skips the LLM entirely.
pub async fn run(
    llm: &dyn LanguageModel,
    phase_at_termination: Phase,
    transcript: &[TranscriptEntry],
    history: &[ChatMessage],
    context: &PromptContext,
) -> AppResult<AssessmentOutcome> {
    if phase_at_termination < Phase::Interview {
        info!("Assessment skipped: session ended during pre-check");
        return Ok(AssessmentOutcome::fixed(ENDED_EARLY_TEXT));
    }

    if !has_sufficient_conversation(transcript) {
        info!("Assessment skipped: insufficient conversation");
        return Ok(AssessmentOutcome::fixed(INSUFFICIENT_CONVERSATION_TEXT));
    }

    let text = llm.generate_assessment(history, context).await?;
    let scores = extract_scores(
        &text,
        &context.required_languages,
        &context.tested_languages,
    );
    let recommendation = extract_recommendation(&text);

    info!(
        overall = ?scores.overall_score,
        recommendation = ?recommendation,
        "Assessment generated"
    );

    Ok(AssessmentOutcome {
        text,
        scores: Some(scores),
        recommendation,
    })
}

/// The substantive-transcript gate: at least two candidate and two
/// system turns that are long enough and not pre-check boilerplate.
pub fn has_sufficient_conversation(transcript: &[TranscriptEntry]) -> bool {
    let substantive = |speaker: Speaker| {
        transcript
            .iter()
            .filter(|e| e.speaker == speaker && is_substantive(&e.text))
            .count()
    };
    substantive(Speaker::Candidate) >= MIN_SUBSTANTIVE_TURNS
        && substantive(Speaker::System) >= MIN_SUBSTANTIVE_TURNS
}

fn is_substantive(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_SUBSTANTIVE_CHARS {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    !PRECHECK_MARKERS.iter().any(|m| lowered.contains(m))
}
