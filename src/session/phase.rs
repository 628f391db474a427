//! # Phase State Machine
//!
//! Drives the pre-check phases and the transition into the timed
//! interview. The flow is deliberately forgiving:
//!
//! - AUDIO_CHECK passes on *any* non-empty utterance: its presence
//!   proves the audio path works, the content is irrelevant.
//! - NAME_CHECK extracts a spoken name best-effort and never blocks:
//!   if extraction fails the interview proceeds without
//!   personalization. An authoritative CV-supplied name always wins
//!   over the spoken extraction for the confirmed name; the spoken
//!   name only validates that the candidate heard correctly.

use crate::session::conversation::{ConversationState, Phase};
use once_cell::sync::Lazy;
use regex::Regex;

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:my name is|i'm|i am|call me|it's|it is)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)",
    )
    .expect("valid name pattern")
});

static LEADING_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)").expect("valid leading pattern"));

static SPELLED_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:spelled|spell it|spelling is|it's spelled)\s+([A-Z][A-Z\s\-]+)")
        .expect("valid spelling pattern")
});

static CAPITALIZED_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+\b").expect("valid word pattern"));

/// Phrases in interviewer output that signal the interview is being
/// closed by the LLM itself.
const CLOSING_PHRASES: &[&str] = &[
    "thank you for your time",
    "any questions for me",
    "this concludes",
    "the interview is now complete",
    "best of luck",
    "merci pour votre temps",
    "merci de votre temps",
];

/// What the caller must do after a pre-check utterance was absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecheckAction {
    /// Audio confirmed working; ask for the candidate's name next.
    RequestName,
    /// Name phase done; generate the opening greeting and interview.
    BeginInterview { spoken_name: Option<String> },
}

/// Advance the pre-check machine with one candidate utterance.
/// Returns `None` when the session is not in a pre-check phase or the
/// utterance is empty (AUDIO_CHECK stays put on silence-equivalents).
pub fn advance_precheck(state: &mut ConversationState, utterance: &str) -> Option<PrecheckAction> {
    match state.phase() {
        Phase::AudioCheck => {
            if utterance.trim().is_empty() {
                return None;
            }
            state.advance_phase(Phase::NameCheck);
            Some(PrecheckAction::RequestName)
        }
        Phase::NameCheck => {
            let spoken_name = extract_candidate_name(utterance);
            state.candidate_name = spoken_name.clone();

            // The record of truth beats whatever transcription heard.
            let confirmed = state
                .job_context
                .record_name
                .clone()
                .or_else(|| spoken_name.clone());
            if let Some(name) = confirmed {
                state.confirm_name(name);
            }

            state.advance_phase(Phase::Interview);
            state.questions_in_current_language = 0;
            Some(PrecheckAction::BeginInterview { spoken_name })
        }
        _ => None,
    }
}

/// Best-effort spoken-name extraction, in priority order: explicit
/// name phrases, a leading capitalized sequence, then the first 2-3
/// capitalized words anywhere. A spelled-out form ("spelled J O H N")
/// refines the capture when present.
pub fn extract_candidate_name(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(spelled) = extract_spelled_name(text) {
        return Some(spelled);
    }

    if let Some(caps) = NAME_PATTERN.captures(text) {
        return Some(caps[1].trim().to_string());
    }

    if let Some(caps) = LEADING_NAME_PATTERN.captures(text) {
        let candidate = caps[1].trim();
        // A single leading word can be a sentence opener ("Yes", "Well");
        // only trust it when it isn't a common filler.
        if !is_filler_word(candidate) {
            return Some(candidate.to_string());
        }
    }

    let words: Vec<&str> = CAPITALIZED_WORD
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|w| !is_filler_word(w))
        .take(3)
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn extract_spelled_name(text: &str) -> Option<String> {
    let caps = SPELLED_NAME_PATTERN.captures(text)?;
    let letters: String = caps[1]
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.len() < 2 {
        return None;
    }
    let mut name = letters.to_lowercase();
    name[..1].make_ascii_uppercase();
    Some(name)
}

fn is_filler_word(word: &str) -> bool {
    matches!(
        word,
        "Yes" | "No" | "Well" | "Okay" | "Ok" | "Hello" | "Hi" | "Sure" | "Thanks" | "Thank"
    )
}

/// Does this interviewer utterance close the interview?
pub fn is_closing_utterance(text: &str) -> bool {
    let lowered = text.to_lowercase();
    CLOSING_PHRASES.iter().any(|p| lowered.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::conversation::JobContext;

    fn state_with_record_name(record_name: Option<&str>) -> ConversationState {
        let ctx = JobContext {
            job_title: "Data Engineer".to_string(),
            required_languages: vec!["English".to_string()],
            start_language: "English".to_string(),
            record_name: record_name.map(|s| s.to_string()),
            ..Default::default()
        };
        ConversationState::new("s-1".to_string(), ctx, 15.0)
    }

    #[test]
    fn test_audio_check_passes_on_any_content() {
        let mut s = state_with_record_name(None);
        assert_eq!(advance_precheck(&mut s, "uh"), Some(PrecheckAction::RequestName));
        assert_eq!(s.phase(), Phase::NameCheck);
    }

    #[test]
    fn test_audio_check_holds_on_empty_transcript() {
        let mut s = state_with_record_name(None);
        assert_eq!(advance_precheck(&mut s, "   "), None);
        assert_eq!(s.phase(), Phase::AudioCheck);
    }

    #[test]
    fn test_name_check_always_proceeds() {
        let mut s = state_with_record_name(None);
        advance_precheck(&mut s, "yes I can hear you");
        let action = advance_precheck(&mut s, "mumble mumble").unwrap();
        assert_eq!(action, PrecheckAction::BeginInterview { spoken_name: None });
        assert_eq!(s.phase(), Phase::Interview);
        assert_eq!(s.confirmed_name(), None);
    }

    #[test]
    fn test_record_name_beats_spoken_name() {
        let mut s = state_with_record_name(Some("Amina Benali"));
        advance_precheck(&mut s, "hello");
        advance_precheck(&mut s, "My name is Anna Banally");
        assert_eq!(s.confirmed_name(), Some("Amina Benali"));
        assert_eq!(s.candidate_name.as_deref(), Some("Anna Banally"));
    }

    #[test]
    fn test_spoken_name_used_without_record_name() {
        let mut s = state_with_record_name(None);
        advance_precheck(&mut s, "hello");
        advance_precheck(&mut s, "I'm David Chen, nice to meet you");
        assert_eq!(s.confirmed_name(), Some("David Chen"));
    }

    #[test]
    fn test_name_pattern_priority() {
        assert_eq!(
            extract_candidate_name("my name is Laura Smith").as_deref(),
            Some("Laura Smith")
        );
        assert_eq!(extract_candidate_name("call me Omar").as_deref(), Some("Omar"));
        assert_eq!(
            extract_candidate_name("Marie Dupont, pleased to meet you").as_deref(),
            Some("Marie Dupont")
        );
    }

    #[test]
    fn test_fallback_capitalized_words() {
        assert_eq!(
            extract_candidate_name("yes hi this is Jean Paul Martin speaking").as_deref(),
            Some("Jean Paul Martin")
        );
        assert_eq!(extract_candidate_name("uh huh sure"), None);
    }

    #[test]
    fn test_leading_filler_not_mistaken_for_name() {
        assert_eq!(extract_candidate_name("Well John here").as_deref(), Some("John"));
    }

    #[test]
    fn test_spelled_name_refines_extraction() {
        assert_eq!(
            extract_candidate_name("it's spelled J O H A N").as_deref(),
            Some("Johan")
        );
    }

    #[test]
    fn test_closing_phrase_detection() {
        assert!(is_closing_utterance(
            "Thank you for your time today, we will be in touch."
        ));
        assert!(is_closing_utterance("Do you have any questions for me?"));
        assert!(is_closing_utterance("Merci pour votre temps."));
        assert!(!is_closing_utterance("Tell me about a project you led."));
    }
}
