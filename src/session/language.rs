//! # Language Coordinator
//!
//! Multilingual evaluation logic. Only active when the session
//! requires more than one language. Detection is table-driven and
//! pure so it can be tested without the state machine:
//!
//! - candidate switch requests ("can we speak French", "parlons en
//!   anglais") resolve to a target language, defaulting to the first
//!   untested required language when the request names none;
//! - LLM output is scanned with the same marker table to catch the
//!   interviewer switching proactively;
//! - after three questions in one language with untested languages
//!   remaining, the next turn is forced entirely into the next
//!   untested language.

use crate::session::conversation::ConversationState;

/// Phrases that signal a request to change language, across the
/// languages the evaluator supports.
const SWITCH_KEYWORDS: &[&str] = &[
    "switch to",
    "switch language",
    "speak in",
    "parler en",
    "parlez",
    "continue in",
    "now in",
    "in english",
    "in french",
    "en français",
    "en anglais",
    "en arabe",
    "can we speak",
    "peut-on parler",
    "let's speak",
    "parlons",
    "change to",
    "change language",
    "changer de langue",
    "autre langue",
];

/// Canonical language name → marker words that identify it inside a
/// switch request or an interviewer utterance.
const LANGUAGE_MARKERS: &[(&str, &[&str])] = &[
    ("French", &["french", "français", "francais"]),
    ("English", &["english", "anglais"]),
    ("Arabic", &["arabic", "arabe", "عربي"]),
    ("Spanish", &["spanish", "espagnol", "español"]),
    ("German", &["german", "allemand", "deutsch"]),
];

/// A detected candidate switch request. `target` is `None` when the
/// request did not name a resolvable language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchRequest {
    pub target: Option<String>,
}

/// Scan candidate text for an explicit language-switch request.
pub fn detect_language_switch(text: &str) -> Option<SwitchRequest> {
    let lowered = text.to_lowercase();

    if !SWITCH_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return None;
    }

    Some(SwitchRequest {
        target: detect_language_marker(&lowered),
    })
}

/// First language whose marker word appears in the text, if any.
/// Input is matched case-insensitively.
pub fn detect_language_marker(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    for (language, markers) in LANGUAGE_MARKERS {
        if markers.iter().any(|m| lowered.contains(m)) {
            return Some((*language).to_string());
        }
    }
    None
}

/// Language decision for the upcoming system turn.
#[derive(Debug, Clone, Default)]
pub struct TurnLanguagePlan {
    /// Imperative instruction injected into the LLM context, if a
    /// switch is being requested or forced.
    pub instruction: Option<String>,
    /// Language the session moves to once the turn is produced.
    pub switch_to: Option<String>,
}

/// Decide whether this turn must switch language, either because the
/// candidate asked or because the mandatory-switch quota was reached.
/// Single-language sessions always get an empty plan.
pub fn plan_turn(state: &ConversationState, candidate_text: &str) -> TurnLanguagePlan {
    if state.required_languages.len() <= 1 {
        return TurnLanguagePlan::default();
    }

    // Explicit candidate request wins over the rotation rule.
    if let Some(request) = detect_language_switch(candidate_text) {
        let target = request
            .target
            .or_else(|| state.untested_languages().into_iter().next());

        if let Some(target) = target {
            if !state.current_language.eq_ignore_ascii_case(&target) {
                return TurnLanguagePlan {
                    instruction: Some(switch_instruction(&target)),
                    switch_to: Some(target),
                };
            }
        }
    }

    // Mandatory rotation: three questions answered in one language and
    // untested required languages remain.
    if state.questions_in_current_language >= 3 {
        if let Some(target) = state.untested_languages().into_iter().next() {
            return TurnLanguagePlan {
                instruction: Some(switch_instruction(&target)),
                switch_to: Some(target),
            };
        }
    }

    TurnLanguagePlan::default()
}

/// Detect the interviewer proactively switching: a marker for a
/// language other than the current one, inside its own utterance.
pub fn detect_interviewer_switch(state: &ConversationState, llm_text: &str) -> Option<String> {
    if state.required_languages.len() <= 1 {
        return None;
    }

    let marker = detect_language_marker(llm_text)?;
    if state.current_language.eq_ignore_ascii_case(&marker) {
        return None;
    }
    // Only honour switches into a language this session actually requires.
    if !state
        .required_languages
        .iter()
        .any(|l| l.eq_ignore_ascii_case(&marker))
    {
        return None;
    }
    Some(marker)
}

fn switch_instruction(target: &str) -> String {
    format!(
        "MANDATORY LANGUAGE SWITCH: write your next message 100% in {target}. Announce the \
         switch briefly in {target}, then ask your next question in {target}. Do not mix \
         languages within the message."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::conversation::{JobContext, Phase};

    fn bilingual_state() -> ConversationState {
        let ctx = JobContext {
            job_title: "Support Agent".to_string(),
            required_languages: vec!["English".to_string(), "French".to_string()],
            start_language: "English".to_string(),
            ..Default::default()
        };
        let mut s = ConversationState::new("s-1".to_string(), ctx, 15.0);
        s.advance_phase(Phase::NameCheck);
        s.advance_phase(Phase::Interview);
        s
    }

    #[test]
    fn test_detect_switch_with_named_target() {
        let req = detect_language_switch("Could we switch to French please?").unwrap();
        assert_eq!(req.target.as_deref(), Some("French"));

        let req = detect_language_switch("Parlons en anglais maintenant").unwrap();
        assert_eq!(req.target.as_deref(), Some("English"));
    }

    #[test]
    fn test_detect_switch_without_target() {
        let req = detect_language_switch("can we change language?").unwrap();
        assert_eq!(req.target, None);
    }

    #[test]
    fn test_no_switch_in_plain_answer() {
        assert!(detect_language_switch("I worked on distributed systems for five years").is_none());
    }

    #[test]
    fn test_marker_detection_is_case_insensitive() {
        assert_eq!(detect_language_marker("EN FRANÇAIS").as_deref(), Some("French"));
        assert_eq!(detect_language_marker("auf Deutsch bitte").as_deref(), Some("German"));
        assert_eq!(detect_language_marker("nothing here"), None);
    }

    #[test]
    fn test_unresolved_request_defaults_to_first_untested() {
        let state = bilingual_state();
        let plan = plan_turn(&state, "please change language");
        assert_eq!(plan.switch_to.as_deref(), Some("French"));
        assert!(plan.instruction.unwrap().contains("French"));
    }

    #[test]
    fn test_mandatory_switch_after_three_questions() {
        let mut state = bilingual_state();
        for _ in 0..3 {
            state.record_exchange();
        }

        let plan = plan_turn(&state, "My last project used Kafka.");
        assert_eq!(plan.switch_to.as_deref(), Some("French"));
        let instruction = plan.instruction.unwrap();
        assert!(instruction.contains("100% in French"));
    }

    #[test]
    fn test_no_mandatory_switch_when_all_tested() {
        let mut state = bilingual_state();
        state.mark_language_tested("French");
        for _ in 0..5 {
            state.record_exchange();
        }

        let plan = plan_turn(&state, "Sure, happy to continue.");
        assert!(plan.instruction.is_none());
        assert!(plan.switch_to.is_none());
    }

    #[test]
    fn test_single_language_sessions_never_switch() {
        let ctx = JobContext {
            job_title: "Analyst".to_string(),
            required_languages: vec!["English".to_string()],
            start_language: "English".to_string(),
            ..Default::default()
        };
        let mut state = ConversationState::new("s-2".to_string(), ctx, 15.0);
        state.advance_phase(Phase::NameCheck);
        state.advance_phase(Phase::Interview);
        for _ in 0..4 {
            state.record_exchange();
        }

        let plan = plan_turn(&state, "switch to French");
        assert!(plan.instruction.is_none());
    }

    #[test]
    fn test_interviewer_switch_detected_for_required_language_only() {
        let state = bilingual_state();
        assert_eq!(
            detect_interviewer_switch(&state, "Passons en français : parlez-moi de vous.")
                .as_deref(),
            Some("French")
        );
        // German is not required by this session.
        assert!(detect_interviewer_switch(&state, "Weiter auf Deutsch").is_none());
        // Markers for the current language are not a switch.
        assert!(detect_interviewer_switch(&state, "Let's continue in English.").is_none());
    }
}
