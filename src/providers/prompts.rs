//! # Prompt Construction
//!
//! Builds the text sent to the LLM backends from the per-turn
//! [`PromptContext`]. The exact wording is an implementation detail;
//! the context fields each builder consumes are the contract.

use crate::providers::PromptContext;
use crate::session::conversation::ChatMessage;
use once_cell::sync::Lazy;
use regex::Regex;

static ROLE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:interviewer|evaluator)\s*:\s*").expect("valid prefix"));

/// Strip a leading "Interviewer:"/"Evaluator:" prefix the model
/// sometimes adds despite instructions.
pub fn clean_response(text: &str) -> String {
    ROLE_PREFIX.replace(text.trim(), "").trim().to_string()
}

/// System prompt for a regular interview turn.
pub fn build_evaluator_prompt(ctx: &PromptContext) -> String {
    let mut sections = Vec::new();

    sections.push(
        "You are a professional language evaluator conducting a spoken job interview. \
         Ask one question at a time, keep each message under four sentences, and write \
         every message entirely in a single language - never mix languages within one \
         message, and never prefix your reply with a role label."
            .to_string(),
    );

    sections.push(format!("Position: {}", ctx.job_title));
    if !ctx.job_description.is_empty() {
        sections.push(format!("Job description: {}", ctx.job_description));
    }
    if !ctx.cv_text.is_empty() {
        sections.push(format!("Candidate CV (excerpt): {}", truncate(&ctx.cv_text, 2000)));
    }
    if let Some(name) = &ctx.confirmed_name {
        sections.push(format!("Candidate name: {}", name));
    }
    if !ctx.custom_questions.is_empty() {
        sections.push(format!(
            "Topics the employer wants covered: {}",
            ctx.custom_questions.join("; ")
        ));
    }
    if !ctx.covered_topics.is_empty() {
        sections.push(format!(
            "Topics already covered (prefer new ground): {}",
            ctx.covered_topics.join(", ")
        ));
    }

    sections.push(format!(
        "Required languages: {}. Interview started in {}. Current language: {}. \
         Languages the candidate has spoken so far: {}. Questions asked in the current \
         language: {}.",
        ctx.required_languages.join(", "),
        ctx.start_language,
        ctx.current_language,
        ctx.tested_languages.join(", "),
        ctx.questions_in_current_language
    ));

    sections.push(format!(
        "Time: {:.1} of {:.0} minutes remain.",
        ctx.time_remaining_minutes.max(0.0),
        ctx.total_minutes
    ));

    if let Some(pacing) = &ctx.pacing_instruction {
        sections.push(pacing.clone());
    }
    if let Some(language) = &ctx.language_instruction {
        sections.push(language.clone());
    }

    sections.join("\n\n")
}

/// Per-turn directive pinning the reply language.
pub fn language_directive(language: &str) -> String {
    format!(
        "RESPOND ENTIRELY IN {}. ONE language per message. No mixing. No prefix.",
        language.to_uppercase()
    )
}

pub fn build_audio_check_prompt(language: &str) -> String {
    format!(
        "Write a short, friendly message in {language} for the start of a voice interview: \
         greet the candidate, explain you will first check the audio, and ask them to say \
         anything to confirm they can hear you. At most three sentences, {language} only."
    )
}

pub fn build_name_request_prompt(language: &str) -> String {
    format!(
        "Write a short message in {language} confirming the audio works and asking the \
         candidate to state their full name. At most two sentences, {language} only."
    )
}

pub fn build_opening_greeting_prompt(ctx: &PromptContext, candidate_name: Option<&str>) -> String {
    let name_part = match candidate_name {
        Some(name) => format!("Address the candidate as {}.", name),
        None => "You do not know the candidate's name; do not guess one.".to_string(),
    };
    format!(
        "Write the opening of a spoken language-evaluation interview in {start}. {name_part} \
         The position is {title}. Required languages: {langs}. Welcome the candidate, say \
         the interview is starting now, and ask your first question. At most four \
         sentences, {start} only.",
        start = ctx.start_language,
        title = ctx.job_title,
        langs = ctx.required_languages.join(", "),
    )
}

/// Assessment prompt: CEFR-style language report over the transcript.
/// Only languages the candidate actually spoke may be rated.
pub fn build_assessment_prompt(history: &[ChatMessage], ctx: &PromptContext) -> String {
    let transcript = render_transcript(history);

    let untested: Vec<&String> = ctx
        .required_languages
        .iter()
        .filter(|l| {
            !ctx.tested_languages
                .iter()
                .any(|t| t.eq_ignore_ascii_case(l))
        })
        .collect();

    let mut prompt = format!(
        "You are writing a language-proficiency assessment for a job interview.\n\
         Position: {}.\nCandidate: {}.\nRequired languages: {}.\n\
         Languages the candidate actually spoke during the interview: {}.\n\n\
         Rate ONLY the languages the candidate actually spoke. Use CEFR levels \
         (A1-C2) plus a numeric score in the form 'Language proficiency: N/10' per \
         spoken language. Also provide, each on the form 'Label: N/10': Technical \
         Skills, Job Fit, Communication, Problem Solving, CV Consistency, and an \
         Overall Score. End with a section titled 'Hiring Recommendation' containing \
         a clear recommendation.",
        ctx.job_title,
        ctx.confirmed_name.as_deref().unwrap_or("(name not confirmed)"),
        ctx.required_languages.join(", "),
        ctx.tested_languages.join(", "),
    );

    if !untested.is_empty() {
        prompt.push_str(&format!(
            "\n\nThe following required languages were NOT tested and must be reported \
             exactly as 'NOT TESTED', with no score: {}.",
            untested
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    prompt.push_str("\n\nInterview transcript:\n");
    prompt.push_str(&transcript);
    prompt
}

fn render_transcript(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|msg| {
            let who = if msg.role == "assistant" { "Evaluator" } else { "Candidate" };
            format!("{}: {}", who, msg.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PromptContext {
        PromptContext {
            job_title: "Bilingual Support Lead".to_string(),
            required_languages: vec!["English".to_string(), "French".to_string()],
            start_language: "English".to_string(),
            current_language: "English".to_string(),
            tested_languages: vec!["English".to_string()],
            total_minutes: 15.0,
            time_remaining_minutes: 9.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_response_strips_role_prefixes() {
        assert_eq!(clean_response("Interviewer: Hello there"), "Hello there");
        assert_eq!(clean_response("evaluator : Bonjour"), "Bonjour");
        assert_eq!(clean_response("  Plain answer  "), "Plain answer");
    }

    #[test]
    fn test_evaluator_prompt_carries_language_state() {
        let prompt = build_evaluator_prompt(&context());
        assert!(prompt.contains("Current language: English"));
        assert!(prompt.contains("English, French"));
        assert!(prompt.contains("9.0 of 15 minutes"));
    }

    #[test]
    fn test_language_instruction_is_appended() {
        let mut ctx = context();
        ctx.language_instruction = Some("MANDATORY LANGUAGE SWITCH: French".to_string());
        let prompt = build_evaluator_prompt(&ctx);
        assert!(prompt.ends_with("MANDATORY LANGUAGE SWITCH: French"));
    }

    #[test]
    fn test_assessment_prompt_marks_untested_languages() {
        let prompt = build_assessment_prompt(&[], &context());
        assert!(prompt.contains("NOT TESTED"));
        assert!(prompt.contains("French"));
    }

    #[test]
    fn test_assessment_prompt_omits_untested_note_when_all_spoken() {
        let mut ctx = context();
        ctx.tested_languages.push("French".to_string());
        let prompt = build_assessment_prompt(&[], &ctx);
        assert!(!prompt.contains("NOT TESTED"));
    }

    #[test]
    fn test_language_directive_uppercases() {
        assert!(language_directive("French").contains("RESPOND ENTIRELY IN FRENCH"));
    }

    #[test]
    fn test_transcript_rendering_roles() {
        let history = vec![
            ChatMessage { role: "assistant".into(), content: "Tell me about yourself.".into() },
            ChatMessage { role: "user".into(), content: "I build data pipelines.".into() },
        ];
        let ctx = context();
        let prompt = build_assessment_prompt(&history, &ctx);
        assert!(prompt.contains("Evaluator: Tell me about yourself."));
        assert!(prompt.contains("Candidate: I build data pipelines."));
    }
}
