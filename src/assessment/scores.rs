//! # Assessment Score Parser
//!
//! Extracts structured scores and a hiring recommendation from the
//! free-text assessment the LLM produces. The grammar is deliberately
//! narrow: `<label> : <score>/10` per axis, `<language>
//! (language|proficiency|fluency) : <score>/10` per language. A parse
//! failure yields "unknown" for that field, never zero.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Axis label → regex alternation matching it in the report.
const AXES: &[(&str, &str)] = &[
    ("technical_skills", r"technical\s+skills?|technical"),
    ("job_fit", r"job\s+fit|role\s+fit"),
    ("communication", r"communication"),
    ("problem_solving", r"problem[\s\-]solving|problem\s+solving"),
    ("cv_consistency", r"cv\s+consistency|resume\s+consistency"),
];

static OVERALL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)overall(?:\s+score)?\s*[:\-]?\s*(\d+(?:\.\d+)?)\s*/\s*10")
        .expect("valid overall pattern")
});

static LANGUAGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\w+)\s*(?:language|proficiency|fluency)\s*[:\-]?\s*(\d+(?:\.\d+)?)\s*/\s*10")
        .expect("valid language pattern")
});

static RECOMMENDATION_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)hiring\s+recommendation").expect("valid section pattern"));

const POSITIVE_INDICATORS: &[&str] = &[
    "recommend hiring",
    "recommend proceeding",
    "strong candidate",
    "good fit",
    "suitable for the role",
    "qualified",
    "positive recommendation",
    "hire",
];

/// Checked before the positive list: "not qualified" must not count as
/// "qualified".
const NEGATIVE_INDICATORS: &[&str] = &[
    "do not recommend",
    "not recommend",
    "no hire",
    "not hire",
    "not a good fit",
    "not suitable",
    "unsuitable",
    "not qualified",
    "insufficient",
    "reject",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Hire,
    NoHire,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageScore {
    pub language: String,
    /// `None` means the language was required but never tested; it is
    /// reported, never scored.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreReport {
    pub technical_skills: Option<f64>,
    pub job_fit: Option<f64>,
    pub communication: Option<f64>,
    pub problem_solving: Option<f64>,
    pub cv_consistency: Option<f64>,
    pub overall_score: Option<f64>,
    pub language_scores: Vec<LanguageScore>,
}

/// Parse per-axis and per-language scores from the report text.
/// `tested_languages` bounds which languages may carry a score;
/// `required_languages` controls which appear at all.
pub fn extract_scores(
    text: &str,
    required_languages: &[String],
    tested_languages: &[String],
) -> ScoreReport {
    let mut report = ScoreReport {
        technical_skills: axis_score(text, AXES[0].1),
        job_fit: axis_score(text, AXES[1].1),
        communication: axis_score(text, AXES[2].1),
        problem_solving: axis_score(text, AXES[3].1),
        cv_consistency: axis_score(text, AXES[4].1),
        overall_score: OVERALL_PATTERN
            .captures(text)
            .and_then(|c| c[1].parse().ok()),
        language_scores: Vec::new(),
    };

    // Overall defaults to the mean of whatever axes were found.
    if report.overall_score.is_none() {
        let found: Vec<f64> = [
            report.technical_skills,
            report.job_fit,
            report.communication,
            report.problem_solving,
            report.cv_consistency,
        ]
        .into_iter()
        .flatten()
        .collect();
        if !found.is_empty() {
            report.overall_score = Some(found.iter().sum::<f64>() / found.len() as f64);
        }
    }

    // Language scores from the report, keyed case-insensitively.
    let mut parsed: Vec<(String, f64)> = Vec::new();
    for caps in LANGUAGE_PATTERN.captures_iter(text) {
        if let Ok(score) = caps[2].parse::<f64>() {
            parsed.push((caps[1].to_string(), score));
        }
    }

    for language in required_languages {
        let tested = tested_languages
            .iter()
            .any(|t| t.eq_ignore_ascii_case(language));
        // Scoring an untested language would be fabrication; drop any
        // number the model produced for it.
        let score = if tested {
            parsed
                .iter()
                .find(|(l, _)| l.eq_ignore_ascii_case(language))
                .map(|(_, s)| *s)
        } else {
            None
        };
        report.language_scores.push(LanguageScore {
            language: language.clone(),
            score,
        });
    }

    report
}

fn axis_score(text: &str, label_pattern: &str) -> Option<f64> {
    let pattern = format!(
        r"(?i)(?:{})\s*[:\-]?\s*(\d+(?:\.\d+)?)\s*/\s*10",
        label_pattern
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(text).and_then(|c| c[1].parse().ok())
}

/// Keyword-polarity recommendation extraction, with an override for an
/// explicit "Hiring Recommendation" section: when the heading exists,
/// only the 500 characters after it are consulted, negatives first.
pub fn extract_recommendation(text: &str) -> Recommendation {
    if let Some(m) = RECOMMENDATION_SECTION.find(text) {
        let section: String = text[m.end()..].chars().take(500).collect();
        let lowered = section.to_lowercase();
        if NEGATIVE_INDICATORS.iter().any(|p| lowered.contains(p)) {
            return Recommendation::NoHire;
        }
        if POSITIVE_INDICATORS.iter().any(|p| lowered.contains(p)) {
            return Recommendation::Hire;
        }
        return Recommendation::Unknown;
    }

    let lowered = text.to_lowercase();
    let negatives = NEGATIVE_INDICATORS
        .iter()
        .filter(|p| lowered.contains(*p))
        .count();
    let positives = POSITIVE_INDICATORS
        .iter()
        .filter(|p| lowered.contains(*p))
        .count();

    if negatives > positives {
        Recommendation::NoHire
    } else if positives > negatives {
        Recommendation::Hire
    } else {
        Recommendation::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn langs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_axis_scores_parsed() {
        let text = "Technical Skills: 7/10\nCommunication - 8.5/10\nProblem Solving: 6/10";
        let report = extract_scores(text, &[], &[]);
        assert_eq!(report.technical_skills, Some(7.0));
        assert_eq!(report.communication, Some(8.5));
        assert_eq!(report.problem_solving, Some(6.0));
        assert_eq!(report.job_fit, None);
    }

    #[test]
    fn test_overall_falls_back_to_mean() {
        let text = "Technical: 6/10\nCommunication: 8/10";
        let report = extract_scores(text, &[], &[]);
        assert_eq!(report.overall_score, Some(7.0));
    }

    #[test]
    fn test_explicit_overall_wins() {
        let text = "Technical: 6/10\nOverall Score: 9/10";
        let report = extract_scores(text, &[], &[]);
        assert_eq!(report.overall_score, Some(9.0));
    }

    #[test]
    fn test_parse_failure_is_unknown_not_zero() {
        let report = extract_scores("A qualitative report with no numbers.", &[], &[]);
        assert_eq!(report.technical_skills, None);
        assert_eq!(report.overall_score, None);
    }

    #[test]
    fn test_untested_language_never_scored() {
        let text = "English proficiency: 8/10\nFrench proficiency: 7/10";
        let report = extract_scores(text, &langs(&["English", "French"]), &langs(&["English"]));

        let english = &report.language_scores[0];
        assert_eq!(english.language, "English");
        assert_eq!(english.score, Some(8.0));

        // The model fabricated a French score; it must be dropped.
        let french = &report.language_scores[1];
        assert_eq!(french.language, "French");
        assert_eq!(french.score, None);
    }

    #[test]
    fn test_recommendation_polarity_counting() {
        assert_eq!(
            extract_recommendation("A strong candidate, good fit for the team."),
            Recommendation::Hire
        );
        assert_eq!(
            extract_recommendation("We do not recommend proceeding; not a good fit."),
            Recommendation::NoHire
        );
        assert_eq!(
            extract_recommendation("The interview covered several topics."),
            Recommendation::Unknown
        );
    }

    #[test]
    fn test_recommendation_section_overrides_body() {
        let text = "The candidate seems a good fit overall and is qualified.\n\n\
                    Hiring Recommendation\nWe do not recommend hiring at this time.";
        assert_eq!(extract_recommendation(text), Recommendation::NoHire);
    }

    #[test]
    fn test_not_qualified_counts_negative_in_section() {
        let text = "Hiring Recommendation: the candidate is not qualified for this role.";
        assert_eq!(extract_recommendation(text), Recommendation::NoHire);
    }
}
