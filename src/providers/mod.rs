//! # Provider Gateway
//!
//! Uniform STT/TTS/LLM interfaces over pluggable vendor backends.
//! Backends are selected once at session creation and never
//! hot-swapped mid-call. All calls go through a shared retry policy:
//!
//! - transient network/DNS failures: up to 3 attempts, exponential
//!   backoff starting at 1 s and doubling;
//! - quota exhaustion: never retried, surfaces immediately with a
//!   remediation message naming the alternate provider;
//! - anything unclassified: one retry, then propagated.

pub mod cartesia;
pub mod elevenlabs;
pub mod gemini;
pub mod openai;
pub mod prompts;
pub mod streaming;

use crate::error::{AppError, AppResult};
use crate::session::conversation::{ChatMessage, SessionConfig};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Context fields every LLM prompt builder may draw on. The literal
/// prompt wording lives in [`prompts`]; only these fields are part of
/// the component contract.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub job_title: String,
    pub job_description: String,
    pub cv_text: String,
    pub custom_questions: Vec<String>,
    pub required_languages: Vec<String>,
    pub start_language: String,
    pub current_language: String,
    pub confirmed_name: Option<String>,
    pub tested_languages: Vec<String>,
    pub questions_in_current_language: u32,
    pub time_remaining_minutes: f64,
    pub total_minutes: f64,
    /// Pacing guidance from the time budget monitor, if any.
    pub pacing_instruction: Option<String>,
    /// Imperative language-switch instruction for this turn, if any.
    pub language_instruction: Option<String>,
    pub covered_topics: Vec<String>,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a complete audio blob. `format_hint` is the client's
    /// container format (e.g. "webm", "wav").
    async fn transcribe(&self, audio: &[u8], format_hint: &str) -> AppResult<String>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> AppResult<Vec<u8>>;

    /// Container format of the produced audio, told to the client so
    /// it can pick a decoder ("mp3", "wav").
    fn audio_format(&self) -> &'static str;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_response(
        &self,
        history: &[ChatMessage],
        latest_message: &str,
        context: &PromptContext,
    ) -> AppResult<String>;

    async fn generate_assessment(
        &self,
        history: &[ChatMessage],
        context: &PromptContext,
    ) -> AppResult<String>;

    async fn generate_audio_check_prompt(&self, language: &str) -> AppResult<String>;

    async fn generate_name_request_prompt(&self, language: &str) -> AppResult<String>;

    async fn generate_opening_greeting(
        &self,
        context: &PromptContext,
        candidate_name: Option<&str>,
    ) -> AppResult<String>;
}

/// The per-session provider selection, resolved once at creation.
#[derive(Clone)]
pub struct ProviderSet {
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub llm: Arc<dyn LanguageModel>,
}

/// Resolve a [`SessionConfig`] into concrete backends. API keys are
/// read from the environment here, so a key rotated between sessions
/// is picked up without a restart.
pub fn build_providers(config: &SessionConfig) -> AppResult<ProviderSet> {
    let stt: Arc<dyn SpeechToText> = match config.stt_provider.as_str() {
        "elevenlabs" | "elevenlabs_streaming" => Arc::new(elevenlabs::ElevenLabsStt::new(
            api_key("ELEVENLABS_API_KEY")?,
            config.stt_model.clone(),
        )),
        "cartesia" => Arc::new(cartesia::CartesiaStt::new(
            api_key("CARTESIA_API_KEY")?,
            config.stt_model.clone(),
        )),
        other => {
            return Err(AppError::ConfigError(format!(
                "Unknown STT provider '{}'",
                other
            )))
        }
    };

    let tts: Arc<dyn TextToSpeech> = match config.tts_provider.as_str() {
        "elevenlabs" => Arc::new(elevenlabs::ElevenLabsTts::new(
            api_key("ELEVENLABS_API_KEY")?,
            config.tts_model.clone(),
            config.voice_id.clone(),
        )),
        "cartesia" => Arc::new(cartesia::CartesiaTts::new(
            api_key("CARTESIA_API_KEY")?,
            config.tts_model.clone(),
            config.voice_id.clone(),
        )),
        other => {
            return Err(AppError::ConfigError(format!(
                "Unknown TTS provider '{}'",
                other
            )))
        }
    };

    let llm: Arc<dyn LanguageModel> = match config.llm_provider.as_str() {
        "gpt" => Arc::new(openai::GptLlm::new(
            api_key("OPENAI_API_KEY")?,
            config.llm_model.clone(),
        )),
        "gemini" => Arc::new(gemini::GeminiLlm::new(
            api_key("GEMINI_API_KEY")?,
            config.llm_model.clone(),
        )),
        other => {
            return Err(AppError::ConfigError(format!(
                "Unknown LLM provider '{}'",
                other
            )))
        }
    };

    Ok(ProviderSet { stt, tts, llm })
}

fn api_key(var: &str) -> AppResult<String> {
    std::env::var(var).map_err(|_| {
        AppError::ConfigError(format!(
            "{} is not set. Add it to the environment or the .env file.",
            var
        ))
    })
}

/// Run `op` under the gateway retry policy.
pub async fn call_with_retry<T, Fut>(
    label: &str,
    mut op: impl FnMut() -> Fut,
) -> AppResult<T>
where
    Fut: Future<Output = AppResult<T>>,
{
    let mut last_err: Option<AppError> = None;

    for attempt in 0..MAX_RETRIES {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err @ AppError::QuotaExceeded(_)) => return Err(err),
            Err(err) => {
                // Unclassified errors get a single retry; transient
                // network errors get the full schedule.
                let attempts_allowed = if err.is_retryable() { MAX_RETRIES } else { 2 };
                warn!(
                    label = %label,
                    attempt = attempt + 1,
                    error = %err,
                    "Provider call failed"
                );
                last_err = Some(err);

                if attempt + 1 >= attempts_allowed {
                    break;
                }
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
            }
        }
    }

    match last_err {
        Some(AppError::TransientNetwork(_)) => Err(AppError::TransientNetwork(format!(
            "{} failed after {} attempts. Please check your internet connection and try again.",
            label, MAX_RETRIES
        ))),
        Some(err) => Err(err),
        None => Err(AppError::Internal(format!("{} failed", label))),
    }
}

/// Classify an HTTP-level provider failure into the gateway taxonomy.
pub fn classify_http_failure(
    provider: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> AppError {
    let lowered = body.to_lowercase();
    let quota_hit = status == reqwest::StatusCode::PAYMENT_REQUIRED
        || lowered.contains("quota")
        || lowered.contains("quota_exceeded")
        || lowered.contains("credits");

    if quota_hit {
        return AppError::QuotaExceeded(quota_remediation(provider));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return AppError::TransientNetwork(format!("{} returned {}: {}", provider, status, body));
    }

    AppError::Internal(format!("{} returned {}: {}", provider, status, body))
}

/// User-facing remediation text for quota exhaustion, naming the
/// alternate provider for the same capability.
pub fn quota_remediation(provider: &str) -> String {
    let alternate = match provider {
        "elevenlabs" => "Cartesia",
        "cartesia" => "ElevenLabs",
        "gpt" => "Gemini",
        "gemini" => "GPT",
        _ => "another provider",
    };
    format!(
        "{provider} API quota exceeded - the account's credit limit has been reached.\n\
         Solutions:\n\
         1. Wait for the quota to reset (check the provider dashboard)\n\
         2. Enable usage-based billing or upgrade the plan\n\
         3. Switch to the {alternate} provider in the interview settings"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        tokio::time::pause();

        let result = call_with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::TransientNetwork("dns".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_quota_never_retried() {
        let calls = AtomicU32::new(0);

        let result: AppResult<()> = call_with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::QuotaExceeded("out of credits".into())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::QuotaExceeded(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unclassified_gets_one_retry() {
        let calls = AtomicU32::new(0);
        tokio::time::pause();

        let result: AppResult<()> = call_with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Internal("odd".into())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_reports_attempts() {
        tokio::time::pause();
        let result: AppResult<()> = call_with_retry("ElevenLabs TTS", || async {
            Err(AppError::TransientNetwork("unreachable".into()))
        })
        .await;

        let err = result.err().unwrap();
        assert!(format!("{}", err).contains("after 3 attempts"));
    }

    #[test]
    fn test_quota_classification_from_body() {
        let err = classify_http_failure(
            "elevenlabs",
            reqwest::StatusCode::UNAUTHORIZED,
            "quota_exceeded: not enough credits",
        );
        match err {
            AppError::QuotaExceeded(msg) => assert!(msg.contains("Cartesia")),
            other => panic!("expected quota error, got {:?}", other),
        }
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = classify_http_failure(
            "cartesia",
            reqwest::StatusCode::BAD_GATEWAY,
            "upstream hiccup",
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = classify_http_failure(
            "gpt",
            reqwest::StatusCode::BAD_REQUEST,
            "bad payload",
        );
        assert!(!err.is_retryable());
    }
}
