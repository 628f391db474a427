//! # Gemini Backend
//!
//! `generateContent` implementation of the [`LanguageModel`] trait.
//! Gemini uses `model` instead of `assistant` for its chat role and
//! takes the system prompt as a separate `system_instruction` block.

use crate::error::{AppError, AppResult};
use crate::providers::{
    call_with_retry, classify_http_failure, prompts, LanguageModel, PromptContext,
};
use crate::session::conversation::ChatMessage;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const TURN_TEMPERATURE: f64 = 0.7;
const ASSESSMENT_TEMPERATURE: f64 = 0.3;
const TURN_MAX_TOKENS: u32 = 500;
const ASSESSMENT_MAX_TOKENS: u32 = 2000;
const AUDIO_CHECK_MAX_TOKENS: u32 = 100;
const NAME_REQUEST_MAX_TOKENS: u32 = 150;
const GREETING_MAX_TOKENS: u32 = 300;

pub struct GeminiLlm {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: String,
}

impl GeminiLlm {
    pub fn new(api_key: String, model_id: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            api_key,
            model_id,
        }
    }

    async fn generate_once(
        &self,
        system_instruction: Option<&str>,
        contents: &[serde_json::Value],
        temperature: f64,
        max_tokens: u32,
    ) -> AppResult<String> {
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens,
            },
        });
        if let Some(instruction) = system_instruction {
            body["system_instruction"] = json!({ "parts": [{ "text": instruction }] });
        }

        let response = self
            .client
            .post(format!(
                "{}/{}:generateContent?key={}",
                API_BASE, self.model_id, self.api_key
            ))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("gemini", status, &body));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| AppError::Internal("Gemini returned no candidates".to_string()))?;
        debug!(chars = text.len(), "Gemini completion received");
        Ok(text)
    }

    async fn generate(
        &self,
        system_instruction: Option<String>,
        contents: Vec<serde_json::Value>,
        temperature: f64,
        max_tokens: u32,
    ) -> AppResult<String> {
        let text = call_with_retry("Gemini", || {
            self.generate_once(
                system_instruction.as_deref(),
                &contents,
                temperature,
                max_tokens,
            )
        })
        .await?;
        Ok(prompts::clean_response(&text))
    }

    fn user_prompt(prompt: String) -> Vec<serde_json::Value> {
        vec![json!({ "role": "user", "parts": [{ "text": prompt }] })]
    }
}

fn gemini_role(role: &str) -> &'static str {
    if role == "assistant" {
        "model"
    } else {
        "user"
    }
}

#[async_trait]
impl LanguageModel for GeminiLlm {
    async fn generate_response(
        &self,
        history: &[ChatMessage],
        latest_message: &str,
        context: &PromptContext,
    ) -> AppResult<String> {
        info!(model = %self.model_id, "Gemini interview turn");

        let system = format!(
            "{}\n\n{}",
            prompts::build_evaluator_prompt(context),
            prompts::language_directive(&context.current_language)
        );

        let mut contents: Vec<serde_json::Value> = history
            .iter()
            .map(|msg| {
                json!({
                    "role": gemini_role(&msg.role),
                    "parts": [{ "text": msg.content }],
                })
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": latest_message }] }));

        self.generate(Some(system), contents, TURN_TEMPERATURE, TURN_MAX_TOKENS)
            .await
    }

    async fn generate_assessment(
        &self,
        history: &[ChatMessage],
        context: &PromptContext,
    ) -> AppResult<String> {
        info!(model = %self.model_id, "Gemini assessment");
        let prompt = prompts::build_assessment_prompt(history, context);
        self.generate(
            None,
            Self::user_prompt(prompt),
            ASSESSMENT_TEMPERATURE,
            ASSESSMENT_MAX_TOKENS,
        )
        .await
    }

    async fn generate_audio_check_prompt(&self, language: &str) -> AppResult<String> {
        self.generate(
            None,
            Self::user_prompt(prompts::build_audio_check_prompt(language)),
            TURN_TEMPERATURE,
            AUDIO_CHECK_MAX_TOKENS,
        )
        .await
    }

    async fn generate_name_request_prompt(&self, language: &str) -> AppResult<String> {
        self.generate(
            None,
            Self::user_prompt(prompts::build_name_request_prompt(language)),
            TURN_TEMPERATURE,
            NAME_REQUEST_MAX_TOKENS,
        )
        .await
    }

    async fn generate_opening_greeting(
        &self,
        context: &PromptContext,
        candidate_name: Option<&str>,
    ) -> AppResult<String> {
        self.generate(
            None,
            Self::user_prompt(prompts::build_opening_greeting_prompt(context, candidate_name)),
            TURN_TEMPERATURE,
            GREETING_MAX_TOKENS,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_mapping() {
        assert_eq!(gemini_role("assistant"), "model");
        assert_eq!(gemini_role("user"), "user");
    }

    #[test]
    fn test_generate_response_parsing() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Bonjour."}],"role":"model"}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.candidates[0].content.parts[0].text, "Bonjour.");
    }
}
