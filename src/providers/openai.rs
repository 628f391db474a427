//! # OpenAI GPT Backend
//!
//! Chat-completions implementation of the [`LanguageModel`] trait.
//! Model ids may arrive with an `openai/` routing prefix from the
//! frontend; it is stripped before calling the API.

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

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// Generation settings per operation, matching the interview flow:
// conversational turns run warmer than the assessment.
const TURN_TEMPERATURE: f64 = 0.7;
const ASSESSMENT_TEMPERATURE: f64 = 0.3;
const TURN_MAX_TOKENS: u32 = 500;
const ASSESSMENT_MAX_TOKENS: u32 = 2000;
const AUDIO_CHECK_MAX_TOKENS: u32 = 100;
const NAME_REQUEST_MAX_TOKENS: u32 = 150;
const GREETING_MAX_TOKENS: u32 = 300;

pub struct GptLlm {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

impl GptLlm {
    pub fn new(api_key: String, model_id: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            api_key,
            model_id: normalize_model(&model_id),
        }
    }

    async fn chat_once(
        &self,
        messages: &[serde_json::Value],
        temperature: f64,
        max_tokens: u32,
    ) -> AppResult<String> {
        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model_id,
                "messages": messages,
                "temperature": temperature,
                "max_tokens": max_tokens,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("gpt", status, &body));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::Internal("GPT returned no choices".to_string()))?;
        debug!(chars = content.len(), "GPT completion received");
        Ok(content)
    }

    async fn chat(
        &self,
        messages: Vec<serde_json::Value>,
        temperature: f64,
        max_tokens: u32,
    ) -> AppResult<String> {
        let text =
            call_with_retry("GPT", || self.chat_once(&messages, temperature, max_tokens)).await?;
        Ok(prompts::clean_response(&text))
    }
}

#[async_trait]
impl LanguageModel for GptLlm {
    async fn generate_response(
        &self,
        history: &[ChatMessage],
        latest_message: &str,
        context: &PromptContext,
    ) -> AppResult<String> {
        info!(model = %self.model_id, "GPT interview turn");

        let mut messages = vec![
            json!({ "role": "system", "content": prompts::build_evaluator_prompt(context) }),
            json!({
                "role": "system",
                "content": prompts::language_directive(&context.current_language),
            }),
        ];
        for msg in history {
            messages.push(json!({ "role": msg.role, "content": msg.content }));
        }
        messages.push(json!({ "role": "user", "content": latest_message }));

        self.chat(messages, TURN_TEMPERATURE, TURN_MAX_TOKENS).await
    }

    async fn generate_assessment(
        &self,
        history: &[ChatMessage],
        context: &PromptContext,
    ) -> AppResult<String> {
        info!(model = %self.model_id, "GPT assessment");
        let prompt = prompts::build_assessment_prompt(history, context);
        self.chat(
            vec![json!({ "role": "user", "content": prompt })],
            ASSESSMENT_TEMPERATURE,
            ASSESSMENT_MAX_TOKENS,
        )
        .await
    }

    async fn generate_audio_check_prompt(&self, language: &str) -> AppResult<String> {
        let prompt = prompts::build_audio_check_prompt(language);
        self.chat(
            vec![json!({ "role": "user", "content": prompt })],
            TURN_TEMPERATURE,
            AUDIO_CHECK_MAX_TOKENS,
        )
        .await
    }

    async fn generate_name_request_prompt(&self, language: &str) -> AppResult<String> {
        let prompt = prompts::build_name_request_prompt(language);
        self.chat(
            vec![json!({ "role": "user", "content": prompt })],
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
        let prompt = prompts::build_opening_greeting_prompt(context, candidate_name);
        self.chat(
            vec![json!({ "role": "user", "content": prompt })],
            TURN_TEMPERATURE,
            GREETING_MAX_TOKENS,
        )
        .await
    }
}

fn normalize_model(model_id: &str) -> String {
    model_id
        .strip_prefix("openai/")
        .unwrap_or(model_id)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_prefix_is_normalized() {
        assert_eq!(normalize_model("openai/gpt-4o-mini"), "gpt-4o-mini");
        assert_eq!(normalize_model("gpt-4o-mini"), "gpt-4o-mini");
    }

    #[test]
    fn test_chat_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "Hello!");
    }
}
