//! # ElevenLabs Backends
//!
//! Batch speech-to-text (Scribe) and text-to-speech over the REST
//! API. The realtime STT socket lives in [`super::streaming`].

use crate::error::{AppError, AppResult};
use crate::providers::{call_with_retry, classify_http_failure, SpeechToText, TextToSpeech};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const API_BASE: &str = "https://api.elevenlabs.io/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ElevenLabsStt {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct SttResponse {
    text: String,
}

impl ElevenLabsStt {
    pub fn new(api_key: String, model_id: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            model_id,
        }
    }

    async fn transcribe_once(&self, audio: &[u8], format_hint: &str) -> AppResult<String> {
        let file_name = format!("audio.{}", format_hint);
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("model_id", self.model_id.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/speech-to-text", API_BASE))
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("elevenlabs", status, &body));
        }

        let parsed: SttResponse = response.json().await?;
        debug!(chars = parsed.text.len(), "ElevenLabs STT transcript received");
        Ok(parsed.text)
    }
}

#[async_trait]
impl SpeechToText for ElevenLabsStt {
    async fn transcribe(&self, audio: &[u8], format_hint: &str) -> AppResult<String> {
        info!(model = %self.model_id, bytes = audio.len(), "ElevenLabs STT request");
        call_with_retry("ElevenLabs STT", || self.transcribe_once(audio, format_hint)).await
    }
}

pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
    voice_id: String,
}

impl ElevenLabsTts {
    pub fn new(api_key: String, model_id: String, voice_id: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            model_id,
            voice_id,
        }
    }

    async fn synthesize_once(&self, text: &str) -> AppResult<Vec<u8>> {
        let response = self
            .client
            .post(format!(
                "{}/text-to-speech/{}?output_format=mp3_44100_128",
                API_BASE, self.voice_id
            ))
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.model_id,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("elevenlabs", status, &body));
        }

        let audio = response.bytes().await?.to_vec();
        debug!(bytes = audio.len(), "ElevenLabs TTS audio received");
        Ok(audio)
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> AppResult<Vec<u8>> {
        info!(
            model = %self.model_id,
            voice = %self.voice_id,
            chars = text.len(),
            "ElevenLabs TTS request"
        );
        call_with_retry("ElevenLabs TTS", || self.synthesize_once(text)).await
    }

    fn audio_format(&self) -> &'static str {
        "mp3"
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("reqwest client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tts_audio_format_is_mp3() {
        let tts = ElevenLabsTts::new("k".into(), "eleven_flash_v2_5".into(), "voice".into());
        assert_eq!(tts.audio_format(), "mp3");
    }

    #[test]
    fn test_stt_response_parsing() {
        let parsed: SttResponse =
            serde_json::from_str(r#"{"text":"hello world","language_code":"en"}"#).unwrap();
        assert_eq!(parsed.text, "hello world");
    }
}
