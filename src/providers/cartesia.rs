//! # Cartesia Backends
//!
//! Alternate TTS (Sonic) and STT (ink-whisper) vendor. Kept
//! interface-compatible with the ElevenLabs backends so a session can
//! select either at creation; the quota remediation text of each
//! names the other.

use crate::error::{AppError, AppResult};
use crate::providers::{call_with_retry, classify_http_failure, SpeechToText, TextToSpeech};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const API_BASE: &str = "https://api.cartesia.ai";
const API_VERSION: &str = "2024-06-10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CartesiaTts {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
    voice_id: String,
}

impl CartesiaTts {
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
            .post(format!("{}/tts/bytes", API_BASE))
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", API_VERSION)
            .json(&serde_json::json!({
                "model_id": self.model_id,
                "transcript": text,
                "voice": { "mode": "id", "id": self.voice_id },
                "output_format": {
                    "container": "wav",
                    "encoding": "pcm_s16le",
                    "sample_rate": 44100,
                },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("cartesia", status, &body));
        }

        let audio = response.bytes().await?.to_vec();
        debug!(bytes = audio.len(), "Cartesia TTS audio received");
        Ok(audio)
    }
}

#[async_trait]
impl TextToSpeech for CartesiaTts {
    async fn synthesize(&self, text: &str) -> AppResult<Vec<u8>> {
        info!(
            model = %self.model_id,
            voice = %self.voice_id,
            chars = text.len(),
            "Cartesia TTS request"
        );
        call_with_retry("Cartesia TTS", || self.synthesize_once(text)).await
    }

    fn audio_format(&self) -> &'static str {
        "wav"
    }
}

pub struct CartesiaStt {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct SttResponse {
    text: String,
}

impl CartesiaStt {
    pub fn new(api_key: String, model_id: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            model_id,
        }
    }

    async fn transcribe_once(&self, audio: &[u8], format_hint: &str) -> AppResult<String> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(format!("audio.{}", format_hint))
            .mime_str("application/octet-stream")
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model_id.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/stt", API_BASE))
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", API_VERSION)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("cartesia", status, &body));
        }

        let parsed: SttResponse = response.json().await?;
        Ok(parsed.text)
    }
}

#[async_trait]
impl SpeechToText for CartesiaStt {
    async fn transcribe(&self, audio: &[u8], format_hint: &str) -> AppResult<String> {
        info!(model = %self.model_id, bytes = audio.len(), "Cartesia STT request");
        call_with_retry("Cartesia STT", || self.transcribe_once(audio, format_hint)).await
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
    fn test_tts_audio_format_is_wav() {
        let tts = CartesiaTts::new("k".into(), "sonic".into(), "voice".into());
        assert_eq!(tts.audio_format(), "wav");
    }

    #[test]
    fn test_stt_response_parsing() {
        let parsed: SttResponse = serde_json::from_str(r#"{"text":"bonjour"}"#).unwrap();
        assert_eq!(parsed.text, "bonjour");
    }
}
