//! # Configuration Management
//!
//! Loads application configuration from multiple sources, in priority
//! order (highest wins):
//!
//! 1. Environment variables with the `APP_` prefix
//!    (e.g. `APP_SERVER_PORT=3000`)
//! 2. A `config.toml` file next to the binary (optional)
//! 3. Built-in defaults
//!
//! `HOST` and `PORT` are honoured as bare overrides for deployment
//! platforms that set them without the prefix. Provider API keys are
//! read from the environment at call time (`ELEVENLABS_API_KEY`,
//! `CARTESIA_API_KEY`, `OPENAI_API_KEY`, `GEMINI_API_KEY`), never from
//! the config file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub interview: InterviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Default provider/model selections used when a `start_interview`
/// frame does not specify its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub stt_provider: String,
    pub stt_model: String,
    pub tts_provider: String,
    pub tts_model: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub voice_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewConfig {
    /// Wall-clock allowance per interview, in minutes.
    pub budget_minutes: f64,
    pub max_concurrent_sessions: usize,
    /// Fixed delay before the server closes the socket after
    /// completion, so in-flight audio playback can finish.
    pub completion_grace_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            providers: ProvidersConfig {
                stt_provider: "elevenlabs".to_string(),
                stt_model: "scribe_v1".to_string(),
                tts_provider: "elevenlabs".to_string(),
                tts_model: "eleven_flash_v2_5".to_string(),
                llm_provider: "gemini".to_string(),
                llm_model: "gemini-2.5-flash-lite".to_string(),
                voice_id: "cjVigY5qzO86Huf0OWal".to_string(),
            },
            interview: InterviewConfig {
                budget_minutes: 15.0,
                max_concurrent_sessions: 10,
                completion_grace_secs: 5,
            },
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.interview.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.interview.budget_minutes <= 0.0 {
            return Err(anyhow::anyhow!("Interview budget must be greater than 0 minutes"));
        }

        let known_stt = ["elevenlabs", "elevenlabs_streaming", "cartesia"];
        if !known_stt.contains(&self.providers.stt_provider.as_str()) {
            return Err(anyhow::anyhow!(
                "Unknown STT provider '{}'",
                self.providers.stt_provider
            ));
        }

        let known_tts = ["elevenlabs", "cartesia"];
        if !known_tts.contains(&self.providers.tts_provider.as_str()) {
            return Err(anyhow::anyhow!(
                "Unknown TTS provider '{}'",
                self.providers.tts_provider
            ));
        }

        let known_llm = ["gemini", "gpt"];
        if !known_llm.contains(&self.providers.llm_provider.as_str()) {
            return Err(anyhow::anyhow!(
                "Unknown LLM provider '{}'",
                self.providers.llm_provider
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.providers.tts_provider, "elevenlabs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_zero_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_unknown_provider() {
        let mut config = AppConfig::default();
        config.providers.llm_provider = "palm".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_nonpositive_budget() {
        let mut config = AppConfig::default();
        config.interview.budget_minutes = 0.0;
        assert!(config.validate().is_err());
    }
}
