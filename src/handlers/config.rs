use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// The effective service configuration, minus anything secret. API
/// keys live only in the environment and are never echoed here.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "providers": {
                "stt_provider": config.providers.stt_provider,
                "stt_model": config.providers.stt_model,
                "tts_provider": config.providers.tts_provider,
                "tts_model": config.providers.tts_model,
                "llm_provider": config.providers.llm_provider,
                "llm_model": config.providers.llm_model,
                "voice_id": config.providers.voice_id
            },
            "interview": {
                "budget_minutes": config.interview.budget_minutes,
                "max_concurrent_sessions": config.interview.max_concurrent_sessions,
                "completion_grace_secs": config.interview.completion_grace_secs
            }
        }
    })))
}
