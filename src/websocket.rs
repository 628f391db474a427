//! # Interview WebSocket Handler
//!
//! One WebSocket connection per candidate, handled by an Actix actor.
//! The actor itself stays synchronous; every provider call runs in a
//! spawned task that reports back through actor messages, so a slow
//! STT or LLM call never blocks the socket.
//!
//! ## Protocol
//! - **Client → Server**: `start_interview`, `audio` (base64 blob per
//!   utterance), `audio_stream_start` / `audio_chunk` / `audio_commit`
//!   (streaming STT path), `end_interview`, `pong`.
//! - **Server → Client**: `greeting`, `response`, `stream_ready`,
//!   `assessment`, `error`, `ping`.
//!
//! Turns are strictly ordered: a second utterance arriving while one
//! is still being processed is rejected with an error frame rather
//! than queued, which keeps the transcript ordering unambiguous.

use crate::assessment;
use crate::collaborators::Collaborators;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::providers::streaming::StreamingSttSession;
use crate::providers::{build_providers, PromptContext, ProviderSet};
use crate::session::conversation::{ConversationState, JobContext, Phase, SessionConfig, Speaker};
use crate::session::language::{detect_interviewer_switch, plan_turn};
use crate::session::phase::{advance_precheck, is_closing_utterance, PrecheckAction};
use crate::session::registry::{SessionHandle, SessionRegistry};
use crate::session::timing::{TimeBudget, TIME_UP_MESSAGE};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fields of the `start_interview` frame. The job context may arrive
/// inline or as ids resolved through the collaborator interfaces;
/// provider fields default from the service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartInterviewRequest {
    #[serde(default)]
    pub job_context: Option<JobContext>,
    #[serde(default)]
    pub job_offer_id: Option<String>,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub stt_provider: Option<String>,
    #[serde(default)]
    pub stt_model: Option<String>,
    #[serde(default)]
    pub tts_provider: Option<String>,
    #[serde(default)]
    pub tts_model: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub time_limit_minutes: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    StartInterview(StartInterviewRequest),

    /// One complete utterance, base64-encoded.
    Audio { data: String },

    /// Open a streaming STT session for the next utterance.
    AudioStreamStart,

    /// One streaming chunk, base64-encoded.
    AudioChunk { data: String },

    /// End-of-utterance marker for the streaming path.
    AudioCommit,

    EndInterview,

    Pong { timestamp: u64 },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Greeting {
        session_id: String,
        text: String,
        audio: Option<String>,
        audio_format: String,
        phase: String,
        time_limit_minutes: f64,
    },
    Response {
        user_text: String,
        interviewer_text: String,
        audio: Option<String>,
        audio_format: String,
        phase: String,
    },
    StreamReady,
    Assessment {
        text: String,
        scores: Option<crate::assessment::scores::ScoreReport>,
        recommendation: crate::assessment::scores::Recommendation,
    },
    Error {
        message: String,
    },
    Ping {
        timestamp: u64,
    },
}

/// Everything a spawned turn task needs, cloned out of the actor once
/// the session is established.
#[derive(Clone)]
struct TurnEnv {
    app_state: AppState,
    registry: Arc<SessionRegistry>,
    collaborators: Collaborators,
    handle: Arc<SessionHandle>,
    providers: ProviderSet,
    addr: Addr<InterviewSocket>,
}

pub struct InterviewSocket {
    app_state: AppState,
    registry: Arc<SessionRegistry>,
    collaborators: Collaborators,
    env: Option<TurnEnv>,
    streaming: Option<Arc<StreamingSttSession>>,
    turn_in_flight: bool,
    last_heartbeat: Instant,
}

impl InterviewSocket {
    pub fn new(
        app_state: AppState,
        registry: Arc<SessionRegistry>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            app_state,
            registry,
            collaborators,
            env: None,
            streaming: None,
            turn_in_flight: false,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_frame(ctx: &mut ws::WebsocketContext<Self>, frame: &ServerFrame) {
        match serde_json::to_string(frame) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(error = %err, "Failed to serialize outbound frame"),
        }
    }

    fn send_error(ctx: &mut ws::WebsocketContext<Self>, message: impl Into<String>) {
        let message = message.into();
        warn!(message = %message, "Sending error frame");
        Self::send_frame(ctx, &ServerFrame::Error { message });
    }

    fn handle_start(&mut self, request: StartInterviewRequest, ctx: &mut ws::WebsocketContext<Self>) {
        if self.env.is_some() {
            Self::send_error(ctx, "An interview is already running on this connection.");
            return;
        }

        let app_state = self.app_state.clone();
        let registry = self.registry.clone();
        let collaborators = self.collaborators.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            start_session(app_state, registry, collaborators, request, addr).await;
        });
    }

    fn handle_audio(&mut self, data: String, ctx: &mut ws::WebsocketContext<Self>) {
        let env = match &self.env {
            Some(env) => env.clone(),
            None => {
                Self::send_error(ctx, "No interview session. Send start_interview first.");
                return;
            }
        };
        if self.turn_in_flight {
            Self::send_error(ctx, "Still processing the previous message. Please wait.");
            return;
        }

        let audio = match base64::engine::general_purpose::STANDARD.decode(&data) {
            Ok(bytes) => bytes,
            Err(err) => {
                Self::send_error(ctx, format!("Invalid base64 audio payload: {}", err));
                return;
            }
        };

        self.turn_in_flight = true;
        tokio::spawn(async move {
            process_utterance(env, audio).await;
        });
    }

    fn handle_stream_start(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let env = match &self.env {
            Some(env) => env.clone(),
            None => {
                Self::send_error(ctx, "No interview session. Send start_interview first.");
                return;
            }
        };
        if env.handle.config.stt_provider != "elevenlabs_streaming" {
            Self::send_error(
                ctx,
                "Streaming transcription requires the elevenlabs_streaming STT provider.",
            );
            return;
        }
        if self.streaming.is_some() {
            Self::send_error(ctx, "A streaming session is already open.");
            return;
        }

        let model_id = env.handle.config.stt_model.clone();
        let language = {
            let state = env.handle.state.lock().expect("state lock poisoned");
            state.current_language.clone()
        };
        let addr = env.addr.clone();
        tokio::spawn(async move {
            let api_key = match std::env::var("ELEVENLABS_API_KEY") {
                Ok(key) => key,
                Err(_) => {
                    addr.do_send(SendFrame(ServerFrame::Error {
                        message: "ELEVENLABS_API_KEY is not set.".to_string(),
                    }));
                    return;
                }
            };
            match StreamingSttSession::connect(&api_key, &model_id, language_code(&language)).await
            {
                Ok(session) => addr.do_send(StreamOpened(Arc::new(session))),
                Err(err) => addr.do_send(SendFrame(ServerFrame::Error {
                    message: err.user_message(),
                })),
            }
        });
    }

    fn handle_chunk(&mut self, data: String, ctx: &mut ws::WebsocketContext<Self>) {
        let stream = match &self.streaming {
            Some(stream) => stream.clone(),
            None => {
                Self::send_error(ctx, "No streaming session. Send audio_stream_start first.");
                return;
            }
        };
        let env = match &self.env {
            Some(env) => env.clone(),
            None => return,
        };
        let audio = match base64::engine::general_purpose::STANDARD.decode(&data) {
            Ok(bytes) => bytes,
            Err(err) => {
                Self::send_error(ctx, format!("Invalid base64 audio payload: {}", err));
                return;
            }
        };

        // Browsers resend chunks on flaky connections; drop repeats.
        if env
            .handle
            .dedup
            .lock()
            .expect("dedup lock poisoned")
            .is_duplicate(&audio)
        {
            debug!("Dropping duplicate streaming chunk");
            return;
        }
        env.handle.touch();

        let addr = env.addr.clone();
        tokio::spawn(async move {
            if let Err(err) = stream.send_chunk(&audio).await {
                let fatal = matches!(err, AppError::AudioConversionUnavailable(_));
                addr.do_send(SendFrame(ServerFrame::Error {
                    message: err.user_message(),
                }));
                if fatal {
                    addr.do_send(ClearStream);
                }
            }
        });
    }

    fn handle_commit(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let stream = match self.streaming.take() {
            Some(stream) => stream,
            None => {
                Self::send_error(ctx, "No streaming session. Send audio_stream_start first.");
                return;
            }
        };
        let env = match &self.env {
            Some(env) => env.clone(),
            None => return,
        };
        if self.turn_in_flight {
            Self::send_error(ctx, "Still processing the previous message. Please wait.");
            self.streaming = Some(stream);
            return;
        }

        self.turn_in_flight = true;
        tokio::spawn(async move {
            let result = async {
                stream.commit().await?;
                stream.wait_for_transcript().await
            }
            .await;
            stream.close();

            match result {
                Ok(transcript) => advance_with_transcript(env, transcript).await,
                Err(err) => {
                    env.addr.do_send(SendFrame(ServerFrame::Error {
                        message: err.user_message(),
                    }));
                    env.addr.do_send(TurnDone);
                }
            }
        });
    }

    fn handle_end(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let env = match &self.env {
            Some(env) => env.clone(),
            None => {
                Self::send_error(ctx, "No interview session to end.");
                return;
            }
        };
        self.turn_in_flight = true;
        tokio::spawn(async move {
            finish_session(&env).await;
            env.addr.do_send(TurnDone);
        });
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct SendFrame(ServerFrame);

#[derive(Message)]
#[rtype(result = "()")]
struct SessionReady {
    handle: Arc<SessionHandle>,
    providers: ProviderSet,
}

#[derive(Message)]
#[rtype(result = "()")]
struct TurnDone;

#[derive(Message)]
#[rtype(result = "()")]
struct StreamOpened(Arc<StreamingSttSession>);

#[derive(Message)]
#[rtype(result = "()")]
struct ClearStream;

/// Delivered after the assessment is sent; closes the socket once the
/// grace period for in-flight client frames has passed.
#[derive(Message)]
#[rtype(result = "()")]
struct ScheduleClose;

impl Actor for InterviewSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Interview WebSocket connection started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            let frame = ServerFrame::Ping {
                timestamp: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64,
            };
            Self::send_frame(ctx, &frame);
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Interview WebSocket connection stopped");

        if let Some(stream) = self.streaming.take() {
            stream.close();
        }
        // A vanished client still gets its result persisted.
        if let Some(env) = self.env.take() {
            tokio::spawn(async move {
                finish_session(&env).await;
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterviewSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::StartInterview(request)) => self.handle_start(request, ctx),
                Ok(ClientFrame::Audio { data }) => self.handle_audio(data, ctx),
                Ok(ClientFrame::AudioStreamStart) => self.handle_stream_start(ctx),
                Ok(ClientFrame::AudioChunk { data }) => self.handle_chunk(data, ctx),
                Ok(ClientFrame::AudioCommit) => self.handle_commit(ctx),
                Ok(ClientFrame::EndInterview) => self.handle_end(ctx),
                Ok(ClientFrame::Pong { .. }) => {
                    self.last_heartbeat = Instant::now();
                }
                Err(err) => {
                    let err = AppError::MalformedControlMessage(format!("Invalid frame: {}", err));
                    Self::send_error(ctx, err.user_message());
                }
            },
            Ok(ws::Message::Binary(data)) => {
                // Raw binary is accepted as audio: a chunk while a
                // stream is open, a complete utterance otherwise.
                let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
                if self.streaming.is_some() {
                    self.handle_chunk(encoded, ctx);
                } else {
                    self.handle_audio(encoded, ctx);
                }
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(reason = ?reason, "WebSocket closed by client");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<SendFrame> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: SendFrame, ctx: &mut Self::Context) {
        Self::send_frame(ctx, &msg.0);
    }
}

impl Handler<SessionReady> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionReady, ctx: &mut Self::Context) {
        self.env = Some(TurnEnv {
            app_state: self.app_state.clone(),
            registry: self.registry.clone(),
            collaborators: self.collaborators.clone(),
            handle: msg.handle,
            providers: msg.providers,
            addr: ctx.address(),
        });
    }
}

impl Handler<TurnDone> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, _msg: TurnDone, _ctx: &mut Self::Context) {
        self.turn_in_flight = false;
    }
}

impl Handler<StreamOpened> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: StreamOpened, ctx: &mut Self::Context) {
        self.streaming = Some(msg.0);
        Self::send_frame(ctx, &ServerFrame::StreamReady);
    }
}

impl Handler<ClearStream> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, _msg: ClearStream, _ctx: &mut Self::Context) {
        if let Some(stream) = self.streaming.take() {
            stream.close();
        }
    }
}

impl Handler<ScheduleClose> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, _msg: ScheduleClose, ctx: &mut Self::Context) {
        let grace = self.app_state.get_config().interview.completion_grace_secs;
        self.env = None;
        ctx.run_later(Duration::from_secs(grace), |_, ctx| {
            ctx.close(None);
            ctx.stop();
        });
    }
}

/// Resolve the job context from the request: inline wins, otherwise
/// the collaborator lookups fill it in.
pub async fn resolve_job_context(
    collaborators: &Collaborators,
    request: &StartInterviewRequest,
) -> AppResult<JobContext> {
    let mut context = match (&request.job_context, &request.job_offer_id) {
        (Some(inline), _) => inline.clone(),
        (None, Some(job_offer_id)) => collaborators.jobs.fetch_job_context(job_offer_id).await?,
        (None, None) => {
            return Err(AppError::MalformedControlMessage(
                "start_interview requires job_context or job_offer_id".to_string(),
            ))
        }
    };

    if let Some(application_id) = &request.application_id {
        let candidate = collaborators.candidates.fetch_candidate(application_id).await?;
        if context.cv_text.is_empty() {
            context.cv_text = candidate.cv_text;
        }
        if context.record_name.is_none() {
            context.record_name = candidate.confirmed_name;
        }
    }

    if context.required_languages.is_empty() {
        return Err(AppError::MalformedControlMessage(
            "job context must list at least one required language".to_string(),
        ));
    }

    Ok(context)
}

/// Per-request provider selection over the configured defaults.
pub fn resolve_session_config(config: &AppConfig, request: &StartInterviewRequest) -> SessionConfig {
    let defaults = &config.providers;
    SessionConfig {
        stt_provider: request
            .stt_provider
            .clone()
            .unwrap_or_else(|| defaults.stt_provider.clone()),
        stt_model: request
            .stt_model
            .clone()
            .unwrap_or_else(|| defaults.stt_model.clone()),
        tts_provider: request
            .tts_provider
            .clone()
            .unwrap_or_else(|| defaults.tts_provider.clone()),
        tts_model: request
            .tts_model
            .clone()
            .unwrap_or_else(|| defaults.tts_model.clone()),
        voice_id: request
            .voice_id
            .clone()
            .unwrap_or_else(|| defaults.voice_id.clone()),
        llm_provider: request
            .llm_provider
            .clone()
            .unwrap_or_else(|| defaults.llm_provider.clone()),
        llm_model: request
            .llm_model
            .clone()
            .unwrap_or_else(|| defaults.llm_model.clone()),
    }
}

fn language_code(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "french" => "fr",
        "arabic" => "ar",
        "spanish" => "es",
        "german" => "de",
        _ => "en",
    }
}

async fn start_session(
    app_state: AppState,
    registry: Arc<SessionRegistry>,
    collaborators: Collaborators,
    request: StartInterviewRequest,
    addr: Addr<InterviewSocket>,
) {
    let config = app_state.get_config();

    let job_context = match resolve_job_context(&collaborators, &request).await {
        Ok(context) => context,
        Err(err) => {
            addr.do_send(SendFrame(ServerFrame::Error {
                message: err.user_message(),
            }));
            return;
        }
    };

    let session_config = resolve_session_config(&config, &request);
    let budget_minutes = request
        .time_limit_minutes
        .unwrap_or(config.interview.budget_minutes);

    let (session_id, handle) =
        match registry.create(session_config.clone(), job_context, budget_minutes) {
            Ok(created) => created,
            Err(err) => {
                addr.do_send(SendFrame(ServerFrame::Error {
                    message: err.user_message(),
                }));
                return;
            }
        };

    let providers = match build_providers(&session_config) {
        Ok(providers) => providers,
        Err(err) => {
            registry.remove(&session_id);
            addr.do_send(SendFrame(ServerFrame::Error {
                message: err.user_message(),
            }));
            return;
        }
    };
    app_state.session_started();

    let start_language = {
        let state = handle.state.lock().expect("state lock poisoned");
        state.start_language.clone()
    };

    let greeting = match providers.llm.generate_audio_check_prompt(&start_language).await {
        Ok(text) => text,
        Err(err) => {
            app_state.provider_failure();
            warn!(error = %err, "Audio-check prompt generation failed, using fallback");
            "Hello! Welcome to your interview. Before we begin, can you hear me clearly? \
             Please say a few words so I can check your audio."
                .to_string()
        }
    };

    // A TTS failure degrades to a text-only greeting instead of
    // aborting the session.
    let audio = match providers.tts.synthesize(&greeting).await {
        Ok(bytes) => Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
        Err(err) => {
            app_state.provider_failure();
            addr.do_send(SendFrame(ServerFrame::Error {
                message: err.user_message(),
            }));
            None
        }
    };

    {
        let mut state = handle.state.lock().expect("state lock poisoned");
        state.append(Speaker::System, &greeting);
    }

    info!(session_id = %session_id, budget_minutes, "Interview session started");
    addr.do_send(SessionReady {
        handle: handle.clone(),
        providers: providers.clone(),
    });
    addr.do_send(SendFrame(ServerFrame::Greeting {
        session_id,
        text: greeting,
        audio,
        audio_format: providers.tts.audio_format().to_string(),
        phase: Phase::AudioCheck.as_str().to_string(),
        time_limit_minutes: budget_minutes,
    }));
}

/// One complete batch-mode utterance: dedup, transcribe, advance.
async fn process_utterance(env: TurnEnv, audio: Vec<u8>) {
    if env
        .handle
        .dedup
        .lock()
        .expect("dedup lock poisoned")
        .is_duplicate(&audio)
    {
        debug!("Dropping duplicate audio blob");
        env.addr.do_send(TurnDone);
        return;
    }
    env.handle.touch();

    match env.providers.stt.transcribe(&audio, "webm").await {
        Ok(transcript) => advance_with_transcript(env, transcript).await,
        Err(err) => {
            report_provider_error(&env, err);
            env.addr.do_send(TurnDone);
        }
    }
}

/// Routing decision for one transcribed utterance, taken against phase
/// and budget before any model call.
#[derive(Debug, PartialEq)]
enum TurnPlan {
    /// The session already completed; drop the utterance.
    Ignore,
    /// Budget spent: the fixed closing line goes out and the session
    /// finishes. No further model turn is generated.
    TimeUp,
    /// Still in AUDIO_CHECK / NAME_CHECK; the pre-check machine hands
    /// back what to say next.
    Precheck(Option<PrecheckAction>),
    /// Regular INTERVIEW-phase exchange.
    Interview,
}

fn plan_transcript_turn(state: &mut ConversationState, user_text: &str) -> TurnPlan {
    if state.phase() == Phase::Completed {
        return TurnPlan::Ignore;
    }
    if TimeBudget::for_session(state).is_exhausted() {
        state.append(Speaker::Candidate, user_text);
        state.append(Speaker::System, TIME_UP_MESSAGE);
        return TurnPlan::TimeUp;
    }
    if state.phase() < Phase::Interview {
        state.append(Speaker::Candidate, user_text);
        return TurnPlan::Precheck(advance_precheck(state, user_text));
    }
    TurnPlan::Interview
}

/// Advance the session with one candidate transcript: budget check,
/// pre-check machine or interview turn, TTS, response frame.
async fn advance_with_transcript(env: TurnEnv, transcript: String) {
    let user_text = transcript.trim().to_string();
    if user_text.is_empty() {
        let err = AppError::EmptyTranscription("Transcription produced no text".to_string());
        env.addr.do_send(SendFrame(ServerFrame::Error {
            message: err.user_message(),
        }));
        env.addr.do_send(TurnDone);
        return;
    }
    debug!(text = %user_text, "Candidate utterance transcribed");

    let plan = {
        let mut state = env.handle.state.lock().expect("state lock poisoned");
        plan_transcript_turn(&mut state, &user_text)
    };

    let reply = match plan {
        TurnPlan::Ignore => {
            env.addr.do_send(TurnDone);
            return;
        }
        TurnPlan::TimeUp => {
            send_turn_response(&env, &user_text, TIME_UP_MESSAGE).await;
            finish_session(&env).await;
            env.addr.do_send(TurnDone);
            return;
        }
        TurnPlan::Precheck(action) => match action {
            Some(PrecheckAction::RequestName) => {
                let language = {
                    let state = env.handle.state.lock().expect("state lock poisoned");
                    state.start_language.clone()
                };
                match env.providers.llm.generate_name_request_prompt(&language).await {
                    Ok(text) => text,
                    Err(err) => {
                        report_provider_error(&env, err);
                        env.addr.do_send(TurnDone);
                        return;
                    }
                }
            }
            Some(PrecheckAction::BeginInterview { spoken_name }) => {
                let (context, confirmed) = {
                    let state = env.handle.state.lock().expect("state lock poisoned");
                    let budget = TimeBudget::for_session(&state);
                    (
                        prompt_context(&state, &budget, None),
                        state.confirmed_name().map(|s| s.to_string()),
                    )
                };
                let name = confirmed.or(spoken_name);
                match env
                    .providers
                    .llm
                    .generate_opening_greeting(&context, name.as_deref())
                    .await
                {
                    Ok(text) => text,
                    Err(err) => {
                        report_provider_error(&env, err);
                        env.addr.do_send(TurnDone);
                        return;
                    }
                }
            }
            None => {
                // AUDIO_CHECK held on an empty-equivalent utterance.
                env.addr.do_send(TurnDone);
                return;
            }
        },
        TurnPlan::Interview => match interview_turn(&env, &user_text).await {
            Ok(text) => text,
            Err(err) => {
                report_provider_error(&env, err);
                env.addr.do_send(TurnDone);
                return;
            }
        },
    };

    let closing = {
        let mut state = env.handle.state.lock().expect("state lock poisoned");
        state.append(Speaker::System, &reply);
        state.phase() == Phase::Interview && is_closing_utterance(&reply)
    };

    send_turn_response(&env, &user_text, &reply).await;

    if closing {
        info!("Interviewer closed the interview");
        finish_session(&env).await;
    }
    env.addr.do_send(TurnDone);
}

/// One INTERVIEW-phase exchange: language plan, pacing, LLM response,
/// then the state updates the produced turn implies.
async fn interview_turn(env: &TurnEnv, user_text: &str) -> AppResult<String> {
    let (history, plan, context) = {
        let mut state = env.handle.state.lock().expect("state lock poisoned");
        let history = state.history_for_llm();
        state.append(Speaker::Candidate, user_text);

        // The candidate just produced content in the active language.
        let current = state.current_language.clone();
        state.mark_language_tested(&current);

        let plan = plan_turn(&state, user_text);
        let budget = TimeBudget::for_session(&state);
        let context = prompt_context(&state, &budget, plan.instruction.clone());
        (history, plan, context)
    };

    let reply = env
        .providers
        .llm
        .generate_response(&history, user_text, &context)
        .await?;

    {
        let mut state = env.handle.state.lock().expect("state lock poisoned");
        if let Some(target) = &plan.switch_to {
            state.change_language(target);
        } else if let Some(target) = detect_interviewer_switch(&state, &reply) {
            state.change_language(&target);
        }
        state.record_exchange();
        note_covered_questions(&mut state, &reply);
    }

    Ok(reply)
}

/// Mark custom questions the interviewer just asked as covered, so
/// later prompts steer toward the remaining ones.
fn note_covered_questions(state: &mut ConversationState, reply: &str) {
    let lowered = reply.to_lowercase();
    let questions = state.job_context.custom_questions.clone();
    for question in questions {
        let prefix: String = question
            .to_lowercase()
            .split_whitespace()
            .take(6)
            .collect::<Vec<_>>()
            .join(" ");
        if prefix.len() >= 10 && lowered.contains(&prefix) {
            state.cover_topic(&question);
        }
    }
}

/// Frames emitted for one completed turn. A synthesis failure produces
/// an `error` frame carrying the provider's remediation message ahead
/// of the text-only `response`, so the client sees both.
fn turn_frames(
    synthesis: AppResult<String>,
    user_text: &str,
    reply: &str,
    audio_format: &str,
    phase: &str,
) -> Vec<ServerFrame> {
    let mut frames = Vec::with_capacity(2);
    let audio = match synthesis {
        Ok(encoded) => Some(encoded),
        Err(err) => {
            frames.push(ServerFrame::Error {
                message: err.user_message(),
            });
            None
        }
    };
    frames.push(ServerFrame::Response {
        user_text: user_text.to_string(),
        interviewer_text: reply.to_string(),
        audio,
        audio_format: audio_format.to_string(),
        phase: phase.to_string(),
    });
    frames
}

/// Synthesize the reply and emit the `response` frame. A TTS failure
/// is surfaced as an error frame and the response degrades to
/// text-only; the conversation keeps going.
async fn send_turn_response(env: &TurnEnv, user_text: &str, reply: &str) {
    let synthesis = env
        .providers
        .tts
        .synthesize(reply)
        .await
        .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes));
    if let Err(err) = &synthesis {
        env.app_state.provider_failure();
        warn!(error = %err, "TTS synthesis failed, sending text-only response");
    }
    let phase = {
        let state = env.handle.state.lock().expect("state lock poisoned");
        state.phase().as_str().to_string()
    };
    for frame in turn_frames(
        synthesis,
        user_text,
        reply,
        env.providers.tts.audio_format(),
        &phase,
    ) {
        env.addr.do_send(SendFrame(frame));
    }
}

/// Terminal path: generate and deliver the assessment, persist the
/// result, release the session, and schedule the socket close. Safe to
/// reach from several triggers; only the first caller does the work.
async fn finish_session(env: &TurnEnv) {
    let (session_id, phase_before, transcript, history, context) = {
        let mut state = env.handle.state.lock().expect("state lock poisoned");
        let phase_before = state.phase();
        if !state.advance_phase(Phase::Completed) && phase_before == Phase::Completed {
            return;
        }
        let budget = TimeBudget::from_elapsed(state.elapsed_minutes(), state.budget_minutes);
        (
            state.session_id.clone(),
            phase_before,
            state.transcript().to_vec(),
            state.history_for_llm(),
            prompt_context(&state, &budget, None),
        )
    };

    let outcome = match assessment::run(
        env.providers.llm.as_ref(),
        phase_before,
        &transcript,
        &history,
        &context,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            env.app_state.provider_failure();
            error!(session_id = %session_id, error = %err, "Assessment generation failed");
            env.addr.do_send(SendFrame(ServerFrame::Error {
                message: err.user_message(),
            }));
            env.registry.remove(&session_id);
            env.app_state.session_ended(false);
            env.addr.do_send(ScheduleClose);
            return;
        }
    };
    env.app_state.assessment_generated();

    env.addr.do_send(SendFrame(ServerFrame::Assessment {
        text: outcome.text.clone(),
        scores: outcome.scores.clone(),
        recommendation: outcome.recommendation,
    }));

    if let Err(err) = env
        .collaborators
        .results
        .persist_result(&session_id, &transcript, &outcome)
        .await
    {
        error!(session_id = %session_id, error = %err, "Failed to persist interview result");
    }

    env.registry.remove(&session_id);
    env.app_state
        .session_ended(phase_before == Phase::Interview);
    info!(session_id = %session_id, "Interview session finished");
    env.addr.do_send(ScheduleClose);
}

fn report_provider_error(env: &TurnEnv, err: AppError) {
    env.app_state.provider_failure();
    warn!(error = %err, "Provider call failed during turn");
    env.addr.do_send(SendFrame(ServerFrame::Error {
        message: err.user_message(),
    }));
}

fn prompt_context(
    state: &ConversationState,
    budget: &TimeBudget,
    language_instruction: Option<String>,
) -> PromptContext {
    PromptContext {
        job_title: state.job_context.job_title.clone(),
        job_description: state.job_context.job_description.clone(),
        cv_text: state.job_context.cv_text.clone(),
        custom_questions: state.job_context.custom_questions.clone(),
        required_languages: state.required_languages.clone(),
        start_language: state.start_language.clone(),
        current_language: state.current_language.clone(),
        confirmed_name: state.confirmed_name().map(|s| s.to_string()),
        tested_languages: state.tested_languages().to_vec(),
        questions_in_current_language: state.questions_in_current_language,
        time_remaining_minutes: budget.remaining_minutes,
        total_minutes: budget.total_minutes,
        pacing_instruction: budget.pacing_instruction(),
        language_instruction,
        covered_topics: state.covered_topics().to_vec(),
    }
}

/// HTTP → WebSocket upgrade for `/ws`.
pub async fn interview_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    registry: web::Data<Arc<SessionRegistry>>,
    collaborators: web::Data<Collaborators>,
) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "New interview WebSocket connection"
    );

    let socket = InterviewSocket::new(
        app_state.get_ref().clone(),
        registry.get_ref().clone(),
        collaborators.get_ref().clone(),
    );
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CandidateRecord, Collaborators, MemoryStore};

    #[test]
    fn test_start_interview_frame_with_inline_context() {
        let json = r#"{
            "type": "start_interview",
            "job_context": {
                "job_title": "Platform Engineer",
                "required_languages": ["English", "French"],
                "start_language": "English"
            },
            "llm_provider": "gpt",
            "time_limit_minutes": 20
        }"#;

        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::StartInterview(request) => {
                let context = request.job_context.unwrap();
                assert_eq!(context.job_title, "Platform Engineer");
                assert_eq!(context.required_languages.len(), 2);
                assert_eq!(request.llm_provider.as_deref(), Some("gpt"));
                assert_eq!(request.time_limit_minutes, Some(20.0));
            }
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_audio_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type": "audio", "data": "AAAA"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Audio { .. }));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type": "audio_stream_start"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::AudioStreamStart));

        let frame: ClientFrame = serde_json::from_str(r#"{"type": "audio_commit"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::AudioCommit));
    }

    #[test]
    fn test_unknown_frame_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type": "launch_missiles"}"#).is_err());
    }

    #[test]
    fn test_response_frame_serialization() {
        let frame = ServerFrame::Response {
            user_text: "I led the migration.".to_string(),
            interviewer_text: "What was the hardest part?".to_string(),
            audio: None,
            audio_format: "mp3".to_string(),
            phase: "interview".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"response""#));
        assert!(json.contains(r#""phase":"interview""#));
    }

    #[test]
    fn test_session_config_defaults_and_overrides() {
        let config = AppConfig::default();
        let request = StartInterviewRequest {
            llm_provider: Some("gpt".to_string()),
            llm_model: Some("gpt-4o-mini".to_string()),
            ..Default::default()
        };

        let resolved = resolve_session_config(&config, &request);
        assert_eq!(resolved.llm_provider, "gpt");
        assert_eq!(resolved.llm_model, "gpt-4o-mini");
        // Unspecified fields come from the service defaults.
        assert_eq!(resolved.stt_provider, config.providers.stt_provider);
        assert_eq!(resolved.voice_id, config.providers.voice_id);
    }

    #[tokio::test]
    async fn test_resolve_job_context_merges_candidate_record() {
        let store = Arc::new(MemoryStore::default());
        store.insert_job(
            "job-7",
            JobContext {
                job_title: "Data Analyst".to_string(),
                required_languages: vec!["English".to_string()],
                start_language: "English".to_string(),
                ..Default::default()
            },
        );
        store.insert_candidate(
            "app-3",
            CandidateRecord {
                cv_text: "Five years of analytics.".to_string(),
                confirmed_name: Some("Priya Nair".to_string()),
            },
        );
        let collaborators = Collaborators {
            jobs: store.clone(),
            candidates: store.clone(),
            results: store,
        };

        let request = StartInterviewRequest {
            job_offer_id: Some("job-7".to_string()),
            application_id: Some("app-3".to_string()),
            ..Default::default()
        };
        let context = resolve_job_context(&collaborators, &request).await.unwrap();
        assert_eq!(context.job_title, "Data Analyst");
        assert_eq!(context.cv_text, "Five years of analytics.");
        assert_eq!(context.record_name.as_deref(), Some("Priya Nair"));
    }

    #[tokio::test]
    async fn test_resolve_job_context_requires_a_source() {
        let collaborators = Collaborators::in_memory();
        let result = resolve_job_context(&collaborators, &StartInterviewRequest::default()).await;
        assert!(matches!(
            result,
            Err(AppError::MalformedControlMessage(_))
        ));
    }

    #[test]
    fn test_custom_question_marked_covered_when_asked() {
        let context = JobContext {
            job_title: "SRE".to_string(),
            custom_questions: vec![
                "Describe a production incident you handled end to end.".to_string(),
                "How do you approach capacity planning?".to_string(),
            ],
            required_languages: vec!["English".to_string()],
            start_language: "English".to_string(),
            ..Default::default()
        };
        let mut state = crate::session::conversation::ConversationState::new(
            "s-1".to_string(),
            context,
            15.0,
        );

        note_covered_questions(
            &mut state,
            "Great. Now, describe a production incident you handled end to end, please.",
        );
        assert_eq!(state.covered_topics().len(), 1);
        assert!(state.covered_topics()[0].contains("production incident"));

        // Unrelated replies cover nothing further.
        note_covered_questions(&mut state, "Thanks, that is clear.");
        assert_eq!(state.covered_topics().len(), 1);
    }

    #[test]
    fn test_tts_quota_failure_surfaces_error_frame_before_response() {
        let remediation =
            "ElevenLabs quota exhausted. Add credits or switch tts_provider to Cartesia.";
        let frames = turn_frames(
            Err(AppError::QuotaExceeded(remediation.to_string())),
            "I led the migration.",
            "What was the hardest part?",
            "mp3",
            "interview",
        );

        assert_eq!(frames.len(), 2);
        match &frames[0] {
            ServerFrame::Error { message } => assert_eq!(message, remediation),
            other => panic!("expected error frame first, got {:?}", other),
        }
        // The conversation text still reaches the client, audio-less.
        match &frames[1] {
            ServerFrame::Response {
                audio,
                interviewer_text,
                ..
            } => {
                assert!(audio.is_none());
                assert_eq!(interviewer_text, "What was the hardest part?");
            }
            other => panic!("expected response frame, got {:?}", other),
        }
    }

    #[test]
    fn test_successful_synthesis_emits_only_the_response() {
        let frames = turn_frames(
            Ok("QUFBQQ==".to_string()),
            "Yes.",
            "Tell me more.",
            "mp3",
            "interview",
        );
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ServerFrame::Response { audio, .. } => {
                assert_eq!(audio.as_deref(), Some("QUFBQQ=="));
            }
            other => panic!("expected response frame, got {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_budget_forces_completion_without_a_model_turn() {
        let context = JobContext {
            job_title: "QA Engineer".to_string(),
            required_languages: vec!["English".to_string()],
            start_language: "English".to_string(),
            ..Default::default()
        };
        let mut state = ConversationState::new("s-9".to_string(), context, 5.0);
        state.advance_phase(Phase::NameCheck);
        state.advance_phase(Phase::Interview);
        state.set_elapsed_for_test(5.1);

        let plan = plan_transcript_turn(&mut state, "One more thing about my last role.");
        assert_eq!(plan, TurnPlan::TimeUp);

        // The fixed closing exchange is on the transcript and the
        // session moves straight to COMPLETED.
        let transcript = state.transcript();
        assert_eq!(transcript[transcript.len() - 2].text, "One more thing about my last role.");
        assert_eq!(transcript[transcript.len() - 1].text, TIME_UP_MESSAGE);
        assert!(state.advance_phase(Phase::Completed));

        // Anything arriving after completion is dropped untouched.
        let before = state.transcript().len();
        assert_eq!(plan_transcript_turn(&mut state, "Hello?"), TurnPlan::Ignore);
        assert_eq!(state.transcript().len(), before);
    }

    #[test]
    fn test_turn_within_budget_plans_an_interview_exchange() {
        let context = JobContext {
            job_title: "QA Engineer".to_string(),
            required_languages: vec!["English".to_string()],
            start_language: "English".to_string(),
            ..Default::default()
        };
        let mut state = ConversationState::new("s-10".to_string(), context, 5.0);
        state.advance_phase(Phase::NameCheck);
        state.advance_phase(Phase::Interview);
        state.set_elapsed_for_test(4.0);

        assert_eq!(
            plan_transcript_turn(&mut state, "I test payment flows."),
            TurnPlan::Interview
        );
    }

    #[test]
    fn test_language_code_mapping() {
        assert_eq!(language_code("French"), "fr");
        assert_eq!(language_code("ARABIC"), "ar");
        assert_eq!(language_code("Klingon"), "en");
    }
}
