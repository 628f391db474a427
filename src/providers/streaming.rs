//! # Streaming STT Session
//!
//! Secondary WebSocket to the ElevenLabs realtime transcription
//! backend. One of these exists per active candidate utterance when
//! the session selected the streaming STT provider:
//!
//! ## Lifecycle
//! 1. `connect` opens the socket and starts a background receive loop
//!    that drains transcript frames into an accumulator.
//! 2. `send_chunk` converts each inbound blob to raw PCM (fatal if the
//!    codec tool is unavailable) and forwards it base64-encoded.
//! 3. `commit` signals end-of-utterance with an empty committing chunk.
//! 4. `wait_for_transcript` polls the accumulator (200 ms interval,
//!    5 s ceiling); an empty result on timeout is a soft
//!    "no speech detected" error, not a crash.
//! 5. `close` cancels the receive loop and drops the socket.

use crate::audio;
use crate::error::{AppError, AppResult};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

const REALTIME_WS_URL: &str = "wss://api.elevenlabs.io/v1/speech-to-text/realtime";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const POLL_CEILING: Duration = Duration::from_secs(5);

pub struct StreamingSttSession {
    outbound: mpsc::Sender<Message>,
    transcript: Arc<Mutex<String>>,
    receive_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl StreamingSttSession {
    /// Connect to the production realtime endpoint.
    pub async fn connect(
        api_key: &str,
        model_id: &str,
        language_code: &str,
    ) -> AppResult<Self> {
        let mut url = Url::parse(REALTIME_WS_URL)
            .map_err(|e| AppError::Internal(format!("realtime URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("model_id", model_id)
            .append_pair("language_code", language_code);
        Self::connect_to(url, api_key).await
    }

    /// Connect to an explicit endpoint. Split out so tests can point a
    /// session at a loopback server.
    pub async fn connect_to(url: Url, api_key: &str) -> AppResult<Self> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| AppError::Internal(format!("realtime request: {}", e)))?;
        request.headers_mut().insert(
            "xi-api-key",
            api_key
                .parse()
                .map_err(|_| AppError::ConfigError("API key is not a valid header".to_string()))?,
        );

        info!(url = %url, "Streaming STT: connecting");
        let (socket, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    AppError::TransientNetwork("Streaming STT connect timed out".to_string())
                })?
                .map_err(|e| AppError::TransientNetwork(format!("Streaming STT connect: {}", e)))?;

        let (mut sink, mut stream) = socket.split();
        let transcript = Arc::new(Mutex::new(String::new()));

        // Writer task: serializes all outbound frames so senders never
        // hold the sink across an await point.
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(64);
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        // Receive loop: accumulate committed transcript text until the
        // backend ends the session or the socket closes.
        let accumulator = transcript.clone();
        let receive_task = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "Streaming STT: read failed");
                        break;
                    }
                };

                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let message_type = value
                    .get("message_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");

                match message_type {
                    "committed_transcript" | "committed_transcript_with_timestamps" => {
                        let segment = value.get("text").and_then(|v| v.as_str()).unwrap_or("");
                        if !segment.trim().is_empty() {
                            let mut acc = accumulator.lock().expect("transcript lock poisoned");
                            if !acc.is_empty() {
                                acc.push(' ');
                            }
                            acc.push_str(segment.trim());
                            debug!(transcript = %acc.as_str(), "Streaming STT: committed");
                        }
                    }
                    "partial_transcript" | "interim_transcript" => {
                        // Partial text is informational only; the final
                        // transcript comes from committed frames.
                    }
                    "session_started" | "session_ready" => {
                        debug!("Streaming STT: session ready");
                    }
                    "session_ended" => break,
                    "error" => {
                        let message = value
                            .get("error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown error");
                        warn!(error = %message, "Streaming STT: backend error");
                    }
                    other => {
                        debug!(message_type = %other, "Streaming STT: ignoring frame");
                    }
                }
            }
        });

        Ok(Self {
            outbound,
            transcript,
            receive_task,
            writer_task,
        })
    }

    /// Forward one audio chunk. WebM input is converted to raw PCM
    /// first; conversion failure is fatal for this streaming session
    /// and must reach the caller.
    pub async fn send_chunk(&self, audio_blob: &[u8]) -> AppResult<()> {
        let pcm = audio::webm_to_pcm(audio_blob).await?;
        self.send_frame(&pcm, false).await
    }

    /// Signal end-of-utterance. The backend only accepts the commit
    /// flag on an audio chunk, so this sends an empty committing one.
    pub async fn commit(&self) -> AppResult<()> {
        self.send_frame(&[], true).await
    }

    async fn send_frame(&self, pcm: &[u8], commit: bool) -> AppResult<()> {
        let payload = serde_json::json!({
            "message_type": "input_audio_chunk",
            "audio_base_64": base64::engine::general_purpose::STANDARD.encode(pcm),
            "commit": commit,
            "sample_rate": audio::PCM_SAMPLE_RATE,
        });
        self.outbound
            .send(Message::Text(payload.to_string()))
            .await
            .map_err(|_| AppError::TransientNetwork("Streaming STT socket closed".to_string()))
    }

    /// Accumulated committed transcript so far.
    pub fn transcript(&self) -> String {
        self.transcript
            .lock()
            .expect("transcript lock poisoned")
            .clone()
    }

    /// Bounded wait for a non-empty transcript after a commit.
    pub async fn wait_for_transcript(&self) -> AppResult<String> {
        let deadline = tokio::time::Instant::now() + POLL_CEILING;
        loop {
            let text = self.transcript();
            if !text.trim().is_empty() {
                return Ok(text);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::EmptyTranscription(
                    "No transcript received before the commit timeout".to_string(),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Tear the session down. Idempotent in effect: subsequent sends
    /// fail softly once the channel is closed.
    pub fn close(&self) {
        self.receive_task.abort();
        self.writer_task.abort();
        info!("Streaming STT: closed");
    }
}

impl Drop for StreamingSttSession {
    fn drop(&mut self) {
        self.receive_task.abort();
        self.writer_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Loopback realtime backend: answers committing chunks with a
    /// committed transcript frame.
    async fn spawn_backend(reply_text: Option<&'static str>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let _ = ws
                .send(Message::Text(
                    r#"{"message_type":"session_started","session_id":"s"}"#.into(),
                ))
                .await;

            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(txt) = msg {
                    if txt.contains("\"commit\":true") {
                        if let Some(text) = reply_text {
                            let frame = format!(
                                r#"{{"message_type":"committed_transcript","text":"{}"}}"#,
                                text
                            );
                            let _ = ws.send(Message::Text(frame)).await;
                        }
                        break;
                    }
                }
            }
            // Hold the socket open while the client polls.
            let _ = ws.next().await;
        });

        Url::parse(&format!("ws://{}/v1/speech-to-text/realtime", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_commit_yields_transcript() {
        let url = spawn_backend(Some("hello there")).await;
        let session = StreamingSttSession::connect_to(url, "key").await.unwrap();

        session.send_chunk(&vec![0u8; 640]).await.unwrap();
        session.commit().await.unwrap();

        let transcript = session.wait_for_transcript().await.unwrap();
        assert_eq!(transcript, "hello there");
        session.close();
    }

    #[tokio::test]
    async fn test_commit_timeout_is_soft_error() {
        let url = spawn_backend(None).await;
        let session = StreamingSttSession::connect_to(url, "key").await.unwrap();

        session.commit().await.unwrap();

        let result = session.wait_for_transcript().await;
        assert!(matches!(result, Err(AppError::EmptyTranscription(_))));
        session.close();
    }

    #[tokio::test]
    async fn test_committed_segments_accumulate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws
                .send(Message::Text(
                    r#"{"message_type":"committed_transcript","text":"first"}"#.into(),
                ))
                .await;
            let _ = ws
                .send(Message::Text(
                    r#"{"message_type":"committed_transcript","text":" second "}"#.into(),
                ))
                .await;
            let _ = ws.next().await;
        });

        let url = Url::parse(&format!("ws://{}/", addr)).unwrap();
        let session = StreamingSttSession::connect_to(url, "key").await.unwrap();

        let joined = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let text = session.transcript();
                if text == "first second" {
                    return text;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(joined, "first second");
        session.close();
    }

    #[tokio::test]
    async fn test_connect_failure_is_transient() {
        // Nothing is listening on this port.
        let url = Url::parse("ws://127.0.0.1:1/realtime").unwrap();
        let result = StreamingSttSession::connect_to(url, "key").await;
        assert!(matches!(result, Err(AppError::TransientNetwork(_))));
    }
}
