//! # Audio Conversion
//!
//! Browsers deliver microphone audio as WebM/Opus; the realtime STT
//! backend only accepts raw 16 kHz mono s16le PCM. Conversion shells
//! out to `ffmpeg`. A missing `ffmpeg` binary is a fatal
//! [`AppError::AudioConversionUnavailable`] that the caller must
//! surface; silently sending unconverted bytes would fail upstream
//! anyway, with a far worse error.

use crate::error::{AppError, AppResult};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

pub const PCM_SAMPLE_RATE: u32 = 16_000;

/// Leading bytes of an EBML container (WebM/Matroska).
const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

const FFMPEG_MISSING_MESSAGE: &str =
    "Audio conversion failed. Please install ffmpeg to use streaming speech-to-text.";

/// Does this payload need container decoding before it can be sent as
/// raw PCM?
pub fn is_webm(audio: &[u8]) -> bool {
    audio.len() >= EBML_MAGIC.len() && audio[..EBML_MAGIC.len()] == EBML_MAGIC
}

/// Convert a WebM blob to 16 kHz mono s16le PCM. Payloads that are
/// not WebM are assumed to already be raw PCM and pass through.
pub async fn webm_to_pcm(audio: &[u8]) -> AppResult<Vec<u8>> {
    if !is_webm(audio) {
        return Ok(audio.to_vec());
    }

    let mut child = Command::new("ffmpeg")
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "pipe:0",
            "-f",
            "s16le",
            "-acodec",
            "pcm_s16le",
            "-ac",
            "1",
            "-ar",
            &PCM_SAMPLE_RATE.to_string(),
            "pipe:1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AppError::AudioConversionUnavailable(FFMPEG_MISSING_MESSAGE.to_string())
            } else {
                AppError::Internal(format!("Failed to spawn ffmpeg: {}", err))
            }
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Internal("ffmpeg stdin unavailable".to_string()))?;
    let input = audio.to_vec();
    let writer = tokio::spawn(async move {
        let _ = stdin.write_all(&input).await;
        // Dropping stdin closes the pipe so ffmpeg can finish.
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(|err| AppError::Internal(format!("ffmpeg wait failed: {}", err)))?;
    let _ = writer.await;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::AudioConversionUnavailable(format!(
            "WebM to PCM conversion failed: {}",
            stderr.trim()
        )));
    }

    debug!(
        webm_bytes = audio.len(),
        pcm_bytes = output.stdout.len(),
        "Converted WebM to PCM"
    );
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webm_magic_detection() {
        assert!(is_webm(&[0x1A, 0x45, 0xDF, 0xA3, 0x00, 0x01]));
        assert!(!is_webm(&[0x00, 0x01, 0x02, 0x03]));
        assert!(!is_webm(&[0x1A, 0x45]));
    }

    #[tokio::test]
    async fn test_raw_pcm_passes_through() {
        let pcm = vec![0u8; 320];
        let out = webm_to_pcm(&pcm).await.unwrap();
        assert_eq!(out, pcm);
    }
}
