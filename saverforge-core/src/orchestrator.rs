//! Transcode orchestration: picks one media-engine operation per build.
//!
//! Given the selected mode and an optional probe report, exactly one of
//! {transcode, remux} is invoked, with a single silent-audio retry for
//! transcodes that fail on stream mapping when audio presence is unknown.
//! Every decision and fallback is recorded as an ordered trace message on
//! the resulting plan.

use std::str::FromStr;

use bytes::Bytes;
use regex::Regex;

use crate::engine::{EngineBridge, EngineError, TranscodeOptions};
use crate::probe::ProbeReport;
use crate::progress::ProgressTracker;

/// How the build decides between transcoding and stream copying.
///
/// Selected once per build, immutable during it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Probe the input and pick the cheapest safe operation.
    #[default]
    Auto,
    /// Always transcode, regardless of probe results.
    Force,
    /// Prefer stream copying; transcode only when copying is unsafe.
    Passthrough,
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "auto" => Ok(BuildMode::Auto),
            "force" => Ok(BuildMode::Force),
            "passthrough" => Ok(BuildMode::Passthrough),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildMode::Auto => write!(f, "auto"),
            BuildMode::Force => write!(f, "force"),
            BuildMode::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// Outcome of orchestration: the final payload bytes plus the trace of
/// decisions taken, in order. Consumed once to populate the bundle.
#[derive(Debug)]
pub struct TranscodePlan {
    pub bytes: Bytes,
    /// Human-readable summary of the chosen operation.
    pub description: String,
    /// Ordered trace messages for every decision and fallback.
    pub messages: Vec<String>,
}

/// Decides and runs the single engine operation for this build.
///
/// The source buffer is cloned per engine call; the orchestrator retains the
/// original so the silent-audio retry can resend it.
///
/// # Errors
/// - `EngineError::Job` - transcode failed beyond the one permitted retry,
///   or remux failed (remux is never retried)
/// - `EngineError::WorkerCrashed` - worker unavailable
pub async fn prepare_video(
    bridge: &EngineBridge,
    source: &Bytes,
    mode: BuildMode,
    probe: Option<&ProbeReport>,
    progress: &ProgressTracker,
) -> Result<TranscodePlan, EngineError> {
    let known_audio = probe.map(|report| report.has_audio);
    let mut messages = Vec::new();
    tracing::debug!(
        "orchestrating mode={} audio_known={:?}",
        mode,
        known_audio
    );

    let outcome = match mode {
        BuildMode::Force => {
            run_transcode(
                bridge,
                source,
                known_audio,
                "Force mode engaged: transcoding to H.264/AAC.",
                &mut messages,
                progress,
            )
            .await
        }
        BuildMode::Passthrough => match probe {
            None => {
                run_transcode(
                    bridge,
                    source,
                    known_audio,
                    "Passthrough requested but probe unavailable; transcoding for safety.",
                    &mut messages,
                    progress,
                )
                .await
            }
            Some(report) if report.copy_safe && report.container_ok => {
                run_remux(
                    bridge,
                    source,
                    known_audio,
                    "Passthrough: refreshing MP4 container without re-encoding.",
                    &mut messages,
                    progress,
                )
                .await
            }
            Some(report) if report.copy_safe => {
                run_remux(
                    bridge,
                    source,
                    known_audio,
                    "Passthrough: codecs compatible; rewrapping streams into MP4.",
                    &mut messages,
                    progress,
                )
                .await
            }
            Some(_) => {
                run_transcode(
                    bridge,
                    source,
                    known_audio,
                    "Passthrough requested but codecs/container incompatible. Transcoding instead.",
                    &mut messages,
                    progress,
                )
                .await
            }
        },
        BuildMode::Auto => match probe {
            None => {
                run_transcode(
                    bridge,
                    source,
                    known_audio,
                    "Auto mode: probe failed, falling back to transcoding.",
                    &mut messages,
                    progress,
                )
                .await
            }
            Some(report) if report.is_compatible => {
                run_remux(
                    bridge,
                    source,
                    known_audio,
                    "Auto mode: already H.264/AAC MP4; remuxing for faststart.",
                    &mut messages,
                    progress,
                )
                .await
            }
            Some(report) if report.copy_safe => {
                run_remux(
                    bridge,
                    source,
                    known_audio,
                    "Auto mode: codecs compatible but container mismatch; remuxing.",
                    &mut messages,
                    progress,
                )
                .await
            }
            Some(_) => {
                run_transcode(
                    bridge,
                    source,
                    known_audio,
                    "Auto mode: codecs incompatible; transcoding to H.264/AAC.",
                    &mut messages,
                    progress,
                )
                .await
            }
        },
    };

    let (bytes, description) = outcome?;
    Ok(TranscodePlan {
        bytes,
        description,
        messages,
    })
}

/// Transcodes the source, retrying exactly once with audio disabled when the
/// failure looks like a stream-mapping/audio problem and audio presence was
/// not already known to be false.
async fn run_transcode(
    bridge: &EngineBridge,
    source: &Bytes,
    known_audio: Option<bool>,
    reason: &str,
    messages: &mut Vec<String>,
    progress: &ProgressTracker,
) -> Result<(Bytes, String), EngineError> {
    messages.push(reason.to_string());
    let audio_hint = audio_hint(known_audio);

    progress.start_worker(0.33, 0.5);
    let result = transcode_with_fallback(bridge, source, known_audio, audio_hint, messages).await;
    progress.stop_worker(Some(0.82));
    result
}

async fn transcode_with_fallback(
    bridge: &EngineBridge,
    source: &Bytes,
    known_audio: Option<bool>,
    audio_hint: Option<bool>,
    messages: &mut Vec<String>,
) -> Result<(Bytes, String), EngineError> {
    let options = TranscodeOptions {
        has_audio: audio_hint,
        ..Default::default()
    };
    match bridge.transcode(source.clone(), options).await {
        Ok(bytes) => {
            let description = if known_audio == Some(false) {
                "transcoded (video only)"
            } else {
                "transcoded to H.264/AAC"
            };
            Ok((bytes, description.to_string()))
        }
        Err(err) => {
            let retriable = known_audio != Some(false) && is_audio_mapping_error(&err.to_string());
            if !retriable {
                return Err(err);
            }
            messages.push("Audio track missing; retrying transcode without audio.".to_string());
            let options = TranscodeOptions {
                has_audio: Some(false),
                ..Default::default()
            };
            let bytes = bridge.transcode(source.clone(), options).await?;
            Ok((bytes, "transcoded to H.264 (silent)".to_string()))
        }
    }
}

/// Remuxes the source. Remux failures propagate directly; no retries.
async fn run_remux(
    bridge: &EngineBridge,
    source: &Bytes,
    known_audio: Option<bool>,
    reason: &str,
    messages: &mut Vec<String>,
    progress: &ProgressTracker,
) -> Result<(Bytes, String), EngineError> {
    messages.push(reason.to_string());

    progress.start_worker(0.33, 0.35);
    let result = bridge.remux(source.clone(), audio_hint(known_audio)).await;
    progress.stop_worker(Some(0.7));

    let bytes = result?;
    Ok((bytes, "stream-copied MP4 container".to_string()))
}

/// `Some(false)` only when the probe established no audio track; otherwise
/// the engine auto-detects.
fn audio_hint(known_audio: Option<bool>) -> Option<bool> {
    (known_audio == Some(false)).then_some(false)
}

/// Best-effort match for FFmpeg stream-mapping/audio-specification failures.
/// Deliberately narrow; do not widen without a concrete failing fixture.
fn is_audio_mapping_error(message: &str) -> bool {
    Regex::new(r"(?i)match.*streams|specifie")
        .map(|re| re.is_match(message))
        .unwrap_or(false)
}
