//! FFmpeg-backed media worker.
//!
//! Shells out to the `ffmpeg` binary in a scratch directory per request,
//! streams stderr lines back as log events, and derives progress ratios from
//! the `Duration:` / `time=` markers in FFmpeg's status output.

use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::protocol::{EngineAction, EngineRequest, RequestPayload, ResponsePayload};
use super::{EventSink, MediaWorker, WorkerError};
use crate::config::{EncodeConfig, EngineConfig};
use crate::probe::analyze_diagnostics;

/// Media worker that drives a real FFmpeg binary.
pub struct FfmpegWorker {
    engine: EngineConfig,
    encode: EncodeConfig,
}

impl FfmpegWorker {
    /// Creates a worker with the given engine and default encode settings.
    pub fn new(engine: EngineConfig, encode: EncodeConfig) -> Self {
        Self { engine, encode }
    }

    /// Checks whether the configured FFmpeg binary responds to `-version`.
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.engine.ffmpeg_path)
            .arg("-version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn probe(&self, payload: RequestPayload) -> Result<ResponsePayload, WorkerError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join(format!("{}.bin", payload.name));
        tokio::fs::write(&input, &payload.buffer).await?;

        // A bare `-i` run exits non-zero by design; the diagnostics on
        // stderr are the product.
        let output = Command::new(&self.engine.ffmpeg_path)
            .arg("-hide_banner")
            .arg("-i")
            .arg(&input)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| WorkerError::Ffmpeg {
                operation: "probe".to_string(),
                reason: format!("failed to execute ffmpeg: {e}"),
            })?;

        let diagnostics = String::from_utf8_lossy(&output.stderr);
        Ok(ResponsePayload::Probe(analyze_diagnostics(&diagnostics)))
    }

    async fn transcode(
        &self,
        payload: RequestPayload,
        events: &EventSink,
    ) -> Result<ResponsePayload, WorkerError> {
        let crf = payload.crf.clone().unwrap_or_else(|| self.encode.crf.clone());
        let preset = payload
            .preset
            .clone()
            .unwrap_or_else(|| self.encode.preset.clone());
        let audio_bitrate = payload
            .audio_bitrate
            .clone()
            .unwrap_or_else(|| self.encode.audio_bitrate.clone());

        let mut args: Vec<String> = vec![
            "-map".into(),
            "0:v:0".into(),
            "-c:v".into(),
            "libx264".into(),
            "-crf".into(),
            crf,
            "-preset".into(),
            preset,
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-movflags".into(),
            "+faststart".into(),
        ];
        if payload.has_audio == Some(false) {
            args.push("-an".into());
        } else {
            args.extend([
                "-map".into(),
                "0:a:0?".into(),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                audio_bitrate,
            ]);
        }

        self.run_media_job(
            "transcode",
            payload,
            args,
            self.engine.transcode_progress_cap,
            events,
        )
        .await
    }

    async fn remux(
        &self,
        payload: RequestPayload,
        events: &EventSink,
    ) -> Result<ResponsePayload, WorkerError> {
        let mut args: Vec<String> = vec!["-map".into(), "0:v:0".into(), "-c:v".into(), "copy".into()];
        if payload.has_audio == Some(false) {
            args.push("-an".into());
        } else {
            args.extend([
                "-map".into(),
                "0:a:0?".into(),
                "-c:a".into(),
                "copy".into(),
            ]);
        }
        args.extend(["-movflags".into(), "+faststart".into(), "-f".into(), "mp4".into()]);

        self.run_media_job("remux", payload, args, self.engine.remux_progress_cap, events)
            .await
    }

    /// Writes the input to scratch, runs FFmpeg with the given output args,
    /// and reads back `payload.mp4`.
    async fn run_media_job(
        &self,
        operation: &str,
        payload: RequestPayload,
        output_args: Vec<String>,
        progress_cap: f64,
        events: &EventSink,
    ) -> Result<ResponsePayload, WorkerError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join(format!("{}.src", payload.name));
        let output = scratch.path().join("payload.mp4");
        tokio::fs::write(&input, &payload.buffer).await?;

        let mut cmd = Command::new(&self.engine.ffmpeg_path);
        cmd.arg("-y").arg("-i").arg(&input);
        cmd.args(&output_args);
        cmd.arg(&output);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        tracing::debug!("executing FFmpeg {}: {:?}", operation, cmd);

        let mut child = cmd.spawn().map_err(|e| WorkerError::Ffmpeg {
            operation: operation.to_string(),
            reason: format!("failed to execute ffmpeg: {e}"),
        })?;

        let stderr = child.stderr.take().ok_or_else(|| WorkerError::Ffmpeg {
            operation: operation.to_string(),
            reason: "ffmpeg stderr unavailable".to_string(),
        })?;
        let collected = pump_status_lines(stderr, progress_cap, events).await?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(WorkerError::Ffmpeg {
                operation: operation.to_string(),
                reason: format!("exit status {status}: {}", tail_lines(&collected, 12)),
            });
        }

        let bytes = tokio::fs::read(&output).await.map_err(|e| WorkerError::Ffmpeg {
            operation: operation.to_string(),
            reason: format!("output missing: {e}"),
        })?;
        Ok(ResponsePayload::Media(Bytes::from(bytes)))
    }
}

#[async_trait]
impl MediaWorker for FfmpegWorker {
    async fn handle(
        &mut self,
        request: EngineRequest,
        events: &EventSink,
    ) -> Result<ResponsePayload, WorkerError> {
        match request.action {
            EngineAction::Probe => self.probe(request.payload).await,
            EngineAction::Transcode => self.transcode(request.payload, events).await,
            EngineAction::Remux => self.remux(request.payload, events).await,
        }
    }
}

/// Reads FFmpeg's stderr, forwarding each line as a log event and deriving
/// capped progress ratios. FFmpeg terminates status updates with carriage
/// returns, so both `\r` and `\n` end a line.
async fn pump_status_lines(
    mut stderr: tokio::process::ChildStderr,
    progress_cap: f64,
    events: &EventSink,
) -> Result<String, WorkerError> {
    let mut collected = String::new();
    let mut line = String::new();
    let mut duration: Option<f64> = None;
    let mut buf = [0u8; 4096];

    loop {
        let read = stderr.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        for ch in String::from_utf8_lossy(&buf[..read]).chars() {
            if ch == '\n' || ch == '\r' {
                if !line.is_empty() {
                    observe_line(&line, &mut duration, progress_cap, events);
                    collected.push_str(&line);
                    collected.push('\n');
                    line.clear();
                }
            } else {
                line.push(ch);
            }
        }
    }
    if !line.is_empty() {
        observe_line(&line, &mut duration, progress_cap, events);
        collected.push_str(&line);
    }
    Ok(collected)
}

fn observe_line(line: &str, duration: &mut Option<f64>, progress_cap: f64, events: &EventSink) {
    events.log(line.to_string());

    if duration.is_none() {
        *duration = extract_marker_timestamp(line, "Duration: ");
    }
    if let (Some(total), Some(elapsed)) = (*duration, extract_marker_timestamp(line, "time=")) {
        if total > 0.0 {
            events.progress((elapsed / total).min(progress_cap));
        }
    }
}

/// Extracts an `HH:MM:SS.cc` timestamp following the given marker.
fn extract_marker_timestamp(line: &str, marker: &str) -> Option<f64> {
    let idx = line.find(marker)?;
    let rest = &line[idx + marker.len()..];
    let token: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ':' || *c == '.')
        .collect();
    parse_timestamp(&token)
}

/// Returns the last `n` lines of `text` joined by newlines.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00:10.00"), Some(10.0));
        assert_eq!(parse_timestamp("01:02:03.50"), Some(3723.5));
        assert_eq!(parse_timestamp("garbage"), None);
        assert_eq!(parse_timestamp("10.0"), None);
    }

    #[test]
    fn test_extract_duration_marker() {
        let line = "  Duration: 00:01:30.00, start: 0.000000, bitrate: 1000 kb/s";
        assert_eq!(extract_marker_timestamp(line, "Duration: "), Some(90.0));
    }

    #[test]
    fn test_extract_time_marker() {
        let line = "frame=  100 fps= 25 q=28.0 size=     512kB time=00:00:45.00 bitrate= 93.2kbits/s";
        assert_eq!(extract_marker_timestamp(line, "time="), Some(45.0));
        assert_eq!(extract_marker_timestamp("no markers here", "time="), None);
    }
}
