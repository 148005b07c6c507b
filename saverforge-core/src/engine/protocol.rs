//! Message shapes for the worker RPC protocol.
//!
//! Every logical call into the media worker is a tagged request carrying a
//! bridge-assigned id; the worker answers with a correlated result or error
//! message. Progress and log messages are out-of-band and carry no id.

use bytes::Bytes;

use crate::probe::ProbeReport;

/// Logical operations the media worker supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    /// Diagnostic-only inspection; no output media produced.
    Probe,
    /// Re-encode to H.264/AAC in an MP4 container.
    Transcode,
    /// Stream-copy into an MP4 container without re-encoding.
    Remux,
}

impl std::fmt::Display for EngineAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineAction::Probe => write!(f, "probe"),
            EngineAction::Transcode => write!(f, "transcode"),
            EngineAction::Remux => write!(f, "remux"),
        }
    }
}

/// A single request sent to the worker.
///
/// The payload buffer's ownership transfers to the worker; callers that need
/// to retain the bytes must pass their own copy.
#[derive(Debug)]
pub struct EngineRequest {
    /// Monotonic id, unique per bridge instance, never reused.
    pub id: u64,
    pub action: EngineAction,
    pub payload: RequestPayload,
}

/// Request payload: input bytes plus optional per-call encode overrides.
#[derive(Debug, Default)]
pub struct RequestPayload {
    pub buffer: Bytes,
    /// Working name for the worker's scratch files.
    pub name: String,
    /// `Some(false)` only when the probe established no audio track exists;
    /// `None` lets the worker auto-detect.
    pub has_audio: Option<bool>,
    pub crf: Option<String>,
    pub preset: Option<String>,
    pub audio_bitrate: Option<String>,
}

/// Successful response payload for a request.
#[derive(Debug)]
pub enum ResponsePayload {
    /// Classification derived from diagnostic output (probe).
    Probe(ProbeReport),
    /// Output media bytes; ownership transfers back to the caller
    /// (transcode / remux).
    Media(Bytes),
}

/// Messages flowing from the worker back to the bridge.
#[derive(Debug)]
pub enum EngineMessage {
    /// Resolves the pending job with the given id.
    Result { id: u64, payload: ResponsePayload },
    /// Rejects the pending job with the given id.
    Error { id: u64, message: String },
    /// Out-of-band progress ratio; the receiver clamps to [0, 1].
    Progress { ratio: f64 },
    /// Out-of-band log line from the worker.
    Log { message: String },
    /// The worker context is terminating abnormally. Every pending job must
    /// be rejected and the bridge becomes unusable.
    Fatal { reason: String },
}
