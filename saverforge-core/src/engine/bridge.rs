//! Request/response bridge over the media engine worker.
//!
//! The bridge assigns each request a strictly increasing id, parks a oneshot
//! completion handle in a private pending-jobs map, and lets a router task
//! dispatch worker messages back by id. A fatal worker failure rejects every
//! pending job exactly once and latches the bridge into a failed state where
//! all further calls fail immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{EngineAction, EngineMessage, EngineRequest, RequestPayload, ResponsePayload};
use crate::probe::ProbeReport;

/// Errors surfaced by the engine bridge.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The worker rejected this specific job. The message carries FFmpeg's
    /// own diagnostics verbatim.
    #[error("{message}")]
    Job { message: String },

    /// The worker context terminated abnormally or the channel broke.
    /// Affects every in-flight job and all subsequent calls.
    #[error("FFmpeg worker crashed: {reason}")]
    WorkerCrashed { reason: String },

    /// The worker answered with a payload of the wrong kind.
    #[error("unexpected payload in {action} response")]
    UnexpectedPayload { action: EngineAction },
}

/// Per-call overrides for transcode requests.
#[derive(Debug, Default, Clone)]
pub struct TranscodeOptions {
    /// `Some(false)` only when the probe established no audio track exists.
    pub has_audio: Option<bool>,
    pub crf: Option<String>,
    pub preset: Option<String>,
    pub audio_bitrate: Option<String>,
}

type JobResult = Result<ResponsePayload, EngineError>;

/// Pending jobs plus the latched failure state, mutated only by the bridge
/// and its router task.
struct PendingJobs {
    jobs: HashMap<u64, oneshot::Sender<JobResult>>,
    failure: Option<String>,
}

/// Out-of-band streams from the worker, not correlated to any request.
pub struct EngineEvents {
    /// Raw progress ratios; receivers must clamp to [0, 1].
    pub progress: mpsc::UnboundedReceiver<f64>,
    /// Log lines emitted by the worker.
    pub logs: mpsc::UnboundedReceiver<String>,
}

/// Handle for issuing probe/transcode/remux calls to the engine worker.
///
/// Cheap to clone; all clones share one worker and one id space.
#[derive(Clone)]
pub struct EngineBridge {
    requests: mpsc::UnboundedSender<EngineRequest>,
    pending: Arc<Mutex<PendingJobs>>,
    next_id: Arc<AtomicU64>,
}

/// Wires a bridge to an already-spawned worker and starts the router task.
pub(super) fn connect(
    requests: mpsc::UnboundedSender<EngineRequest>,
    messages: mpsc::UnboundedReceiver<EngineMessage>,
) -> (EngineBridge, EngineEvents) {
    let pending = Arc::new(Mutex::new(PendingJobs {
        jobs: HashMap::new(),
        failure: None,
    }));
    let (progress_sender, progress_receiver) = mpsc::unbounded_channel();
    let (log_sender, log_receiver) = mpsc::unbounded_channel();

    tokio::spawn(run_router_loop(
        messages,
        Arc::clone(&pending),
        progress_sender,
        log_sender,
    ));

    let bridge = EngineBridge {
        requests,
        pending,
        next_id: Arc::new(AtomicU64::new(0)),
    };
    let events = EngineEvents {
        progress: progress_receiver,
        logs: log_receiver,
    };
    (bridge, events)
}

/// Dispatches worker messages: correlated responses to their pending jobs,
/// progress/log to their own streams, fatal failures to every pending job.
async fn run_router_loop(
    mut messages: mpsc::UnboundedReceiver<EngineMessage>,
    pending: Arc<Mutex<PendingJobs>>,
    progress: mpsc::UnboundedSender<f64>,
    logs: mpsc::UnboundedSender<String>,
) {
    while let Some(message) = messages.recv().await {
        match message {
            EngineMessage::Progress { ratio } => {
                let _ = progress.send(ratio);
            }
            EngineMessage::Log { message } => {
                let _ = logs.send(message);
            }
            EngineMessage::Result { id, payload } => {
                complete(&pending, id, Ok(payload));
            }
            EngineMessage::Error { id, message } => {
                complete(&pending, id, Err(EngineError::Job { message }));
            }
            EngineMessage::Fatal { reason } => {
                fail_all(&pending, &reason);
                return;
            }
        }
    }

    // Channel closed without a fatal message: the worker task is gone.
    fail_all(&pending, "FFmpeg worker crashed.");
}

fn complete(pending: &Mutex<PendingJobs>, id: u64, result: JobResult) {
    let responder = match pending.lock() {
        Ok(mut state) => state.jobs.remove(&id),
        Err(_) => None,
    };
    match responder {
        Some(responder) => {
            let _ = responder.send(result);
        }
        None => tracing::warn!("engine response for unknown job id {}", id),
    }
}

/// Rejects every pending job exactly once and latches the failure so later
/// calls fail immediately instead of hanging.
fn fail_all(pending: &Mutex<PendingJobs>, reason: &str) {
    let Ok(mut state) = pending.lock() else {
        return;
    };
    if state.failure.is_none() {
        state.failure = Some(reason.to_string());
    }
    if state.jobs.is_empty() {
        return;
    }
    tracing::error!("rejecting {} pending engine jobs: {}", state.jobs.len(), reason);
    for (_, responder) in state.jobs.drain() {
        let _ = responder.send(Err(EngineError::WorkerCrashed {
            reason: reason.to_string(),
        }));
    }
}

impl EngineBridge {
    /// Probes the input and returns its compatibility classification.
    ///
    /// The buffer's ownership transfers to the worker; pass a copy when the
    /// original bytes are still needed.
    ///
    /// # Errors
    /// - `EngineError::Job` - FFmpeg probe invocation failed
    /// - `EngineError::WorkerCrashed` - worker unavailable
    pub async fn probe(&self, buffer: Bytes, name: impl Into<String>) -> Result<ProbeReport, EngineError> {
        let payload = RequestPayload {
            buffer,
            name: name.into(),
            ..Default::default()
        };
        match self.call(EngineAction::Probe, payload).await? {
            ResponsePayload::Probe(report) => Ok(report),
            ResponsePayload::Media(_) => Err(EngineError::UnexpectedPayload {
                action: EngineAction::Probe,
            }),
        }
    }

    /// Re-encodes the input to H.264/AAC MP4 and returns the output bytes.
    ///
    /// # Errors
    /// - `EngineError::Job` - FFmpeg transcode failed; the message carries
    ///   FFmpeg's diagnostics for the caller's retry heuristics
    /// - `EngineError::WorkerCrashed` - worker unavailable
    pub async fn transcode(
        &self,
        buffer: Bytes,
        options: TranscodeOptions,
    ) -> Result<Bytes, EngineError> {
        let payload = RequestPayload {
            buffer,
            name: scratch_name("transcode"),
            has_audio: options.has_audio,
            crf: options.crf,
            preset: options.preset,
            audio_bitrate: options.audio_bitrate,
        };
        self.media_call(EngineAction::Transcode, payload).await
    }

    /// Stream-copies the input into an MP4 container and returns the output
    /// bytes.
    ///
    /// # Errors
    /// - `EngineError::Job` - FFmpeg remux failed (no retries are attempted)
    /// - `EngineError::WorkerCrashed` - worker unavailable
    pub async fn remux(&self, buffer: Bytes, has_audio: Option<bool>) -> Result<Bytes, EngineError> {
        let payload = RequestPayload {
            buffer,
            name: scratch_name("remux"),
            has_audio,
            ..Default::default()
        };
        self.media_call(EngineAction::Remux, payload).await
    }

    /// Whether the worker is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.requests.is_closed()
    }

    async fn media_call(
        &self,
        action: EngineAction,
        payload: RequestPayload,
    ) -> Result<Bytes, EngineError> {
        match self.call(action, payload).await? {
            ResponsePayload::Media(bytes) => Ok(bytes),
            ResponsePayload::Probe(_) => Err(EngineError::UnexpectedPayload { action }),
        }
    }

    async fn call(
        &self,
        action: EngineAction,
        payload: RequestPayload,
    ) -> Result<ResponsePayload, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, receiver) = oneshot::channel();

        {
            let mut state = self
                .pending
                .lock()
                .map_err(|_| EngineError::WorkerCrashed {
                    reason: "engine state poisoned".to_string(),
                })?;
            if let Some(reason) = &state.failure {
                return Err(EngineError::WorkerCrashed {
                    reason: reason.clone(),
                });
            }
            state.jobs.insert(id, responder);
        }

        let request = EngineRequest { id, action, payload };
        if self.requests.send(request).is_err() {
            let reason = match self.pending.lock() {
                Ok(mut state) => {
                    state.jobs.remove(&id);
                    state
                        .failure
                        .clone()
                        .unwrap_or_else(|| "FFmpeg worker crashed.".to_string())
                }
                Err(_) => "FFmpeg worker crashed.".to_string(),
            };
            return Err(EngineError::WorkerCrashed { reason });
        }

        receiver.await.unwrap_or_else(|_| {
            let reason = self
                .pending
                .lock()
                .ok()
                .and_then(|state| state.failure.clone())
                .unwrap_or_else(|| "FFmpeg worker crashed.".to_string());
            Err(EngineError::WorkerCrashed { reason })
        })
    }
}

fn scratch_name(prefix: &str) -> String {
    format!("{prefix}-{}", chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::{EventSink, MediaWorker, WorkerError, spawn_engine};

    enum Script {
        Echo,
        JobError(String),
        Crash(String),
        EventsThenEcho,
    }

    struct ScriptedWorker {
        script: VecDeque<Script>,
    }

    impl ScriptedWorker {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    #[async_trait]
    impl MediaWorker for ScriptedWorker {
        async fn handle(
            &mut self,
            request: EngineRequest,
            events: &EventSink,
        ) -> Result<ResponsePayload, WorkerError> {
            match self.script.pop_front().unwrap_or(Script::Echo) {
                Script::Echo => Ok(ResponsePayload::Media(request.payload.buffer)),
                Script::JobError(reason) => Err(WorkerError::Ffmpeg {
                    operation: request.action.to_string(),
                    reason,
                }),
                Script::Crash(reason) => Err(WorkerError::Fatal { reason }),
                Script::EventsThenEcho => {
                    events.progress(0.5);
                    events.progress(1.5);
                    events.log("scripted log line");
                    Ok(ResponsePayload::Media(request.payload.buffer))
                }
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_resolve_independently() {
        let (bridge, _events) = spawn_engine(ScriptedWorker::new(vec![Script::Echo, Script::Echo]));

        let first = bridge.remux(Bytes::from_static(b"first"), None);
        let second = bridge.remux(Bytes::from_static(b"second"), None);
        let (first, second) = futures::future::join(first, second).await;

        assert_eq!(first.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(second.unwrap(), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_job_error_rejects_only_that_job() {
        let worker = ScriptedWorker::new(vec![
            Script::JobError("Invalid argument".to_string()),
            Script::Echo,
        ]);
        let (bridge, _events) = spawn_engine(worker);

        let failed = bridge
            .transcode(Bytes::from_static(b"bad"), TranscodeOptions::default())
            .await;
        let message = failed.unwrap_err().to_string();
        assert!(message.contains("FFmpeg transcode failed"));
        assert!(message.contains("Invalid argument"));

        let ok = bridge.remux(Bytes::from_static(b"good"), None).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_crash_rejects_all_pending_and_latches_bridge() {
        let worker = ScriptedWorker::new(vec![Script::Crash("out of memory".to_string())]);
        let (bridge, _events) = spawn_engine(worker);

        let first = bridge.remux(Bytes::from_static(b"a"), None);
        let second = bridge.remux(Bytes::from_static(b"b"), None);
        let (first, second) = futures::future::join(first, second).await;

        let first = first.unwrap_err();
        let second = second.unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
        assert!(matches!(first, EngineError::WorkerCrashed { .. }));
        assert!(first.to_string().contains("out of memory"));

        // A later call must fail immediately with the latched state rather
        // than hang.
        let third = bridge.remux(Bytes::from_static(b"c"), None).await;
        match third.unwrap_err() {
            EngineError::WorkerCrashed { reason } => assert!(reason.contains("out of memory")),
            other => panic!("expected WorkerCrashed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_progress_and_log_streams_delivered() {
        let (bridge, mut events) = spawn_engine(ScriptedWorker::new(vec![Script::EventsThenEcho]));

        let result = bridge.remux(Bytes::from_static(b"media"), None).await;
        assert!(result.is_ok());

        assert_eq!(events.progress.recv().await, Some(0.5));
        // Out-of-range ratios pass through unclamped; clamping is the
        // receiver's job.
        assert_eq!(events.progress.recv().await, Some(1.5));
        assert_eq!(events.logs.recv().await.as_deref(), Some("scripted log line"));
    }

    #[tokio::test]
    async fn test_probe_rejects_media_payload() {
        let (bridge, _events) = spawn_engine(ScriptedWorker::new(vec![Script::Echo]));
        let result = bridge.probe(Bytes::from_static(b"data"), "probe-test").await;
        assert!(matches!(
            result.unwrap_err(),
            EngineError::UnexpectedPayload {
                action: EngineAction::Probe
            }
        ));
    }
}
