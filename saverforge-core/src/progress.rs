//! Monotonic build progress tracking.
//!
//! The displayed progress value never moves backwards: a reported value
//! lower than the current one is ignored. While a worker job runs, its raw
//! ratios are mapped into a sub-window `[base, base + span]` of the overall
//! bar, so checkpoint values set by the pipeline and streamed worker ratios
//! compose into one monotonic sequence.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::builder::BuildEvent;

struct WorkerWindow {
    base: f64,
    span: f64,
}

struct ProgressState {
    current: f64,
    window: Option<WorkerWindow>,
}

/// Shared monotonic progress tracker emitting [`BuildEvent::Progress`].
///
/// Cheap to clone; clones share one state so a pump task can feed worker
/// ratios while the pipeline sets checkpoints.
#[derive(Clone)]
pub struct ProgressTracker {
    state: Arc<Mutex<ProgressState>>,
    events: mpsc::UnboundedSender<BuildEvent>,
}

fn clamp(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

impl ProgressTracker {
    pub fn new(events: mpsc::UnboundedSender<BuildEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProgressState {
                current: 0.0,
                window: None,
            })),
            events,
        }
    }

    /// Resets to zero for a new build attempt.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.current = 0.0;
            state.window = None;
        }
        let _ = self.events.send(BuildEvent::Progress(0.0));
    }

    /// Advances to `value` if it is an increase; lower values are ignored.
    pub fn set(&self, value: f64) {
        self.advance(clamp(value));
    }

    /// Opens a worker sub-window; subsequent worker ratios map into
    /// `[base, base + span]`.
    pub fn start_worker(&self, base: f64, span: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.window = Some(WorkerWindow {
                base: clamp(base),
                span: clamp(span),
            });
        }
    }

    /// Closes the worker sub-window, optionally advancing to a checkpoint.
    pub fn stop_worker(&self, checkpoint: Option<f64>) {
        if let Ok(mut state) = self.state.lock() {
            state.window = None;
        }
        if let Some(value) = checkpoint {
            self.set(value);
        }
    }

    /// Feeds a raw worker ratio through the current sub-window. Ignored when
    /// no window is open.
    pub fn update_from_worker(&self, ratio: f64) {
        let mapped = match self.state.lock() {
            Ok(state) => state
                .window
                .as_ref()
                .map(|w| w.base + w.span * clamp(ratio)),
            Err(_) => None,
        };
        if let Some(value) = mapped {
            self.advance(value);
        }
    }

    /// Current displayed value in [0, 1].
    pub fn current(&self) -> f64 {
        self.state.lock().map(|state| state.current).unwrap_or(0.0)
    }

    fn advance(&self, value: f64) {
        let advanced = match self.state.lock() {
            Ok(mut state) => {
                if value > state.current {
                    state.current = value;
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };
        if advanced {
            let _ = self.events.send(BuildEvent::Progress(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    use super::*;

    fn tracker() -> (ProgressTracker, mpsc::UnboundedReceiver<BuildEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ProgressTracker::new(sender), receiver)
    }

    #[test]
    fn test_lower_values_ignored() {
        let (tracker, _rx) = tracker();
        tracker.set(0.5);
        tracker.set(0.3);
        assert_eq!(tracker.current(), 0.5);
        tracker.set(0.6);
        assert_eq!(tracker.current(), 0.6);
    }

    #[test]
    fn test_values_clamped() {
        let (tracker, _rx) = tracker();
        tracker.set(1.7);
        assert_eq!(tracker.current(), 1.0);
        tracker.reset();
        tracker.set(-0.4);
        assert_eq!(tracker.current(), 0.0);
    }

    #[test]
    fn test_worker_window_mapping() {
        let (tracker, _rx) = tracker();
        tracker.set(0.33);
        tracker.start_worker(0.33, 0.5);
        tracker.update_from_worker(0.5);
        assert!((tracker.current() - 0.58).abs() < 1e-9);
        // Out-of-range worker ratios are clamped before mapping.
        tracker.update_from_worker(2.0);
        assert!((tracker.current() - 0.83).abs() < 1e-9);
        tracker.stop_worker(Some(0.82));
        // 0.82 is below the already-displayed 0.83, so it is ignored.
        assert!((tracker.current() - 0.83).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_ignored_without_window() {
        let (tracker, _rx) = tracker();
        tracker.update_from_worker(0.9);
        assert_eq!(tracker.current(), 0.0);
    }

    #[test]
    fn test_emits_only_on_increase() {
        let (tracker, mut rx) = tracker();
        tracker.set(0.4);
        tracker.set(0.2);
        tracker.set(0.9);
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BuildEvent::Progress(value) = event {
                seen.push(value);
            }
        }
        assert_eq!(seen, vec![0.4, 0.9]);
    }

    proptest! {
        // Displayed progress is non-decreasing and stays in [0, 1] for any
        // input sequence.
        #[test]
        fn progress_is_monotonic(values in prop::collection::vec(-1.0f64..2.0, 0..40)) {
            let (tracker, _rx) = tracker();
            let mut last = tracker.current();
            for value in values {
                tracker.set(value);
                let current = tracker.current();
                prop_assert!(current >= last);
                prop_assert!((0.0..=1.0).contains(&current));
                last = current;
            }
        }
    }
}
