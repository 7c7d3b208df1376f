// Detection loop: fixed-interval frame sampling and result sequencing

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::camera::FrameFeed;
use crate::config::{DetectionConfig, StalePolicy};
use crate::error::{MoodMirrorError, Result};
use crate::expression::ExpressionTable;
use crate::loader::{LoadStatus, ModelHandle};
use crate::models::{Detection, DisplaySize, TickOutput, UiState};
use crate::presentation::{OverlaySurface, ResultSink};

/// Coarse lifecycle of a camera session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    ModelsLoading,
    Ready,
    Detecting,
    Stopped,
}

#[derive(Default)]
struct LoopState {
    running: bool,
    stopped: bool,
    /// Bumped by every stop; results from an older generation are dropped
    generation: u64,
    /// Sequence number of the most recently issued inference
    issued: u64,
    /// Sequence number of the most recently applied result
    applied: u64,
    latest: Option<UiState>,
}

struct Shared {
    interval: Duration,
    policy: StalePolicy,
    models: ModelHandle,
    frames: FrameFeed,
    surface: OverlaySurface,
    table: ExpressionTable,
    sink: Arc<dyn ResultSink>,
    state: Mutex<LoopState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One guarded tick. Returns the spawned inference task, if any.
    fn tick(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let Some(model) = self.models.get() else {
            trace!("Models not ready, skipping tick");
            return None;
        };
        let Some(frame) = self.frames.latest() else {
            trace!("No camera stream, skipping tick");
            return None;
        };
        let Some(display) = self.surface.size() else {
            trace!("No overlay canvas, skipping tick");
            return None;
        };

        let (seq, generation) = {
            let mut state = self.lock();
            if !state.running {
                return None;
            }
            state.issued += 1;
            (state.issued, state.generation)
        };

        let frame_size = frame.size();
        let shared = Arc::clone(self);
        Some(tokio::spawn(async move {
            let detections = match tokio::task::spawn_blocking(move || model.detect(&frame)).await
            {
                Ok(Ok(detections)) => detections,
                Ok(Err(e)) => {
                    warn!(seq, "Inference failed, treating tick as no face: {}", e);
                    Vec::new()
                }
                Err(e) => {
                    error!(seq, "Inference task failed: {}", e);
                    Vec::new()
                }
            };
            let output = shared.build_output(seq, detections, frame_size, display);
            shared.apply(output, generation);
        }))
    }

    fn build_output(
        &self,
        seq: u64,
        detections: Vec<Detection>,
        frame_size: (u32, u32),
        display: DisplaySize,
    ) -> TickOutput {
        let ui_state = self.table.ui_state(&detections);
        let detections = if ui_state.has_face {
            let sx = display.width as f32 / frame_size.0.max(1) as f32;
            let sy = display.height as f32 / frame_size.1.max(1) as f32;
            detections.iter().map(|d| d.scaled(sx, sy)).collect()
        } else {
            Vec::new()
        };

        TickOutput {
            seq,
            ui_state,
            detections,
            display_size: display,
        }
    }

    /// Applies a result if the session is live and the result is not stale
    fn apply(&self, output: TickOutput, generation: u64) -> bool {
        let mut state = self.lock();
        if !state.running || generation != state.generation {
            debug!(seq = output.seq, "Issued before the last stop, discarding result");
            return false;
        }
        let fresh = match self.policy {
            StalePolicy::LatestIssued => output.seq == state.issued,
            StalePolicy::Monotonic => output.seq > state.applied,
        };
        if !fresh {
            debug!(
                seq = output.seq,
                issued = state.issued,
                applied = state.applied,
                "Discarding stale result"
            );
            return false;
        }

        state.applied = output.seq;
        state.latest = Some(output.ui_state.clone());
        // Applied under the session lock so stop() cannot interleave
        self.sink.apply(&output);
        true
    }
}

/// Owns everything one camera session needs: the readiness gate, the timer
/// and the sequencing state for in-flight inferences.
pub struct DetectionSession {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl DetectionSession {
    pub fn new(
        config: &DetectionConfig,
        models: ModelHandle,
        frames: FrameFeed,
        surface: OverlaySurface,
        table: ExpressionTable,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                interval: config.interval(),
                policy: config.stale_policy,
                models,
                frames,
                surface,
                table,
                sink,
                state: Mutex::new(LoopState::default()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Starts polling. Returns `Ok(false)` if the timer was already running.
    ///
    /// Must be called from within a tokio runtime. The first tick fires one
    /// interval after the call.
    pub fn start(&self) -> Result<bool> {
        let runtime = Handle::try_current().map_err(|e| MoodMirrorError::Runtime(e.to_string()))?;
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.shared.lock();
            if state.running {
                debug!("Detection loop already running");
                return Ok(false);
            }
            state.running = true;
            state.stopped = false;
        }

        let shared = Arc::clone(&self.shared);
        let period = shared.interval;
        *timer = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                shared.tick();
            }
        }));

        info!(interval_ms = period.as_millis() as u64, "Detection loop started");
        Ok(true)
    }

    /// Cancels the timer. Results of inferences still in flight are dropped.
    pub fn stop(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.shared.lock();
            if !state.running {
                return;
            }
            state.running = false;
            state.stopped = true;
            state.generation += 1;
        }
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        info!("Detection loop stopped");
    }

    /// Runs one guarded tick now, outside the timer.
    ///
    /// Returns the inference task so callers can wait for it, or `None` when
    /// a precondition skipped the tick.
    pub fn poll_once(&self) -> Option<JoinHandle<()>> {
        self.shared.tick()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// UI state of the last applied result
    pub fn latest_ui_state(&self) -> Option<UiState> {
        self.shared.lock().latest.clone()
    }

    /// Number of inferences issued so far
    pub fn issued(&self) -> u64 {
        self.shared.lock().issued
    }

    pub fn models(&self) -> &ModelHandle {
        &self.shared.models
    }

    pub fn phase(&self) -> SessionPhase {
        let state = self.shared.lock();
        if state.stopped {
            return SessionPhase::Stopped;
        }
        match self.shared.models.status() {
            LoadStatus::Ready if state.running => SessionPhase::Detecting,
            LoadStatus::Ready => SessionPhase::Ready,
            LoadStatus::Loading | LoadStatus::Failed(_) => SessionPhase::ModelsLoading,
            LoadStatus::Idle => SessionPhase::Uninitialized,
        }
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        self.stop();
    }
}
