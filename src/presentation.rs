// Presentation layer: label, mood background and the detection overlay

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use imageproc::drawing;
use imageproc::rect::Rect;
use tokio::sync::watch;

use crate::models::{Color, Detection, DisplaySize, TickOutput, UiState};

/// Expressions below this probability are not annotated
const MIN_ANNOTATED_PROBABILITY: f32 = 0.1;

const BOX_COLOR: Rgba<u8> = Rgba([0, 170, 255, 255]);
const LANDMARK_COLOR: Rgba<u8> = Rgba([0, 255, 120, 255]);
const BAR_COLOR: Rgba<u8> = Rgba([255, 255, 255, 200]);
const LANDMARK_RADIUS: i32 = 2;
const BAR_HEIGHT: u32 = 4;
const ROW_HEIGHT: f32 = 18.0;

/// Receives the result of every applied tick
pub trait ResultSink: Send + Sync {
    fn apply(&self, output: &TickOutput);
}

/// Tracks whether an overlay canvas is on screen and how big it is.
///
/// The UI attaches the surface with the size the video is drawn at; the
/// detection loop skips ticks while it is detached.
#[derive(Clone)]
pub struct OverlaySurface {
    sender: Arc<watch::Sender<Option<DisplaySize>>>,
}

impl Default for OverlaySurface {
    fn default() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl OverlaySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches or resizes the canvas. Empty sizes count as detached.
    pub fn attach(&self, size: DisplaySize) {
        let size = (!size.is_empty()).then_some(size);
        self.sender.send_if_modified(|current| {
            if *current != size {
                *current = size;
                true
            } else {
                false
            }
        });
    }

    pub fn detach(&self) {
        self.sender.send_replace(None);
    }

    pub fn size(&self) -> Option<DisplaySize> {
        *self.sender.borrow()
    }
}

/// A text label the UI paints on top of the rasterised overlay
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub x: f32,
    pub y: f32,
    pub text: String,
}

/// Transparent canvas holding landmark points and expression bars
#[derive(Clone, Debug)]
pub struct OverlayCanvas {
    image: RgbaImage,
    annotations: Vec<Annotation>,
}

impl Default for OverlayCanvas {
    fn default() -> Self {
        Self {
            image: RgbaImage::new(1, 1),
            annotations: Vec::new(),
        }
    }
}

impl OverlayCanvas {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Fully transparent canvas of the given size, annotations dropped
    pub fn clear(&mut self, size: DisplaySize) {
        let (width, height) = (size.width.max(1), size.height.max(1));
        if self.image.dimensions() == (width, height) {
            self.image.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
        } else {
            self.image = RgbaImage::new(width, height);
        }
        self.annotations.clear();
    }

    pub fn is_blank(&self) -> bool {
        self.annotations.is_empty() && self.image.pixels().all(|p| p.0[3] == 0)
    }

    /// Draws detections that are already scaled to the canvas size
    pub fn draw(&mut self, detections: &[Detection]) {
        for detection in detections {
            self.draw_detection(detection);
        }
    }

    fn draw_detection(&mut self, detection: &Detection) {
        let b = detection.bounds;
        let outline = Rect::at(b.x.round() as i32, b.y.round() as i32)
            .of_size((b.width.round() as u32).max(1), (b.height.round() as u32).max(1));
        drawing::draw_hollow_rect_mut(&mut self.image, outline, BOX_COLOR);

        for point in &detection.landmarks {
            drawing::draw_filled_circle_mut(
                &mut self.image,
                (point.x.round() as i32, point.y.round() as i32),
                LANDMARK_RADIUS,
                LANDMARK_COLOR,
            );
        }

        let mut ranked: Vec<(&str, f32)> = detection
            .expressions
            .iter()
            .filter(|(_, p)| *p >= MIN_ANNOTATED_PROBABILITY)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut y = b.y + b.height + 4.0;
        for (label, probability) in ranked {
            let bar_width = ((b.width * probability).round() as u32).max(1);
            drawing::draw_filled_rect_mut(
                &mut self.image,
                Rect::at(b.x.round() as i32, y.round() as i32).of_size(bar_width, BAR_HEIGHT),
                BAR_COLOR,
            );
            self.annotations.push(Annotation {
                x: b.x,
                y: y + BAR_HEIGHT as f32,
                text: format!("{label} {:.0}%", probability * 100.0),
            });
            y += ROW_HEIGHT;
        }
    }
}

/// Linear fade between two background colours
#[derive(Clone, Copy, Debug)]
pub struct ColorTransition {
    from: Color,
    to: Color,
    started: Instant,
    duration: Duration,
}

impl ColorTransition {
    pub fn new(color: Color, duration: Duration) -> Self {
        Self {
            from: color,
            to: color,
            started: Instant::now(),
            duration,
        }
    }

    /// Starts fading from wherever the fade is now towards `target`
    pub fn retarget(&mut self, target: Color, now: Instant) {
        if target == self.to {
            return;
        }
        self.from = self.at(now);
        self.to = target;
        self.started = now;
    }

    pub fn at(&self, now: Instant) -> Color {
        if self.duration.is_zero() {
            return self.to;
        }
        let elapsed = now.saturating_duration_since(self.started);
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        self.from.lerp(self.to, t)
    }

    pub fn is_settled(&self, now: Instant) -> bool {
        self.at(now) == self.to
    }
}

struct PresenterState {
    ui_state: UiState,
    transition: ColorTransition,
    canvas: OverlayCanvas,
    revision: u64,
}

/// Holds what the window shows; updated only through `ResultSink::apply`
pub struct Presenter {
    state: Mutex<PresenterState>,
}

impl Presenter {
    /// Starts out showing `initial` with an empty canvas
    pub fn new(initial: UiState, transition: Duration) -> Self {
        Self {
            state: Mutex::new(PresenterState {
                transition: ColorTransition::new(initial.background_color, transition),
                ui_state: initial,
                canvas: OverlayCanvas::default(),
                revision: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PresenterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ui_state(&self) -> UiState {
        self.lock().ui_state.clone()
    }

    /// Background colour at `now`, mid-transition if one is running
    pub fn background_color(&self, now: Instant) -> Color {
        self.lock().transition.at(now)
    }

    /// Bumped on every redraw of the overlay canvas
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// The canvas, if it changed after `seen_revision`
    pub fn overlay_since(&self, seen_revision: u64) -> Option<(u64, OverlayCanvas)> {
        let state = self.lock();
        (state.revision != seen_revision).then(|| (state.revision, state.canvas.clone()))
    }
}

impl ResultSink for Presenter {
    fn apply(&self, output: &TickOutput) {
        let mut state = self.lock();
        state.transition.retarget(output.ui_state.background_color, Instant::now());
        state.ui_state = output.ui_state.clone();
        state.canvas.clear(output.display_size);
        state.canvas.draw(&output.detections);
        state.revision += 1;
    }
}
