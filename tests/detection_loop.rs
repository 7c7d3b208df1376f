use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mood_mirror::camera::FrameFeed;
use mood_mirror::config::{DetectionConfig, StalePolicy};
use mood_mirror::detection::{DetectionSession, SessionPhase};
use mood_mirror::error::{MoodMirrorError, Result};
use mood_mirror::expression::ExpressionTable;
use mood_mirror::inference::FaceModel;
use mood_mirror::loader::{ModelHandle, ModelLoader};
use mood_mirror::models::{BoundingBox, Detection, DisplaySize, Frame, Point};
use mood_mirror::presentation::{OverlaySurface, Presenter};

type Reply = Result<Vec<Detection>>;

/// Blocks each inference until the test releases it. Frames are told apart
/// by their width.
#[derive(Default)]
struct GatedModel {
    gates: Mutex<HashMap<u32, mpsc::Receiver<Reply>>>,
}

impl GatedModel {
    fn gate(&self, frame_id: u32) -> mpsc::Sender<Reply> {
        let (tx, rx) = mpsc::channel();
        self.gates.lock().unwrap().insert(frame_id, rx);
        tx
    }
}

impl FaceModel for GatedModel {
    fn detect(&self, frame: &Frame) -> Reply {
        let rx = self
            .gates
            .lock()
            .unwrap()
            .remove(&frame.width)
            .expect("no gate for frame");
        rx.recv()
            .unwrap_or_else(|_| Err(MoodMirrorError::Inference("gate dropped".into())))
    }
}

/// Answers every frame with the same detections and counts calls
struct Fixed {
    reply: Vec<Detection>,
    calls: AtomicUsize,
}

impl Fixed {
    fn new(reply: Vec<Detection>) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FaceModel for Fixed {
    fn detect(&self, _frame: &Frame) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct Failing;

impl FaceModel for Failing {
    fn detect(&self, _frame: &Frame) -> Reply {
        Err(MoodMirrorError::Inference("model exploded".into()))
    }
}

struct Rig {
    session: DetectionSession,
    presenter: Arc<Presenter>,
    models: ModelHandle,
    frames: FrameFeed,
    surface: OverlaySurface,
    table: ExpressionTable,
}

fn rig(interval_ms: u64) -> Rig {
    let table = ExpressionTable::default();
    let presenter = Arc::new(Presenter::new(table.no_face(), Duration::ZERO));
    let models = ModelHandle::new();
    let frames = FrameFeed::new();
    let surface = OverlaySurface::new();
    let config = DetectionConfig {
        interval_ms,
        stale_policy: StalePolicy::LatestIssued,
    };
    let session = DetectionSession::new(
        &config,
        models.clone(),
        frames.clone(),
        surface.clone(),
        table.clone(),
        presenter.clone(),
    );
    Rig {
        session,
        presenter,
        models,
        frames,
        surface,
        table,
    }
}

/// A rig whose timer never fires on its own
fn manual_rig() -> Rig {
    rig(3_600_000)
}

fn frame(id: u32) -> Arc<Frame> {
    Arc::new(Frame::new(vec![0; (id * 4 * 3) as usize], id, 4))
}

fn face(entries: &[(&str, f32)]) -> Detection {
    Detection::new(
        BoundingBox::new(10.0, 10.0, 20.0, 20.0),
        vec![Point::new(15.0, 15.0), Point::new(25.0, 15.0)],
        entries.iter().map(|(l, p)| (*l, *p)).collect(),
    )
}

fn attach(rig: &Rig, id: u32) {
    rig.frames.publish(frame(id));
    rig.surface.attach(DisplaySize::new(64, 64));
}

#[tokio::test]
async fn happy_face_updates_label_and_background() {
    let rig = manual_rig();
    rig.models.install(Arc::new(Fixed::new(vec![face(&[
        ("happy", 0.9),
        ("sad", 0.05),
        ("neutral", 0.05),
    ])])));
    attach(&rig, 1);
    rig.session.start().unwrap();

    rig.session.poll_once().unwrap().await.unwrap();

    let state = rig.presenter.ui_state();
    assert_eq!(state.displayed_label, "Feliz 😊");
    assert_eq!(state.background_color, rig.table.color_for("happy"));
    assert!(state.has_face);
    assert_eq!(
        rig.presenter.background_color(Instant::now()),
        rig.table.color_for("happy")
    );
    let (_, canvas) = rig.presenter.overlay_since(0).unwrap();
    assert!(!canvas.is_blank());
    assert_eq!(rig.session.phase(), SessionPhase::Detecting);
}

#[tokio::test]
async fn no_face_reverts_to_neutral_and_clears_canvas() {
    let rig = manual_rig();
    let model = Arc::new(GatedModel::default());
    rig.models.install(model.clone());
    rig.session.start().unwrap();

    attach(&rig, 1);
    let release = model.gate(1);
    let task = rig.session.poll_once().unwrap();
    release.send(Ok(vec![face(&[("angry", 0.8)])])).unwrap();
    task.await.unwrap();
    assert!(rig.presenter.ui_state().has_face);

    attach(&rig, 2);
    let release = model.gate(2);
    let task = rig.session.poll_once().unwrap();
    release.send(Ok(Vec::new())).unwrap();
    task.await.unwrap();

    let state = rig.presenter.ui_state();
    assert_eq!(state.displayed_label, "no face detected");
    assert_eq!(state.background_color, rig.table.neutral());
    assert!(!state.has_face);
    let (_, canvas) = rig.presenter.overlay_since(1).unwrap();
    assert!(canvas.is_blank());
}

#[tokio::test]
async fn unknown_expression_shows_raw_label() {
    let rig = manual_rig();
    rig.models.install(Arc::new(Fixed::new(vec![face(&[
        ("confused", 0.6),
        ("happy", 0.4),
    ])])));
    attach(&rig, 1);
    rig.session.start().unwrap();

    rig.session.poll_once().unwrap().await.unwrap();

    let state = rig.presenter.ui_state();
    assert_eq!(state.displayed_label, "confused");
    assert_eq!(state.background_color, rig.table.neutral());
}

#[tokio::test]
async fn late_result_of_older_tick_is_discarded() {
    let rig = manual_rig();
    let model = Arc::new(GatedModel::default());
    rig.models.install(model.clone());
    rig.session.start().unwrap();

    attach(&rig, 1);
    let first = model.gate(1);
    let first_task = rig.session.poll_once().unwrap();

    attach(&rig, 2);
    let second = model.gate(2);
    let second_task = rig.session.poll_once().unwrap();

    second.send(Ok(vec![face(&[("happy", 0.9)])])).unwrap();
    second_task.await.unwrap();
    first.send(Ok(vec![face(&[("sad", 0.9)])])).unwrap();
    first_task.await.unwrap();

    assert_eq!(rig.presenter.ui_state().displayed_label, "Feliz 😊");
    assert_eq!(rig.presenter.revision(), 1);
}

#[tokio::test]
async fn in_flight_result_is_dropped_after_stop() {
    let rig = manual_rig();
    let model = Arc::new(GatedModel::default());
    rig.models.install(model.clone());
    rig.session.start().unwrap();
    attach(&rig, 1);

    let release = model.gate(1);
    let task = rig.session.poll_once().unwrap();
    rig.session.stop();
    release.send(Ok(vec![face(&[("happy", 0.9)])])).unwrap();
    task.await.unwrap();

    assert_eq!(rig.presenter.revision(), 0);
    assert_eq!(rig.presenter.ui_state(), rig.table.no_face());
    assert!(rig.session.latest_ui_state().is_none());
    assert_eq!(rig.session.phase(), SessionPhase::Stopped);
}

#[tokio::test]
async fn in_flight_result_is_dropped_after_restart() {
    let rig = manual_rig();
    let model = Arc::new(GatedModel::default());
    rig.models.install(model.clone());
    rig.session.start().unwrap();
    attach(&rig, 1);

    let release = model.gate(1);
    let task = rig.session.poll_once().unwrap();
    rig.session.stop();
    rig.session.start().unwrap();
    release.send(Ok(vec![face(&[("happy", 0.9)])])).unwrap();
    task.await.unwrap();

    assert_eq!(rig.presenter.revision(), 0);
    assert!(rig.session.latest_ui_state().is_none());

    // Ticks issued after the restart still reach the screen
    attach(&rig, 2);
    let release = model.gate(2);
    let task = rig.session.poll_once().unwrap();
    release.send(Ok(vec![face(&[("sad", 0.9)])])).unwrap();
    task.await.unwrap();
    assert_eq!(rig.presenter.ui_state().displayed_label, "Triste 😢");
}

#[tokio::test]
async fn no_inference_before_models_are_ready() {
    let rig = manual_rig();
    attach(&rig, 1);
    rig.session.start().unwrap();

    assert!(rig.session.poll_once().is_none());
    assert_eq!(rig.presenter.revision(), 0);
    assert_eq!(rig.session.phase(), SessionPhase::Uninitialized);

    let model = Arc::new(Fixed::new(vec![face(&[("neutral", 1.0)])]));
    let loader = ModelLoader::new(Default::default(), rig.models.clone());
    let handed_over = model.clone();
    loader
        .load_with(move || Ok(ArcModel(handed_over)))
        .await
        .unwrap();

    rig.session.poll_once().unwrap().await.unwrap();
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(rig.presenter.ui_state().displayed_label, "Neutro 😐");
}

struct ArcModel(Arc<Fixed>);

impl FaceModel for ArcModel {
    fn detect(&self, frame: &Frame) -> Reply {
        self.0.detect(frame)
    }
}

#[tokio::test]
async fn failed_model_load_never_starts_inference() {
    let rig = manual_rig();
    attach(&rig, 1);
    let loader = ModelLoader::new(Default::default(), rig.models.clone());
    let result = loader
        .load_with(|| -> Result<Fixed> { Err(MoodMirrorError::ModelLoad("missing".into())) })
        .await;
    assert!(result.is_err());

    rig.session.start().unwrap();
    assert!(rig.session.poll_once().is_none());
    assert_eq!(rig.session.phase(), SessionPhase::ModelsLoading);
}

#[tokio::test]
async fn inference_failure_counts_as_no_face_and_loop_survives() {
    let rig = manual_rig();
    rig.models.install(Arc::new(Failing));
    attach(&rig, 1);
    rig.session.start().unwrap();

    rig.session.poll_once().unwrap().await.unwrap();
    assert_eq!(rig.presenter.ui_state(), rig.table.no_face());
    assert!(rig.session.is_running());

    rig.session.poll_once().unwrap().await.unwrap();
    assert_eq!(rig.session.issued(), 2);
    assert_eq!(rig.presenter.revision(), 2);
}

/// Moves the paused clock one interval at a time, letting the timer run
async fn advance_intervals(count: u32, interval: Duration) {
    for _ in 0..count {
        tokio::time::advance(interval).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn second_start_keeps_a_single_timer() {
    let rig = rig(20);
    rig.models.install(Arc::new(Fixed::new(Vec::new())));
    attach(&rig, 1);

    assert!(rig.session.start().unwrap());
    assert!(!rig.session.start().unwrap());
    assert!(rig.session.is_running());

    advance_intervals(5, Duration::from_millis(20)).await;
    assert_eq!(rig.session.issued(), 5);

    rig.session.stop();
    assert!(!rig.session.is_running());
    // Restarting after a stop is allowed
    assert!(rig.session.start().unwrap());
}

#[tokio::test(start_paused = true)]
async fn timer_ticks_until_stopped() {
    let rig = rig(20);
    rig.models.install(Arc::new(Fixed::new(vec![face(&[("surprised", 0.7)])])));
    attach(&rig, 1);

    rig.session.start().unwrap();
    advance_intervals(1, Duration::from_millis(10)).await;
    assert_eq!(rig.session.issued(), 0);

    advance_intervals(1, Duration::from_millis(10)).await;
    assert_eq!(rig.session.issued(), 1);
    advance_intervals(3, Duration::from_millis(20)).await;
    assert_eq!(rig.session.issued(), 4);

    rig.session.stop();
    advance_intervals(10, Duration::from_millis(20)).await;
    assert_eq!(rig.session.issued(), 4);
    assert_eq!(rig.session.phase(), SessionPhase::Stopped);
}

#[tokio::test]
async fn detached_canvas_skips_ticks() {
    let rig = manual_rig();
    rig.models.install(Arc::new(Fixed::new(Vec::new())));
    rig.frames.publish(frame(1));
    rig.session.start().unwrap();

    assert!(rig.session.poll_once().is_none());
    rig.surface.attach(DisplaySize::new(32, 32));
    assert!(rig.session.poll_once().is_some());
    rig.surface.detach();
    assert!(rig.session.poll_once().is_none());
}
