use std::sync::Arc;

use mood_mirror::camera::{CameraManager, FrameFeed};
use mood_mirror::config::AppConfig;
use mood_mirror::detection::DetectionSession;
use mood_mirror::error::{MoodMirrorError, Result};
use mood_mirror::expression::ExpressionTable;
use mood_mirror::loader::{ModelHandle, ModelLoader};
use mood_mirror::presentation::{OverlaySurface, Presenter};
use mood_mirror::ui::MoodMirrorApp;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the logging system (file only, no console output)
fn init_logging() -> Result<()> {
    let log_file = std::fs::File::create("mood_mirror.log").map_err(MoodMirrorError::Io)?;

    let file_layer = fmt::layer()
        .with_writer(Arc::new(log_file))
        .with_ansi(false);

    tracing_subscriber::registry().with(file_layer).init();

    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let config = AppConfig::load().unwrap_or_else(|e| {
        error!("Ignoring configuration: {}", e);
        AppConfig::default()
    });

    // Detection and model loading run here; the window owns the main thread
    let runtime = tokio::runtime::Runtime::new()?;
    let _guard = runtime.enter();

    let table = ExpressionTable::from_config(&config.presentation);
    let presenter = Arc::new(Presenter::new(
        table.no_face(),
        config.presentation.transition(),
    ));
    let models = ModelHandle::new();
    let frames = FrameFeed::new();
    let surface = OverlaySurface::new();
    let session = Arc::new(DetectionSession::new(
        &config.detection,
        models.clone(),
        frames.clone(),
        surface.clone(),
        table,
        presenter.clone(),
    ));

    // The loop starts only once every model artifact is loaded
    let loader = ModelLoader::new(config.models.clone(), models);
    let loop_session = Arc::clone(&session);
    runtime.spawn(async move {
        if loader.load().await.is_ok() {
            if let Err(e) = loop_session.start() {
                error!("Could not start detection loop: {}", e);
            }
        }
    });

    let camera = CameraManager::new(&config.camera).map_err(|e| {
        error!("Camera initialization failed: {}", e);
        e.to_string()
    });

    let app_session = Arc::clone(&session);
    let result = eframe::run_native(
        "Mood Mirror",
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([960.0, 720.0])
                .with_title("Mood Mirror"),
            ..Default::default()
        },
        Box::new(move |_cc| {
            Ok(Box::new(MoodMirrorApp::new(
                camera,
                frames,
                surface,
                presenter,
                app_session,
            )))
        }),
    );

    if let Err(e) = result {
        error!("Application error: {}", e);
    }

    session.stop();
    info!("Shut down");
    Ok(())
}
