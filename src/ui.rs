// UI module: video, overlay canvas, expression label and mood background

use std::sync::Arc;
use std::time::Instant;

use crate::camera::{CameraManager, FrameFeed};
use crate::detection::DetectionSession;
use crate::loader::LoadStatus;
use crate::models::{Color, DisplaySize};
use crate::presentation::{Annotation, OverlaySurface, Presenter};
use tracing::warn;

const LABEL_SIZE: f32 = 36.0;
const ANNOTATION_SIZE: f32 = 13.0;

fn to_color32(color: Color) -> egui::Color32 {
    egui::Color32::from_rgb(color.r, color.g, color.b)
}

/// Main application UI
pub struct MoodMirrorApp {
    camera: Option<CameraManager>,
    camera_error: Option<String>,
    frames: FrameFeed,
    surface: OverlaySurface,
    presenter: Arc<Presenter>,
    session: Arc<DetectionSession>,
    camera_texture: Option<egui::TextureHandle>,
    overlay_texture: Option<egui::TextureHandle>,
    overlay_revision: u64,
    annotations: Vec<Annotation>,
}

impl MoodMirrorApp {
    pub fn new(
        camera: Result<CameraManager, String>,
        frames: FrameFeed,
        surface: OverlaySurface,
        presenter: Arc<Presenter>,
        session: Arc<DetectionSession>,
    ) -> Self {
        let (camera, camera_error) = match camera {
            Ok(camera) => (Some(camera), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            camera,
            camera_error,
            frames,
            surface,
            presenter,
            session,
            camera_texture: None,
            overlay_texture: None,
            overlay_revision: 0,
            annotations: Vec::new(),
        }
    }

    /// Pulls the latest frame, shows it and hands it to the detection loop
    fn update_camera_texture(&mut self, ctx: &egui::Context) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };
        if let Err(e) = camera.ensure_stream_open() {
            warn!("Camera stream unavailable: {}", e);
            self.camera_error = Some(e.to_string());
            self.camera = None;
            self.frames.detach();
            return;
        }

        match camera.get_current_frame() {
            Ok(frame) => {
                let color_image = egui::ColorImage::from_rgb(
                    [frame.width as usize, frame.height as usize],
                    &frame.data,
                );
                self.camera_texture =
                    Some(ctx.load_texture("camera", color_image, egui::TextureOptions::LINEAR));
                self.frames.publish(Arc::new(frame));
            }
            Err(e) => warn!("Dropped camera frame: {}", e),
        }
    }

    /// Re-uploads the overlay only when the presenter redrew it
    fn update_overlay_texture(&mut self, ctx: &egui::Context) {
        if let Some((revision, canvas)) = self.presenter.overlay_since(self.overlay_revision) {
            let image = canvas.image();
            let color_image = egui::ColorImage::from_rgba_unmultiplied(
                [image.width() as usize, image.height() as usize],
                image.as_raw(),
            );
            self.overlay_texture =
                Some(ctx.load_texture("overlay", color_image, egui::TextureOptions::LINEAR));
            self.annotations = canvas.annotations().to_vec();
            self.overlay_revision = revision;
        }
    }

    fn status_text(&self) -> Option<String> {
        if let Some(e) = &self.camera_error {
            return Some(format!("Camera unavailable: {e}"));
        }
        match self.session.models().status() {
            LoadStatus::Ready => None,
            LoadStatus::Failed(e) => Some(format!("Could not load models: {e}")),
            LoadStatus::Idle | LoadStatus::Loading => Some("Loading models…".to_string()),
        }
    }

    /// Renders the video with the overlay canvas on top of the mood background
    fn render_camera_view(&self, ctx: &egui::Context) {
        let background = to_color32(self.presenter.background_color(Instant::now()));

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(background))
            .show(ctx, |ui| {
                let available = ui.available_rect_before_wrap();
                let available_size = available.size();

                if let Some(texture) = &self.camera_texture {
                    let texture_size = texture.size_vec2();
                    let aspect_ratio = texture_size.x / texture_size.y;

                    // Fit while keeping the aspect ratio
                    let mut display_width = available_size.x;
                    let mut display_height = display_width / aspect_ratio;
                    if display_height > available_size.y {
                        display_height = available_size.y;
                        display_width = display_height * aspect_ratio;
                    }

                    let video_rect = egui::Rect::from_center_size(
                        available.center(),
                        egui::vec2(display_width, display_height),
                    );
                    self.surface.attach(DisplaySize::new(
                        display_width.round() as u32,
                        display_height.round() as u32,
                    ));

                    ui.put(
                        video_rect,
                        egui::Image::new(texture).fit_to_exact_size(video_rect.size()),
                    );
                    if let Some(overlay) = &self.overlay_texture {
                        ui.put(
                            video_rect,
                            egui::Image::new(overlay).fit_to_exact_size(video_rect.size()),
                        );
                    }

                    let painter = ui.painter();
                    for annotation in &self.annotations {
                        painter.text(
                            video_rect.min + egui::vec2(annotation.x, annotation.y),
                            egui::Align2::LEFT_TOP,
                            &annotation.text,
                            egui::FontId::proportional(ANNOTATION_SIZE),
                            egui::Color32::WHITE,
                        );
                    }
                } else {
                    self.surface.detach();
                }

                let painter = ui.painter();
                let state = self.presenter.ui_state();
                painter.text(
                    egui::pos2(available.center().x, available.min.y + 20.0),
                    egui::Align2::CENTER_TOP,
                    &state.displayed_label,
                    egui::FontId::proportional(LABEL_SIZE),
                    egui::Color32::WHITE,
                );

                if let Some(status) = self.status_text() {
                    painter.text(
                        egui::pos2(available.center().x, available.max.y - 20.0),
                        egui::Align2::CENTER_BOTTOM,
                        status,
                        egui::FontId::proportional(ANNOTATION_SIZE + 3.0),
                        egui::Color32::WHITE,
                    );
                }
            });
    }
}

impl eframe::App for MoodMirrorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.update_camera_texture(ctx);
        self.update_overlay_texture(ctx);
        self.render_camera_view(ctx);
    }
}

impl Drop for MoodMirrorApp {
    fn drop(&mut self) {
        self.session.stop();
        self.surface.detach();
        self.frames.detach();
    }
}
