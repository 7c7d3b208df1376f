// Camera module for webcam capture and the latest-frame feed

use std::sync::Arc;

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::CameraConfig;
use crate::error::{MoodMirrorError, Result};
use crate::models::Frame;

/// Publishes the most recent camera frame.
///
/// The feed is empty until the stream delivers its first frame; that first
/// frame is the "stream ready" signal the detection loop waits for.
#[derive(Clone)]
pub struct FrameFeed {
    sender: Arc<watch::Sender<Option<Arc<Frame>>>>,
}

impl Default for FrameFeed {
    fn default() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl FrameFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current frame
    pub fn publish(&self, frame: Arc<Frame>) {
        self.sender.send_replace(Some(frame));
    }

    /// Detaches the stream; ticks are skipped until the next publish
    pub fn detach(&self) {
        self.sender.send_replace(None);
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.sender.borrow().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.sender.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.sender.subscribe()
    }
}

/// Owns the webcam and decodes frames on demand
pub struct CameraManager {
    camera: Camera,
    is_streaming: bool,
}

impl CameraManager {
    /// Opens the configured camera, falling back to the next index
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let requested_format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(config.width, config.height),
                FrameFormat::YUYV,
                config.fps,
            ),
        ));

        let camera = Self::try_open_camera(config.index, requested_format)
            .or_else(|_| Self::try_open_camera(config.index + 1, requested_format))
            .map_err(|e| {
                error!(
                    "Failed to initialize camera after trying multiple indices: {}",
                    e
                );
                MoodMirrorError::CameraInit(format!(
                    "Could not open camera. Make sure:\n\
                    1. A camera is connected\n\
                    2. No other app is using it\n\
                    3. Camera permissions are granted\n\
                    Error: {e}"
                ))
            })?;

        info!("Opened camera: {}", camera.info().human_name());

        Ok(Self {
            camera,
            is_streaming: false,
        })
    }

    fn try_open_camera(index: u32, requested_format: RequestedFormat) -> Result<Camera> {
        Camera::new(CameraIndex::Index(index), requested_format).map_err(MoodMirrorError::from)
    }

    /// Opens the camera stream if not already open
    pub fn ensure_stream_open(&mut self) -> Result<()> {
        if self.is_streaming {
            return Ok(());
        }
        self.camera.open_stream().map_err(|e| {
            error!("Failed to open camera stream: {}", e);
            MoodMirrorError::from(e)
        })?;
        self.is_streaming = true;
        Ok(())
    }

    /// Gets the most recent frame (blocking)
    pub fn get_current_frame(&mut self) -> Result<Frame> {
        let frame_data = self.camera.frame().map_err(|e| {
            MoodMirrorError::FrameProcessing(format!("Failed to capture frame: {e}"))
        })?;

        let buffer = frame_data.decode_image::<RgbFormat>().map_err(|e| {
            MoodMirrorError::FrameProcessing(format!("Failed to decode frame: {e}"))
        })?;

        let (width, height) = (buffer.width(), buffer.height());
        Ok(Frame::new(buffer.into_raw(), width, height))
    }

    /// Stops the camera stream
    pub fn stop_capture(&mut self) {
        if !self.is_streaming {
            return;
        }
        self.is_streaming = false;

        if let Err(e) = self.camera.stop_stream() {
            error!("Error stopping camera stream: {}", e);
        }
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.stop_capture();
    }
}
