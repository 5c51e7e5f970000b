use crate::error::TelemetryError;
use crate::models::raw_image::RawImage;
use crate::models::roi::PixelRect;
use crate::services::ocr::pixel_ops;
use crate::services::ocr::preprocessing::PreprocessingService;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// Source of screen pixels for a profile.
///
/// Implementations own the platform capture mechanism; the tracker only
/// scales normalized regions to the reported surface size.
pub trait CaptureSource: Send + Sync {
    /// Capturable surface size of the profile, `None` when not available
    fn surface_size(&self, profile_id: &str) -> Option<(u32, u32)>;

    /// Grab a BGR region of the profile's surface
    fn grab(&self, profile_id: &str, rect: PixelRect) -> Result<RawImage, TelemetryError>;
}

/// Capture source backed by stored frames, one per profile.
///
/// Used for offline recognition of saved screenshots and in tests.
#[derive(Default)]
pub struct FrameCapture {
    frames: RwLock<HashMap<String, RawImage>>,
}

impl FrameCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_frame(&self, profile_id: &str, frame: RawImage) {
        self.frames.write().insert(profile_id.to_string(), frame);
    }

    /// Load a PNG screenshot as the frame of `profile_id`
    pub fn load_png(&self, profile_id: &str, path: &Path) -> Result<(), TelemetryError> {
        let bytes = std::fs::read(path)?;
        let frame = PreprocessingService::default().decode_png(&bytes)?;
        self.set_frame(profile_id, frame);
        Ok(())
    }

    pub fn remove_frame(&self, profile_id: &str) {
        self.frames.write().remove(profile_id);
    }
}

impl CaptureSource for FrameCapture {
    fn surface_size(&self, profile_id: &str) -> Option<(u32, u32)> {
        self.frames
            .read()
            .get(profile_id)
            .map(|f| (f.width(), f.height()))
    }

    fn grab(&self, profile_id: &str, rect: PixelRect) -> Result<RawImage, TelemetryError> {
        let frames = self.frames.read();
        let frame = frames
            .get(profile_id)
            .ok_or_else(|| TelemetryError::Capture(format!("No frame for profile {}", profile_id)))?;
        Ok(pixel_ops::crop(frame, rect.x, rect.y, rect.width, rect.height)?)
    }
}
