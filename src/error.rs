//! Error types for hud-telemetry

use thiserror::Error;

/// Contract violations in the pixel library. These indicate a caller bug,
/// not a bad capture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PixelError {
    #[error("{op} requires a {expected}-channel image, got {actual}")]
    ChannelMismatch {
        op: &'static str,
        expected: u8,
        actual: u8,
    },

    #[error("{op}: size mismatch ({left_w}x{left_h} vs {right_w}x{right_h})")]
    SizeMismatch {
        op: &'static str,
        left_w: u32,
        left_h: u32,
        right_w: u32,
        right_h: u32,
    },

    #[error("buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u8),

    #[error("crop {x},{y} {w}x{h} is outside a {width}x{height} image")]
    CropOutOfBounds {
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        width: u32,
        height: u32,
    },
}

/// Failures of the external line-recognition engine. All of them are
/// recoverable and feed the per-kind backoff.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),

    #[error("OCR engine timed out after {0}ms")]
    Timeout(u64),

    #[error("OCR engine process failed: {0}")]
    Process(String),

    #[error("OCR engine IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Pixel error: {0}")]
    Pixel(#[from] PixelError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_mismatch_display() {
        let err = PixelError::ChannelMismatch {
            op: "dilate",
            expected: 1,
            actual: 3,
        };
        assert_eq!(err.to_string(), "dilate requires a 1-channel image, got 3");
    }

    #[test]
    fn test_telemetry_error_from_pixel() {
        let err: TelemetryError = PixelError::UnsupportedChannels(4).into();
        match err {
            TelemetryError::Pixel(PixelError::UnsupportedChannels(4)) => {}
            other => panic!("Expected Pixel error, got {:?}", other),
        }
    }

    #[test]
    fn test_telemetry_error_from_engine() {
        let err: TelemetryError = EngineError::Timeout(1000).into();
        assert!(err.to_string().contains("timed out after 1000ms"));
    }

    #[test]
    fn test_engine_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "tesseract");
        let engine_err: EngineError = io_err.into();
        match engine_err {
            EngineError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }
}
