use crate::error::EngineError;
use async_trait::async_trait;
use std::time::Duration;

/// Per-call options for single-line recognition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOptions {
    pub whitelist: Option<String>,
    /// Page segmentation mode, 7 = single text line
    pub psm: u8,
    /// Engine mode, 3 = default
    pub oem: u8,
    pub timeout: Duration,
}

impl Default for LineOptions {
    fn default() -> Self {
        Self {
            whitelist: None,
            psm: 7,
            oem: 3,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl LineOptions {
    pub fn with_whitelist(mut self, whitelist: Option<&str>) -> Self {
        self.whitelist = whitelist.map(str::to_string);
        self
    }
}

/// OCR Engine trait - abstraction over the external line recognizer
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize a single line of text from a PNG image
    async fn recognize_line(&self, png: &[u8], options: &LineOptions) -> Result<String, EngineError>;

    /// Engine version string, doubles as an availability probe
    async fn version(&self) -> Result<String, EngineError>;

    /// Check if the OCR engine is available
    async fn is_available(&self) -> bool {
        self.version().await.is_ok()
    }
}
