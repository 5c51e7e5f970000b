pub mod config;
pub mod element;
pub mod ocr_result;
pub mod raw_image;
pub mod roi;
pub mod settings;
pub mod signal;
pub mod telemetry;

pub use element::Element;
pub use ocr_result::RecognitionResult;
pub use raw_image::{Channels, RawImage};
pub use roi::{NormalizedRoi, PixelRect};
pub use settings::{ManualLevelOverride, ProfileSettings, TimerSettings};
pub use signal::{SignalKind, SignalProfile, SignalValue, Strategy};
pub use telemetry::{EventMeta, TelemetryEvent, TelemetrySnapshot};
