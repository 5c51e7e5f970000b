pub mod capture;
pub mod config;
pub mod guard;
pub mod ocr;
pub mod ocr_tracker;
pub mod scheduler;
pub mod store;

pub use capture::{CaptureSource, FrameCapture};
pub use config::ConfigManager;
pub use guard::{LevelUpState, PlausibilityGuard, Rejection};
pub use ocr_tracker::{OcrTracker, TickOutcome};
pub use scheduler::{EntryStatus, ScheduleKey, Scheduler, SchedulerHandle, Tick};
pub use store::{ApplyOutcome, TelemetryStore};
