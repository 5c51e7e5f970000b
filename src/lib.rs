//! Reads game HUD values (level, experience, enemy name and health) from
//! screen captures with an external Tesseract process, filters implausible
//! reads and publishes per-profile telemetry snapshots.

pub mod error;
pub mod logging;
pub mod models;
pub mod services;

pub use error::{EngineError, PixelError, Result, TelemetryError};
