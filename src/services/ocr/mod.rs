pub mod debug;
pub mod engine;
pub mod parser;
pub mod pixel_ops;
pub mod preprocessing;
pub mod recognizer;
pub mod tesseract;

// Re-export main types
pub use debug::DebugSink;
pub use engine::{LineOptions, OcrEngine};
pub use preprocessing::{MaskStyle, PreprocessingService};
pub use recognizer::Recognizer;
pub use tesseract::TesseractCli;
