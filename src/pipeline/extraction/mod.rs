pub mod crop;
pub mod ocr;
pub mod types;

pub use crop::*;
pub use ocr::*;
pub use types::*;

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("PNG encoding failed: {0}")]
    Encode(String),

    #[error("Crop region {rect} is empty after clamping to {max_width}x{max_height}")]
    EmptyRegion {
        rect: CropRect,
        max_width: u32,
        max_height: u32,
    },

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("Tesseract OCR configuration error: {0}")]
    OcrConfig(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Tessdata not found at: {0}")]
    TessdataNotFound(PathBuf),

    #[error("Recognition job cancelled")]
    Cancelled,

    #[error("Recognition timed out after {0}s")]
    TimedOut(u64),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
