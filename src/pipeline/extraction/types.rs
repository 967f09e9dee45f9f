use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Text and confidence for one cropped field.
///
/// `confidence` is on the engine's 0-100 scale. A zero is a valid score,
/// failures are reported through `Err` and never as a sentinel value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrFieldResult {
    pub text: String,
    pub confidence: i32,
}

impl OcrFieldResult {
    pub fn new(text: impl Into<String>, confidence: i32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// OCR engine abstraction (allows mocking for tests)
///
/// Called from blocking worker threads, possibly several at once.
pub trait OcrEngine: Send + Sync {
    /// Recognize an encoded image. `char_set` restricts the output alphabet.
    fn recognize(
        &self,
        image_bytes: &[u8],
        char_set: Option<&str>,
    ) -> Result<OcrFieldResult, ExtractionError>;
}

/// Read an image file and hand its bytes to `engine`.
pub fn recognize_file(
    engine: &dyn OcrEngine,
    path: &Path,
    char_set: Option<&str>,
) -> Result<OcrFieldResult, ExtractionError> {
    let bytes = std::fs::read(path)?;
    engine.recognize(&bytes, char_set)
}
