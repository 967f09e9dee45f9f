use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::types::{OcrEngine, OcrFieldResult};
use super::ExtractionError;

/// Bundled Tesseract OCR engine.
/// Only available when compiled with the `ocr` feature flag.
///
/// A fresh engine handle is created per call, so concurrent workers never
/// share Tesseract state.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: std::path::PathBuf,
    languages: String,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    /// Initialize with a tessdata directory. Requires `eng.traineddata`.
    pub fn new(tessdata_dir: &std::path::Path) -> Result<Self, ExtractionError> {
        if !tessdata_dir.join("eng.traineddata").exists() {
            return Err(ExtractionError::TessdataNotFound(tessdata_dir.to_path_buf()));
        }
        tracing::info!(tessdata = %tessdata_dir.display(), "Tesseract engine configured");

        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
            languages: "eng".to_string(),
        })
    }

    /// Set language(s) for OCR (e.g., "eng", "eng+fra")
    pub fn with_languages(mut self, langs: &str) -> Self {
        self.languages = langs.to_string();
        self
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn recognize(
        &self,
        image_bytes: &[u8],
        char_set: Option<&str>,
    ) -> Result<OcrFieldResult, ExtractionError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| ExtractionError::OcrInit("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata_str), Some(&self.languages))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?;

        let tess = match char_set {
            Some(chars) if !chars.is_empty() => tess
                .set_variable("tessedit_char_whitelist", chars)
                .map_err(|e| ExtractionError::OcrConfig(format!("Failed to set whitelist: {e:?}")))?,
            _ => tess,
        };

        let mut tess = tess
            .set_image_from_mem(image_bytes)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        let text = tess
            .get_text()
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        Ok(OcrFieldResult {
            text: text.trim().to_string(),
            confidence: tess.mean_text_conf().max(0),
        })
    }
}

/// Mock OCR engine for unit testing without Tesseract.
///
/// Returns scripted results in order, then falls back to the fixed
/// text/confidence. Tracks calls and peak concurrency.
pub struct MockOcrEngine {
    text: String,
    confidence: i32,
    delay: Option<Duration>,
    script: Mutex<VecDeque<Result<OcrFieldResult, String>>>,
    char_sets: Mutex<Vec<Option<String>>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: i32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            delay: None,
            script: Mutex::new(VecDeque::new()),
            char_sets: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a result for the next unscripted call.
    pub fn push_result(&self, text: &str, confidence: i32) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(OcrFieldResult::new(text, confidence)));
    }

    /// Queue a processing failure for the next unscripted call.
    pub fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// The `char_set` argument of every call so far, in call order.
    pub fn char_sets_seen(&self) -> Vec<Option<String>> {
        self.char_sets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(
        &self,
        _image_bytes: &[u8],
        char_set: Option<&str>,
    ) -> Result<OcrFieldResult, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(in_flight, Ordering::SeqCst);
        self.char_sets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(char_set.map(str::to_string));

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        self.active.fetch_sub(1, Ordering::SeqCst);

        match scripted {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(ExtractionError::OcrProcessing(message)),
            None => Ok(OcrFieldResult::new(self.text.clone(), self.confidence)),
        }
    }
}

/// Engine that can never initialize. Exercises failure paths.
pub struct FailingOcrEngine {
    message: String,
}

impl FailingOcrEngine {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl OcrEngine for FailingOcrEngine {
    fn recognize(
        &self,
        _image_bytes: &[u8],
        _char_set: Option<&str>,
    ) -> Result<OcrFieldResult, ExtractionError> {
        Err(ExtractionError::OcrInit(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::recognize_file;
    use std::sync::Arc;

    #[test]
    fn mock_ocr_returns_configured_text() {
        let engine = MockOcrEngine::new("42.00", 90);
        let result = engine.recognize(b"fake_image_bytes", None).unwrap();
        assert_eq!(result, OcrFieldResult::new("42.00", 90));
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn mock_ocr_plays_script_then_default() {
        let engine = MockOcrEngine::new("default", 50);
        engine.push_result("first", 91);
        engine.push_failure("smudged");

        assert_eq!(engine.recognize(b"x", None).unwrap().text, "first");
        assert!(matches!(
            engine.recognize(b"x", None),
            Err(ExtractionError::OcrProcessing(ref m)) if m == "smudged"
        ));
        assert_eq!(engine.recognize(b"x", None).unwrap().confidence, 50);
    }

    #[test]
    fn mock_ocr_records_char_sets() {
        let engine = MockOcrEngine::new("7", 99);
        engine.recognize(b"x", Some("0123456789")).unwrap();
        engine.recognize(b"x", None).unwrap();
        assert_eq!(engine.char_sets_seen(), vec![Some("0123456789".to_string()), None]);
    }

    #[test]
    fn mock_ocr_tracks_peak_concurrency() {
        let engine = Arc::new(MockOcrEngine::new("x", 1).with_delay(Duration::from_millis(50)));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || engine.recognize(b"x", None).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(engine.calls(), 3);
        assert!(engine.peak_concurrency() >= 2);
    }

    #[test]
    fn zero_confidence_is_a_result_not_an_error() {
        let engine = MockOcrEngine::new("", 0);
        assert_eq!(engine.recognize(b"x", None).unwrap().confidence, 0);
    }

    #[test]
    fn failing_engine_reports_init_error() {
        let engine = FailingOcrEngine::new("no tessdata");
        assert!(matches!(
            engine.recognize(b"x", None),
            Err(ExtractionError::OcrInit(ref m)) if m == "no tessdata"
        ));
    }

    #[test]
    fn recognize_file_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.png");
        std::fs::write(&path, b"png").unwrap();

        let engine = MockOcrEngine::new("ok", 80);
        assert_eq!(recognize_file(&engine, &path, None).unwrap().text, "ok");
        assert!(matches!(
            recognize_file(&engine, &dir.path().join("missing.png"), None),
            Err(ExtractionError::Io(_))
        ));
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn bundled_tesseract_rejects_missing_tessdata() {
        let dir = tempfile::tempdir().unwrap();
        let result = BundledTesseract::new(dir.path());
        assert!(matches!(result, Err(ExtractionError::TessdataNotFound(_))));
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn bundled_tesseract_handles_blank_crop() {
        let tessdata_dir = std::path::Path::new("/usr/share/tesseract-ocr/5/tessdata");
        if !tessdata_dir.join("eng.traineddata").exists() {
            return; // Skip on systems without Tesseract
        }
        let engine = BundledTesseract::new(tessdata_dir).unwrap().with_languages("eng");
        let img = image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(64, 32, image::Luma([255u8])));
        let png = crate::pipeline::extraction::encode_png(&img).unwrap();
        let result = engine.recognize(&png, Some("0123456789")).unwrap();
        assert!(result.confidence >= 0);
        assert_eq!(result.text, result.text.trim());
    }
}
