use std::fmt;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{ConfidenceBand, RecognitionStatus};

/// Composite identity of a field: the owning image (or template) name plus the field name.
///
/// Stored as two columns. The `parent-field` rendering is for display only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub parent: String,
    pub field: String,
}

impl FieldKey {
    pub fn new(parent: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.parent, self.field)
    }
}

/// Field rectangle in pixels, relative to the top-left corner of its canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FieldGeometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Geometry moved by a signed delta. Saturates instead of overflowing.
    pub fn shifted(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Per-field confidence cut points. `high >= low` by convention only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub high: i32,
    pub low: i32,
}

impl Thresholds {
    pub fn new(high: i32, low: i32) -> Self {
        Self { high, low }
    }

    /// `> high` is high, `(low, high]` is medium, `<= low` is low.
    pub fn band(&self, confidence: i32) -> ConfidenceBand {
        if confidence > self.high {
            ConfidenceBand::High
        } else if confidence > self.low {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

/// A named region on a registered image, plus its recognition result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageField {
    pub key: FieldKey,
    pub geometry: FieldGeometry,
    pub thresholds: Thresholds,
    pub char_set: Option<String>,
    pub ocr_val: Option<String>,
    pub final_val: Option<String>,
    pub confidence: Option<i32>,
    pub status: RecognitionStatus,
    pub last_error: Option<String>,
    /// Template this field was copied from, if any.
    pub template: Option<String>,
    pub recognized_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

impl ImageField {
    /// Fresh, unrecognized field.
    pub fn new(key: FieldKey, geometry: FieldGeometry, thresholds: Thresholds) -> Self {
        Self {
            key,
            geometry,
            thresholds,
            char_set: None,
            ocr_val: None,
            final_val: None,
            confidence: None,
            status: RecognitionStatus::Pending,
            last_error: None,
            template: None,
            recognized_at: None,
            updated_at: Utc::now().naive_utc(),
        }
    }

    pub fn with_char_set(mut self, char_set: Option<String>) -> Self {
        self.char_set = char_set;
        self
    }

    /// Copy a template field's blueprint onto `image`.
    pub fn from_template(image: &str, template_field: &TemplateField) -> Self {
        let mut field = Self::new(
            FieldKey::new(image, template_field.key.field.clone()),
            template_field.geometry,
            template_field.thresholds,
        )
        .with_char_set(template_field.char_set.clone());
        field.template = Some(template_field.key.parent.clone());
        field
    }

    /// Same field with new geometry and a cleared recognition result.
    pub fn relocated(&self, geometry: FieldGeometry) -> Self {
        Self {
            geometry,
            ocr_val: None,
            confidence: None,
            status: RecognitionStatus::Pending,
            last_error: None,
            recognized_at: None,
            updated_at: Utc::now().naive_utc(),
            ..self.clone()
        }
    }

    /// Recognition has not produced text yet (absent or empty `ocr_val`).
    pub fn is_outstanding(&self) -> bool {
        self.ocr_val.as_deref().map_or(true, str::is_empty)
    }

    /// Confidence band, or `None` while no confidence has been recorded.
    pub fn band(&self) -> Option<ConfidenceBand> {
        self.confidence.map(|c| self.thresholds.band(c))
    }
}

/// A reusable field blueprint on a template. Never carries recognition results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub key: FieldKey,
    pub geometry: FieldGeometry,
    pub thresholds: Thresholds,
    pub char_set: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl TemplateField {
    pub fn new(key: FieldKey, geometry: FieldGeometry, thresholds: Thresholds) -> Self {
        Self {
            key,
            geometry,
            thresholds,
            char_set: None,
            updated_at: Utc::now().naive_utc(),
        }
    }

    pub fn with_char_set(mut self, char_set: Option<String>) -> Self {
        self.char_set = char_set;
        self
    }
}

/// Single-attribute change to an image field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImageFieldUpdate {
    X(i32),
    Y(i32),
    Height(u32),
    Width(u32),
    CharSet(Option<String>),
    HighThresh(i32),
    LowThresh(i32),
    FinalVal(Option<String>),
}

/// Single-attribute change to a template field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateFieldUpdate {
    X(i32),
    Y(i32),
    Height(u32),
    Width(u32),
    CharSet(Option<String>),
    HighThresh(i32),
    LowThresh(i32),
}

/// Selection used when counting an image's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFilter {
    All,
    /// `ocr_val` absent or empty.
    Outstanding,
    /// Still waiting on a recognition attempt.
    Pending,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_joins_with_dash() {
        assert_eq!(FieldKey::new("scan1", "amount").to_string(), "scan1-amount");
    }

    #[test]
    fn keys_with_dashes_stay_distinct() {
        let a = FieldKey::new("a-b", "c");
        let b = FieldKey::new("a", "b-c");
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn band_boundaries_follow_field_thresholds() {
        let t = Thresholds::new(80, 40);
        assert_eq!(t.band(81), ConfidenceBand::High);
        assert_eq!(t.band(80), ConfidenceBand::Medium);
        assert_eq!(t.band(41), ConfidenceBand::Medium);
        assert_eq!(t.band(40), ConfidenceBand::Low);
        assert_eq!(t.band(0), ConfidenceBand::Low);
    }

    #[test]
    fn inverted_thresholds_still_yield_one_band() {
        let t = Thresholds::new(30, 60);
        assert_eq!(t.band(45), ConfidenceBand::High);
        assert_eq!(t.band(30), ConfidenceBand::Low);
    }

    #[test]
    fn shift_saturates() {
        let g = FieldGeometry::new(i32::MAX - 1, -5, 10, 10);
        let moved = g.shifted(10, -3);
        assert_eq!(moved.x, i32::MAX);
        assert_eq!(moved.y, -8);
        assert_eq!(moved.width, 10);
    }

    #[test]
    fn empty_ocr_value_counts_as_outstanding() {
        let mut field = ImageField::new(
            FieldKey::new("scan1", "amount"),
            FieldGeometry::new(0, 0, 10, 10),
            Thresholds::new(80, 40),
        );
        assert!(field.is_outstanding());
        field.ocr_val = Some(String::new());
        assert!(field.is_outstanding());
        field.ocr_val = Some("42.00".into());
        assert!(!field.is_outstanding());
    }

    #[test]
    fn relocated_clears_recognition_but_keeps_corrections() {
        let mut field = ImageField::new(
            FieldKey::new("scan1", "amount"),
            FieldGeometry::new(10, 10, 40, 20),
            Thresholds::new(80, 40),
        );
        field.ocr_val = Some("12".into());
        field.confidence = Some(91);
        field.status = RecognitionStatus::Complete;
        field.final_val = Some("12.00".into());

        let moved = field.relocated(FieldGeometry::new(15, 8, 40, 20));
        assert_eq!(moved.geometry.x, 15);
        assert!(moved.ocr_val.is_none());
        assert!(moved.confidence.is_none());
        assert_eq!(moved.status, RecognitionStatus::Pending);
        assert_eq!(moved.final_val.as_deref(), Some("12.00"));
    }

    #[test]
    fn from_template_records_provenance() {
        let tf = TemplateField::new(
            FieldKey::new("formA", "total"),
            FieldGeometry::new(5, 6, 7, 8),
            Thresholds::new(70, 30),
        )
        .with_char_set(Some("0123456789".into()));
        let field = ImageField::from_template("scan1", &tf);
        assert_eq!(field.key, FieldKey::new("scan1", "total"));
        assert_eq!(field.geometry, tf.geometry);
        assert_eq!(field.template.as_deref(), Some("formA"));
        assert_eq!(field.char_set.as_deref(), Some("0123456789"));
    }
}
