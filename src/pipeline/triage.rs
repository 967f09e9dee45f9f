//! Confidence triage and completion predicates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::EntityStore;
use crate::models::{ConfidenceBand, FieldFilter, FieldKey, ImageField};
use crate::pipeline::registration::RegistrationError;

/// Field names per confidence band, each ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceBuckets {
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
}

impl ConfidenceBuckets {
    /// Bucket fields by their own thresholds. Fields without a confidence are skipped.
    pub fn partition(fields: &[ImageField]) -> Self {
        let mut buckets = Self::default();
        for field in fields {
            let name = field.key.field.clone();
            match field.band() {
                Some(ConfidenceBand::High) => buckets.high.push(name),
                Some(ConfidenceBand::Medium) => buckets.medium.push(name),
                Some(ConfidenceBand::Low) => buckets.low.push(name),
                None => {}
            }
        }
        buckets.high.sort();
        buckets.medium.sort();
        buckets.low.sort();
        buckets
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Recognition counts for one image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionProgress {
    pub total: u32,
    /// No text yet, including failed fields and blank results.
    pub outstanding: u32,
    /// Not yet attempted, or re-queued after a move.
    pub pending: u32,
    pub failed: u32,
}

impl RecognitionProgress {
    /// Every field has non-empty text.
    pub fn is_complete(&self) -> bool {
        self.outstanding == 0
    }

    /// Every field has had a recognition attempt that completed or failed.
    pub fn is_settled(&self) -> bool {
        self.pending == 0
    }
}

pub struct ConfidenceClassifier {
    store: Arc<dyn EntityStore>,
}

impl ConfidenceClassifier {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn classify_fields(&self, image: &str) -> Result<ConfidenceBuckets, RegistrationError> {
        let fields = self.store.list_image_fields(image)?;
        let buckets = ConfidenceBuckets::partition(&fields);
        tracing::debug!(
            image = %image,
            high = buckets.high.len(),
            medium = buckets.medium.len(),
            low = buckets.low.len(),
            unscored = fields.len() - buckets.len(),
            "Fields classified"
        );
        Ok(buckets)
    }

    pub fn high_confidence_fields(&self, image: &str) -> Result<Vec<String>, RegistrationError> {
        Ok(self.classify_fields(image)?.high)
    }

    pub fn medium_confidence_fields(&self, image: &str) -> Result<Vec<String>, RegistrationError> {
        Ok(self.classify_fields(image)?.medium)
    }

    pub fn low_confidence_fields(&self, image: &str) -> Result<Vec<String>, RegistrationError> {
        Ok(self.classify_fields(image)?.low)
    }

    pub fn recognition_progress(&self, image: &str) -> Result<RecognitionProgress, RegistrationError> {
        Ok(RecognitionProgress {
            total: self.store.count_image_fields(image, FieldFilter::All)?,
            outstanding: self.store.count_image_fields(image, FieldFilter::Outstanding)?,
            pending: self.store.count_image_fields(image, FieldFilter::Pending)?,
            failed: self.store.count_image_fields(image, FieldFilter::Failed)?,
        })
    }

    pub fn is_field_outstanding(&self, key: &FieldKey) -> Result<bool, RegistrationError> {
        let field = self
            .store
            .get_image_field(key)?
            .ok_or_else(|| RegistrationError::not_found("image field", key))?;
        Ok(field.is_outstanding())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteEntityStore;
    use crate::models::{FieldGeometry, Thresholds};

    fn scored(name: &str, confidence: Option<i32>, high: i32, low: i32) -> ImageField {
        let mut field = ImageField::new(
            FieldKey::new("scan1", name),
            FieldGeometry::new(0, 0, 10, 10),
            Thresholds::new(high, low),
        );
        field.confidence = confidence;
        field.ocr_val = confidence.map(|_| "text".to_string());
        field
    }

    #[test]
    fn partition_uses_each_fields_thresholds() {
        let fields = vec![
            scored("a", Some(90), 80, 40),
            scored("b", Some(90), 95, 40),
            scored("c", Some(10), 80, 40),
            scored("d", None, 80, 40),
            scored("e", Some(80), 80, 40),
        ];
        let buckets = ConfidenceBuckets::partition(&fields);
        assert_eq!(buckets.high, vec!["a"]);
        assert_eq!(buckets.medium, vec!["b", "e"]);
        assert_eq!(buckets.low, vec!["c"]);
        assert_eq!(buckets.len(), 4);
    }

    #[test]
    fn buckets_are_disjoint_and_cover_scored_fields() {
        let fields: Vec<ImageField> = (0..30)
            .map(|i| scored(&format!("f{i:02}"), (i % 4 != 0).then_some(i * 3), 60, 20))
            .collect();
        let buckets = ConfidenceBuckets::partition(&fields);

        let scored_count = fields.iter().filter(|f| f.confidence.is_some()).count();
        assert_eq!(buckets.len(), scored_count);
        let mut all: Vec<&String> = buckets.high.iter().chain(&buckets.medium).chain(&buckets.low).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), scored_count);
    }

    #[test]
    fn classifier_reads_through_store() {
        let store = Arc::new(SqliteEntityStore::in_memory().unwrap());
        store
            .upsert_image_fields(&[
                scored("amount", Some(90), 80, 40),
                scored("note", Some(10), 80, 40),
                scored("pending", None, 80, 40),
            ])
            .unwrap();
        let classifier = ConfidenceClassifier::new(store);

        assert_eq!(classifier.high_confidence_fields("scan1").unwrap(), vec!["amount"]);
        assert!(classifier.medium_confidence_fields("scan1").unwrap().is_empty());
        assert_eq!(classifier.low_confidence_fields("scan1").unwrap(), vec!["note"]);
        assert!(classifier.classify_fields("other").unwrap().is_empty());
    }

    #[test]
    fn progress_counts_outstanding_and_failed() {
        let store = Arc::new(SqliteEntityStore::in_memory().unwrap());
        let ok = scored("ok", None, 80, 40);
        let bad = scored("bad", None, 80, 40);
        let waiting = scored("waiting", None, 80, 40);
        store.upsert_image_fields(&[ok.clone(), bad.clone(), waiting.clone()]).unwrap();
        store.record_recognition(&ok.key, &ok.geometry, "1", 99).unwrap();
        store.record_recognition_failure(&bad.key, &bad.geometry, "boom").unwrap();
        let classifier = ConfidenceClassifier::new(store.clone());

        let progress = classifier.recognition_progress("scan1").unwrap();
        assert_eq!(
            progress,
            RecognitionProgress { total: 3, outstanding: 2, pending: 1, failed: 1 }
        );
        assert!(!progress.is_complete());
        assert!(!progress.is_settled());

        assert!(!classifier.is_field_outstanding(&ok.key).unwrap());
        assert!(classifier.is_field_outstanding(&waiting.key).unwrap());
        assert!(matches!(
            classifier.is_field_outstanding(&FieldKey::new("scan1", "nope")),
            Err(RegistrationError::NotFound { .. })
        ));
    }

    #[test]
    fn blank_result_settles_without_completing() {
        let store = Arc::new(SqliteEntityStore::in_memory().unwrap());
        let blank = scored("blank", None, 80, 40);
        store.upsert_image_field(&blank).unwrap();
        store.record_recognition(&blank.key, &blank.geometry, "", 0).unwrap();
        let classifier = ConfidenceClassifier::new(store);

        let progress = classifier.recognition_progress("scan1").unwrap();
        assert_eq!(
            progress,
            RecognitionProgress { total: 1, outstanding: 1, pending: 0, failed: 0 }
        );
        assert!(!progress.is_complete());
        assert!(progress.is_settled());
        assert_eq!(classifier.low_confidence_fields("scan1").unwrap(), vec!["blank"]);
    }

    #[test]
    fn image_without_fields_is_complete() {
        let progress = RecognitionProgress::default();
        assert!(progress.is_complete());
        assert!(progress.is_settled());
    }
}
