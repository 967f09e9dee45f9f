//! Field registration, attribute setters and recognition scheduling.

use std::path::PathBuf;
use std::sync::Arc;

use crate::db::EntityStore;
use crate::models::{
    FieldGeometry, FieldKey, Image, ImageField, ImageFieldUpdate, TemplateField,
    TemplateFieldUpdate, Thresholds,
};
use crate::pipeline::dispatch::{JobTicket, RecognitionDispatcher, RecognitionRequest};
use crate::pipeline::extraction::crop_output_path;

use super::bulk::BulkFieldLists;
use super::catalog::require_name;
use super::RegistrationError;

/// A stored image field and the recognition job queued for it, if any.
#[derive(Debug)]
pub struct Registration {
    pub field: ImageField,
    pub ticket: Option<JobTicket>,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.field.key.field
    }
}

/// Submits recognition for stored fields. Shared by the registrar and the template applier.
#[derive(Clone)]
pub struct RecognitionScheduler {
    dispatcher: Arc<RecognitionDispatcher>,
    crop_dir: Option<PathBuf>,
}

impl RecognitionScheduler {
    pub fn new(dispatcher: Arc<RecognitionDispatcher>, crop_dir: Option<PathBuf>) -> Self {
        Self {
            dispatcher,
            crop_dir,
        }
    }

    pub async fn schedule(
        &self,
        image: &Image,
        field: &ImageField,
    ) -> Result<JobTicket, RegistrationError> {
        let request = RecognitionRequest::for_field(image, field, self.crop_dir.as_deref());
        Ok(self.dispatcher.submit(request).await?)
    }

    pub async fn schedule_all(
        &self,
        image: &Image,
        fields: Vec<ImageField>,
    ) -> Result<Vec<Registration>, RegistrationError> {
        let mut registrations = Vec::with_capacity(fields.len());
        for field in fields {
            let ticket = self.schedule(image, &field).await?;
            registrations.push(Registration {
                field,
                ticket: Some(ticket),
            });
        }
        Ok(registrations)
    }

    /// Crop artifact path for a field, when it can be determined.
    pub fn artifact_path(&self, image: Option<&Image>, key: &FieldKey) -> Option<PathBuf> {
        match (image, self.crop_dir.as_deref()) {
            (Some(image), dir) => Some(crop_output_path(&image.name, &image.location, &key.field, dir)),
            (None, Some(dir)) => Some(crop_output_path(&key.parent, "", &key.field, Some(dir))),
            (None, None) => None,
        }
    }
}

pub struct FieldRegistrar {
    store: Arc<dyn EntityStore>,
    scheduler: RecognitionScheduler,
}

impl FieldRegistrar {
    pub fn new(store: Arc<dyn EntityStore>, scheduler: RecognitionScheduler) -> Self {
        Self { store, scheduler }
    }

    // ═══════════════════════════════════════════
    // Image fields
    // ═══════════════════════════════════════════

    /// Store the field and queue its recognition. Returns once the job is queued.
    pub async fn register_image_field(
        &self,
        image: &str,
        field: &str,
        geometry: FieldGeometry,
        thresholds: Thresholds,
    ) -> Result<Registration, RegistrationError> {
        let parent = self.require_image(image)?;
        let record = self.store_image_field(&parent, field, geometry, thresholds, None)?;
        let ticket = self.scheduler.schedule(&parent, &record).await?;
        Ok(Registration {
            field: record,
            ticket: Some(ticket),
        })
    }

    /// Store the field with a character restriction. Recognition waits for
    /// [`FieldRegistrar::recognize_field`].
    pub fn register_image_field_with_char_set(
        &self,
        image: &str,
        field: &str,
        geometry: FieldGeometry,
        thresholds: Thresholds,
        char_set: &str,
    ) -> Result<ImageField, RegistrationError> {
        let parent = self.require_image(image)?;
        self.store_image_field(&parent, field, geometry, thresholds, Some(char_set.to_string()))
    }

    /// All-or-nothing batch: validated and stored in one transaction, then one job per field.
    pub async fn register_image_fields_bulk(
        &self,
        image: &str,
        lists: &BulkFieldLists,
        thresholds: Thresholds,
    ) -> Result<Vec<Registration>, RegistrationError> {
        let parent = self.require_image(image)?;
        let fields: Vec<ImageField> = lists
            .parse()?
            .into_iter()
            .map(|(name, geometry)| ImageField::new(FieldKey::new(image, name), geometry, thresholds))
            .collect();

        self.store.upsert_image_fields(&fields)?;
        tracing::info!(image = %image, count = fields.len(), "Image fields registered in bulk");
        self.scheduler.schedule_all(&parent, fields).await
    }

    /// Queue recognition for an existing field with its stored geometry and char_set.
    pub async fn recognize_field(&self, key: &FieldKey) -> Result<JobTicket, RegistrationError> {
        let field = self.get_image_field(key)?;
        let parent = self.require_image(&key.parent)?;
        self.scheduler.schedule(&parent, &field).await
    }

    pub fn get_image_field(&self, key: &FieldKey) -> Result<ImageField, RegistrationError> {
        self.store
            .get_image_field(key)?
            .ok_or_else(|| RegistrationError::not_found("image field", key))
    }

    pub fn list_image_fields(&self, image: &str) -> Result<Vec<ImageField>, RegistrationError> {
        Ok(self.store.list_image_fields(image)?)
    }

    /// Change one attribute. Does not re-run recognition.
    pub fn set_image_field(
        &self,
        key: &FieldKey,
        update: &ImageFieldUpdate,
    ) -> Result<(), RegistrationError> {
        if matches!(update, ImageFieldUpdate::Width(0) | ImageFieldUpdate::Height(0)) {
            return Err(RegistrationError::Validation("width and height must be positive".into()));
        }
        if !self.store.update_image_field(key, update)? {
            return Err(RegistrationError::not_found("image field", key));
        }
        tracing::debug!(field = %key, ?update, "Image field updated");
        Ok(())
    }

    /// Delete the field record and its crop artifact.
    pub fn remove_image_field(&self, key: &FieldKey) -> Result<(), RegistrationError> {
        let image = self.store.get_image(&key.parent)?;
        if !self.store.delete_image_field(key)? {
            return Err(RegistrationError::not_found("image field", key));
        }

        if let Some(path) = self.scheduler.artifact_path(image.as_ref(), key) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Crop artifact removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove crop artifact")
                }
            }
        }
        tracing::info!(field = %key, "Image field removed");
        Ok(())
    }

    // ═══════════════════════════════════════════
    // Template fields
    // ═══════════════════════════════════════════

    pub fn register_template_field(
        &self,
        template: &str,
        field: &str,
        geometry: FieldGeometry,
        thresholds: Thresholds,
    ) -> Result<TemplateField, RegistrationError> {
        self.store_template_field(template, field, geometry, thresholds, None)
    }

    pub fn register_template_field_with_char_set(
        &self,
        template: &str,
        field: &str,
        geometry: FieldGeometry,
        thresholds: Thresholds,
        char_set: &str,
    ) -> Result<TemplateField, RegistrationError> {
        self.store_template_field(template, field, geometry, thresholds, Some(char_set.to_string()))
    }

    pub fn register_template_fields_bulk(
        &self,
        template: &str,
        lists: &BulkFieldLists,
        thresholds: Thresholds,
    ) -> Result<Vec<TemplateField>, RegistrationError> {
        self.require_template(template)?;
        let fields: Vec<TemplateField> = lists
            .parse()?
            .into_iter()
            .map(|(name, geometry)| {
                TemplateField::new(FieldKey::new(template, name), geometry, thresholds)
            })
            .collect();

        self.store.upsert_template_fields(&fields)?;
        tracing::info!(template = %template, count = fields.len(), "Template fields registered in bulk");
        Ok(fields)
    }

    pub fn get_template_field(&self, key: &FieldKey) -> Result<TemplateField, RegistrationError> {
        self.store
            .get_template_field(key)?
            .ok_or_else(|| RegistrationError::not_found("template field", key))
    }

    pub fn list_template_fields(&self, template: &str) -> Result<Vec<TemplateField>, RegistrationError> {
        Ok(self.store.list_template_fields(template)?)
    }

    pub fn set_template_field(
        &self,
        key: &FieldKey,
        update: &TemplateFieldUpdate,
    ) -> Result<(), RegistrationError> {
        if matches!(update, TemplateFieldUpdate::Width(0) | TemplateFieldUpdate::Height(0)) {
            return Err(RegistrationError::Validation("width and height must be positive".into()));
        }
        if !self.store.update_template_field(key, update)? {
            return Err(RegistrationError::not_found("template field", key));
        }
        Ok(())
    }

    pub fn remove_template_field(&self, key: &FieldKey) -> Result<(), RegistrationError> {
        if !self.store.delete_template_field(key)? {
            return Err(RegistrationError::not_found("template field", key));
        }
        tracing::info!(field = %key, "Template field removed");
        Ok(())
    }

    // ═══════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════

    fn require_image(&self, name: &str) -> Result<Image, RegistrationError> {
        self.store
            .get_image(name)?
            .ok_or_else(|| RegistrationError::unknown("image", name))
    }

    fn require_template(&self, name: &str) -> Result<(), RegistrationError> {
        match self.store.get_template(name)? {
            Some(_) => Ok(()),
            None => Err(RegistrationError::unknown("template", name)),
        }
    }

    fn store_image_field(
        &self,
        image: &Image,
        field: &str,
        geometry: FieldGeometry,
        thresholds: Thresholds,
        char_set: Option<String>,
    ) -> Result<ImageField, RegistrationError> {
        require_name("field", field)?;
        require_extent(&geometry)?;

        let record = ImageField::new(FieldKey::new(image.name.as_str(), field), geometry, thresholds)
            .with_char_set(char_set);
        self.store.upsert_image_field(&record)?;
        tracing::info!(
            image = %image.name,
            field = %field,
            x = geometry.x,
            y = geometry.y,
            width = geometry.width,
            height = geometry.height,
            "Image field registered"
        );
        Ok(record)
    }

    fn store_template_field(
        &self,
        template: &str,
        field: &str,
        geometry: FieldGeometry,
        thresholds: Thresholds,
        char_set: Option<String>,
    ) -> Result<TemplateField, RegistrationError> {
        self.require_template(template)?;
        require_name("field", field)?;
        require_extent(&geometry)?;

        let record = TemplateField::new(FieldKey::new(template, field), geometry, thresholds)
            .with_char_set(char_set);
        self.store.upsert_template_field(&record)?;
        tracing::info!(template = %template, field = %field, "Template field registered");
        Ok(record)
    }
}

fn require_extent(geometry: &FieldGeometry) -> Result<(), RegistrationError> {
    if geometry.is_degenerate() {
        return Err(RegistrationError::Validation(format!(
            "field size {}x{} must be positive",
            geometry.width, geometry.height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteEntityStore;
    use crate::models::{ClampPolicy, RecognitionStatus, Template};
    use crate::pipeline::dispatch::{DispatcherConfig, JobContext, JobOutcome};
    use crate::pipeline::extraction::MockOcrEngine;
    use std::time::Duration;

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<SqliteEntityStore>,
        engine: Arc<MockOcrEngine>,
        registrar: FieldRegistrar,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan1.png");
        image::RgbImage::from_pixel(800, 600, image::Rgb([255u8, 255, 255]))
            .save(&source)
            .unwrap();

        let store = Arc::new(SqliteEntityStore::in_memory().unwrap());
        store
            .upsert_image(&Image::new("scan1", source.to_string_lossy(), 600, 800))
            .unwrap();
        store.upsert_template(&Template::new("formA", 600, 800)).unwrap();

        let engine = Arc::new(MockOcrEngine::new("42.00", 90));
        let dispatcher = Arc::new(RecognitionDispatcher::start(
            DispatcherConfig::new(2, 16, Duration::from_secs(10)),
            JobContext {
                store: store.clone(),
                engine: engine.clone(),
                clamp_policy: ClampPolicy::Corrected,
            },
        ));
        let scheduler = RecognitionScheduler::new(dispatcher, Some(dir.path().join("crops")));
        let registrar = FieldRegistrar::new(store.clone(), scheduler);
        Fixture { dir, store, engine, registrar }
    }

    fn geometry() -> FieldGeometry {
        FieldGeometry::new(100, 500, 40, 120)
    }

    fn thresholds() -> Thresholds {
        Thresholds::new(80, 40)
    }

    #[tokio::test]
    async fn registration_stores_field_and_recognizes() {
        let fx = fixture();
        let registration = fx
            .registrar
            .register_image_field("scan1", "amount", geometry(), thresholds())
            .await
            .unwrap();
        assert_eq!(registration.name(), "amount");

        let outcome = registration.ticket.unwrap().wait().await;
        assert!(matches!(outcome, JobOutcome::Recognized { confidence: 90, .. }));
        let stored = fx.registrar.get_image_field(&FieldKey::new("scan1", "amount")).unwrap();
        assert_eq!(stored.ocr_val.as_deref(), Some("42.00"));
        assert!(fx.dir.path().join("crops").join("scan1").join("amount.png").exists());
    }

    #[tokio::test]
    async fn unknown_image_writes_nothing() {
        let fx = fixture();
        let err = fx
            .registrar
            .register_image_field("ghost", "amount", geometry(), thresholds())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownReference { kind: "image", .. }));
        assert!(fx.store.list_image_fields("ghost").unwrap().is_empty());
        assert_eq!(fx.engine.calls(), 0);
    }

    #[tokio::test]
    async fn zero_size_field_rejected() {
        let fx = fixture();
        let err = fx
            .registrar
            .register_image_field("scan1", "amount", FieldGeometry::new(0, 0, 0, 10), thresholds())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn reregistration_replaces_geometry_and_runs_again() {
        let fx = fixture();
        let first = fx
            .registrar
            .register_image_field("scan1", "amount", geometry(), thresholds())
            .await
            .unwrap();
        first.ticket.unwrap().wait().await;

        let moved = FieldGeometry::new(120, 480, 40, 100);
        let second = fx
            .registrar
            .register_image_field("scan1", "amount", moved, thresholds())
            .await
            .unwrap();
        second.ticket.unwrap().wait().await;

        let stored = fx.registrar.get_image_field(&FieldKey::new("scan1", "amount")).unwrap();
        assert_eq!(stored.geometry, moved);
        assert_eq!(fx.engine.calls(), 2);
    }

    #[tokio::test]
    async fn char_set_variant_waits_for_manual_trigger() {
        let fx = fixture();
        let field = fx
            .registrar
            .register_image_field_with_char_set("scan1", "zip", geometry(), thresholds(), "0123456789")
            .unwrap();
        assert_eq!(field.status, RecognitionStatus::Pending);
        assert_eq!(fx.engine.calls(), 0);

        let ticket = fx.registrar.recognize_field(&field.key).await.unwrap();
        ticket.wait().await;
        assert_eq!(fx.engine.char_sets_seen(), vec![Some("0123456789".to_string())]);
    }

    #[tokio::test]
    async fn bulk_registration_dispatches_one_job_each() {
        let fx = fixture();
        let lists = BulkFieldLists::new("a,b,c", "0,50,100", "0,0,0", "10,10,10", "20,20,20");
        let registrations = fx
            .registrar
            .register_image_fields_bulk("scan1", &lists, thresholds())
            .await
            .unwrap();
        assert_eq!(registrations.len(), 3);
        for r in registrations {
            r.ticket.unwrap().wait().await;
        }
        assert_eq!(fx.engine.calls(), 3);
    }

    #[tokio::test]
    async fn bulk_mismatch_writes_nothing() {
        let fx = fixture();
        let lists = BulkFieldLists::new("a,b", "0,1", "0", "10,10", "20,20");
        let err = fx
            .registrar
            .register_image_fields_bulk("scan1", &lists, thresholds())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::CountMismatch { dimension: "y", .. }));
        assert!(fx.store.list_image_fields("scan1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn setters_do_not_trigger_recognition() {
        let fx = fixture();
        let field = fx
            .registrar
            .register_image_field_with_char_set("scan1", "zip", geometry(), thresholds(), "0-9")
            .unwrap();

        fx.registrar.set_image_field(&field.key, &ImageFieldUpdate::X(7)).unwrap();
        fx.registrar
            .set_image_field(&field.key, &ImageFieldUpdate::FinalVal(Some("12345".into())))
            .unwrap();
        assert_eq!(fx.engine.calls(), 0);

        let stored = fx.registrar.get_image_field(&field.key).unwrap();
        assert_eq!(stored.geometry.x, 7);
        assert_eq!(stored.final_val.as_deref(), Some("12345"));
        assert!(fx.registrar.set_image_field(&field.key, &ImageFieldUpdate::Width(0)).is_err());
        assert!(matches!(
            fx.registrar.set_image_field(&FieldKey::new("scan1", "nope"), &ImageFieldUpdate::X(1)),
            Err(RegistrationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn removing_field_deletes_crop_artifact() {
        let fx = fixture();
        let registration = fx
            .registrar
            .register_image_field("scan1", "amount", geometry(), thresholds())
            .await
            .unwrap();
        registration.ticket.unwrap().wait().await;
        let artifact = fx.dir.path().join("crops").join("scan1").join("amount.png");
        assert!(artifact.exists());

        fx.registrar.remove_image_field(&FieldKey::new("scan1", "amount")).unwrap();
        assert!(!artifact.exists());
        assert!(fx.registrar.remove_image_field(&FieldKey::new("scan1", "amount")).is_err());
    }

    #[tokio::test]
    async fn hyphenated_names_get_separate_artifacts() {
        let fx = fixture();
        for name in ["a-b", "a"] {
            let source = fx.dir.path().join(format!("{name}.png"));
            image::RgbImage::from_pixel(800, 600, image::Rgb([255u8, 255, 255]))
                .save(&source)
                .unwrap();
            fx.store
                .upsert_image(&Image::new(name, source.to_string_lossy(), 600, 800))
                .unwrap();
        }

        for (image, field) in [("a-b", "c"), ("a", "b-c")] {
            let registration = fx
                .registrar
                .register_image_field(image, field, geometry(), thresholds())
                .await
                .unwrap();
            registration.ticket.unwrap().wait().await;
        }
        let crops = fx.dir.path().join("crops");
        let first = crops.join("a-b").join("c.png");
        let second = crops.join("a").join("b-c.png");
        assert!(first.exists());
        assert!(second.exists());

        fx.registrar.remove_image_field(&FieldKey::new("a", "b-c")).unwrap();
        assert!(!second.exists());
        assert!(first.exists());
    }

    #[tokio::test]
    async fn template_fields_never_dispatch() {
        let fx = fixture();
        fx.registrar
            .register_template_field("formA", "total", geometry(), thresholds())
            .unwrap();
        fx.registrar
            .register_template_field_with_char_set("formA", "zip", geometry(), thresholds(), "0-9")
            .unwrap();
        let lists = BulkFieldLists::new("x1,x2", "1,2", "1,2", "5,5", "5,5");
        fx.registrar
            .register_template_fields_bulk("formA", &lists, thresholds())
            .unwrap();

        assert_eq!(fx.registrar.list_template_fields("formA").unwrap().len(), 4);
        assert_eq!(fx.engine.calls(), 0);
        assert!(matches!(
            fx.registrar.register_template_field("formB", "total", geometry(), thresholds()),
            Err(RegistrationError::UnknownReference { kind: "template", .. })
        ));
    }

    #[tokio::test]
    async fn template_field_setters_and_removal() {
        let fx = fixture();
        let key = FieldKey::new("formA", "total");
        fx.registrar
            .register_template_field("formA", "total", geometry(), thresholds())
            .unwrap();

        fx.registrar
            .set_template_field(&key, &TemplateFieldUpdate::CharSet(Some("0-9".into())))
            .unwrap();
        assert_eq!(fx.registrar.get_template_field(&key).unwrap().char_set.as_deref(), Some("0-9"));

        fx.registrar.remove_template_field(&key).unwrap();
        assert!(matches!(
            fx.registrar.get_template_field(&key),
            Err(RegistrationError::NotFound { .. })
        ));
    }
}
