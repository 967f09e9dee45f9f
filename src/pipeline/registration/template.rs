//! Template application and drift correction.
//!
//! Applying a template copies its field geometries onto an image and queues
//! recognition for each copy. Recentering shifts stored geometry by a signed
//! pixel delta (positive moves right/down) and re-runs recognition.

use std::sync::Arc;

use crate::db::EntityStore;
use crate::models::{FieldKey, Image, ImageField, Template};

use super::registrar::{RecognitionScheduler, Registration};
use super::RegistrationError;

/// Result of copying a template onto an image.
#[derive(Debug)]
pub struct AppliedTemplate {
    pub image: String,
    pub template: String,
    /// Template canvas differs from the image size. Geometry was copied unscaled.
    pub canvas_mismatch: bool,
    pub registrations: Vec<Registration>,
}

impl AppliedTemplate {
    pub fn field_names(&self) -> Vec<&str> {
        self.registrations.iter().map(Registration::name).collect()
    }
}

pub struct TemplateApplier {
    store: Arc<dyn EntityStore>,
    scheduler: RecognitionScheduler,
}

impl TemplateApplier {
    pub fn new(store: Arc<dyn EntityStore>, scheduler: RecognitionScheduler) -> Self {
        Self { store, scheduler }
    }

    /// Copy every field of `template` onto `image` in one transaction, then queue
    /// recognition for each copy. Existing fields with the same names are replaced.
    pub async fn apply_template(
        &self,
        image: &str,
        template: &str,
    ) -> Result<AppliedTemplate, RegistrationError> {
        let (target, blueprint) = self.require_parents(image, template)?;

        let canvas_mismatch = (blueprint.width, blueprint.height) != (target.width, target.height);
        if canvas_mismatch {
            tracing::warn!(
                image = %image,
                template = %template,
                image_size = %format!("{}x{}", target.width, target.height),
                template_size = %format!("{}x{}", blueprint.width, blueprint.height),
                "Template canvas differs from image, copying geometry unscaled"
            );
        }

        let fields: Vec<ImageField> = self
            .store
            .list_template_fields(template)?
            .iter()
            .map(|tf| ImageField::from_template(image, tf))
            .collect();
        self.store.upsert_image_fields(&fields)?;
        tracing::info!(image = %image, template = %template, count = fields.len(), "Template applied");

        let registrations = self.scheduler.schedule_all(&target, fields).await?;
        Ok(AppliedTemplate {
            image: image.to_string(),
            template: template.to_string(),
            canvas_mismatch,
            registrations,
        })
    }

    /// Permanently move one field by `(dx, dy)` and re-run its recognition.
    pub async fn recenter_field(
        &self,
        key: &FieldKey,
        dx: i32,
        dy: i32,
    ) -> Result<Registration, RegistrationError> {
        let field = self
            .store
            .get_image_field(key)?
            .ok_or_else(|| RegistrationError::not_found("image field", key))?;
        let image = self.require_image(&key.parent)?;

        let moved = field.relocated(field.geometry.shifted(dx, dy));
        self.store.upsert_image_field(&moved)?;
        tracing::info!(field = %key, dx, dy, "Field recentered");

        let ticket = self.scheduler.schedule(&image, &moved).await?;
        Ok(Registration {
            field: moved,
            ticket: Some(ticket),
        })
    }

    /// Move every field on `image` that was copied from `template`.
    pub async fn recenter_template(
        &self,
        image: &str,
        template: &str,
        dx: i32,
        dy: i32,
    ) -> Result<Vec<Registration>, RegistrationError> {
        let (target, _) = self.require_parents(image, template)?;

        let moved: Vec<ImageField> = self
            .store
            .list_template_derived_fields(image, template)?
            .iter()
            .map(|f| f.relocated(f.geometry.shifted(dx, dy)))
            .collect();
        self.store.upsert_image_fields(&moved)?;
        tracing::info!(image = %image, template = %template, dx, dy, count = moved.len(), "Template fields recentered");

        self.scheduler.schedule_all(&target, moved).await
    }

    fn require_image(&self, name: &str) -> Result<Image, RegistrationError> {
        self.store
            .get_image(name)?
            .ok_or_else(|| RegistrationError::unknown("image", name))
    }

    fn require_parents(
        &self,
        image: &str,
        template: &str,
    ) -> Result<(Image, Template), RegistrationError> {
        let target = self.require_image(image)?;
        let blueprint = self
            .store
            .get_template(template)?
            .ok_or_else(|| RegistrationError::unknown("template", template))?;
        Ok((target, blueprint))
    }
}
