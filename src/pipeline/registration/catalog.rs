//! Image and template records.

use std::sync::Arc;

use crate::db::EntityStore;
use crate::models::{Image, ImageUpdate, Template, TemplateUpdate};
use crate::pipeline::extraction::{measure_source, resolve_location};

use super::RegistrationError;

pub struct Catalog {
    store: Arc<dyn EntityStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Register (or replace) an image after checking the claimed size against the file.
    pub fn register_image(
        &self,
        name: &str,
        location: &str,
        height: u32,
        width: u32,
    ) -> Result<Image, RegistrationError> {
        require_name("image", name)?;
        let measured = measure_source(&resolve_location(location))?;
        if measured != (width, height) {
            return Err(RegistrationError::DimensionMismatch {
                provided: (width, height),
                measured,
            });
        }

        let image = Image::new(name, location, height, width);
        self.store.upsert_image(&image)?;
        tracing::info!(image = %name, location = %location, width, height, "Image registered");
        Ok(image)
    }

    pub fn get_image(&self, name: &str) -> Result<Image, RegistrationError> {
        self.store
            .get_image(name)?
            .ok_or_else(|| RegistrationError::not_found("image", name))
    }

    pub fn set_image(&self, name: &str, update: &ImageUpdate) -> Result<(), RegistrationError> {
        if !self.store.update_image(name, update)? {
            return Err(RegistrationError::not_found("image", name));
        }
        tracing::debug!(image = %name, ?update, "Image updated");
        Ok(())
    }

    /// Delete the image record. Its fields stay queryable.
    pub fn remove_image(&self, name: &str) -> Result<(), RegistrationError> {
        if !self.store.delete_image(name)? {
            return Err(RegistrationError::not_found("image", name));
        }
        tracing::info!(image = %name, "Image removed");
        Ok(())
    }

    pub fn register_template(
        &self,
        name: &str,
        height: u32,
        width: u32,
    ) -> Result<Template, RegistrationError> {
        require_name("template", name)?;
        let template = Template::new(name, height, width);
        self.store.upsert_template(&template)?;
        tracing::info!(template = %name, width, height, "Template registered");
        Ok(template)
    }

    pub fn get_template(&self, name: &str) -> Result<Template, RegistrationError> {
        self.store
            .get_template(name)?
            .ok_or_else(|| RegistrationError::not_found("template", name))
    }

    pub fn set_template(&self, name: &str, update: &TemplateUpdate) -> Result<(), RegistrationError> {
        if !self.store.update_template(name, update)? {
            return Err(RegistrationError::not_found("template", name));
        }
        Ok(())
    }

    pub fn remove_template(&self, name: &str) -> Result<(), RegistrationError> {
        if !self.store.delete_template(name)? {
            return Err(RegistrationError::not_found("template", name));
        }
        tracing::info!(template = %name, "Template removed");
        Ok(())
    }
}

pub(crate) fn require_name(kind: &str, name: &str) -> Result<(), RegistrationError> {
    if name.trim().is_empty() {
        return Err(RegistrationError::Validation(format!("{kind} name must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteEntityStore;

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(SqliteEntityStore::in_memory().unwrap()))
    }

    fn write_png(dir: &std::path::Path, width: u32, height: u32) -> String {
        let path = dir.join("scan1.png");
        image::RgbImage::from_pixel(width, height, image::Rgb([0u8, 0, 0]))
            .save(&path)
            .unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn register_image_with_matching_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_png(dir.path(), 80, 60);
        let catalog = catalog();

        let image = catalog.register_image("scan1", &location, 60, 80).unwrap();
        assert_eq!(image.width, 80);
        assert_eq!(catalog.get_image("scan1").unwrap().location, location);
    }

    #[test]
    fn file_scheme_locations_are_measured() {
        let dir = tempfile::tempdir().unwrap();
        let location = format!("file://{}", write_png(dir.path(), 80, 60));
        assert!(catalog().register_image("scan1", &location, 60, 80).is_ok());
    }

    #[test]
    fn mismatched_dimensions_name_both_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_png(dir.path(), 80, 60);
        let catalog = catalog();

        let err = catalog.register_image("scan1", &location, 80, 60).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::DimensionMismatch { provided: (60, 80), measured: (80, 60) }
        ));
        assert!(err.is_validation());
        assert!(matches!(catalog.get_image("scan1"), Err(RegistrationError::NotFound { .. })));
    }

    #[test]
    fn unreadable_source_is_decode_error() {
        let err = catalog().register_image("scan1", "/nonexistent/scan.png", 1, 1).unwrap_err();
        assert!(matches!(err, RegistrationError::Decode { .. }));
    }

    #[test]
    fn image_setters_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_png(dir.path(), 80, 60);
        let catalog = catalog();
        catalog.register_image("scan1", &location, 60, 80).unwrap();

        catalog.set_image("scan1", &ImageUpdate::Location("/moved.png".into())).unwrap();
        assert_eq!(catalog.get_image("scan1").unwrap().location, "/moved.png");
        assert!(matches!(
            catalog.set_image("nope", &ImageUpdate::Width(1)),
            Err(RegistrationError::NotFound { entity_type: "image", .. })
        ));

        catalog.remove_image("scan1").unwrap();
        assert!(catalog.remove_image("scan1").is_err());
    }

    #[test]
    fn template_lifecycle() {
        let catalog = catalog();
        catalog.register_template("formA", 600, 800).unwrap();
        catalog.set_template("formA", &TemplateUpdate::Height(610)).unwrap();
        assert_eq!(catalog.get_template("formA").unwrap().height, 610);
        catalog.remove_template("formA").unwrap();
        assert!(matches!(catalog.get_template("formA"), Err(RegistrationError::NotFound { .. })));
    }

    #[test]
    fn blank_names_rejected() {
        assert!(matches!(
            catalog().register_template("  ", 1, 1),
            Err(RegistrationError::Validation(_))
        ));
    }
}
