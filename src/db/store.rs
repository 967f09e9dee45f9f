//! Shared, thread-safe access to the entity tables.
//!
//! Background recognition workers and the registration API write through the
//! same store, so access is serialized behind one connection lock.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use super::repository;
use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::models::*;

/// Persistence seam for images, templates and their fields.
pub trait EntityStore: Send + Sync {
    fn upsert_image(&self, image: &Image) -> Result<(), DatabaseError>;
    fn get_image(&self, name: &str) -> Result<Option<Image>, DatabaseError>;
    fn update_image(&self, name: &str, update: &ImageUpdate) -> Result<bool, DatabaseError>;
    fn delete_image(&self, name: &str) -> Result<bool, DatabaseError>;

    fn upsert_template(&self, template: &Template) -> Result<(), DatabaseError>;
    fn get_template(&self, name: &str) -> Result<Option<Template>, DatabaseError>;
    fn update_template(&self, name: &str, update: &TemplateUpdate) -> Result<bool, DatabaseError>;
    fn delete_template(&self, name: &str) -> Result<bool, DatabaseError>;

    /// Write all fields in one transaction.
    fn upsert_image_fields(&self, fields: &[ImageField]) -> Result<(), DatabaseError>;
    fn get_image_field(&self, key: &FieldKey) -> Result<Option<ImageField>, DatabaseError>;
    fn list_image_fields(&self, image: &str) -> Result<Vec<ImageField>, DatabaseError>;
    fn list_template_derived_fields(
        &self,
        image: &str,
        template: &str,
    ) -> Result<Vec<ImageField>, DatabaseError>;
    fn count_image_fields(&self, image: &str, filter: FieldFilter) -> Result<u32, DatabaseError>;
    fn update_image_field(
        &self,
        key: &FieldKey,
        update: &ImageFieldUpdate,
    ) -> Result<bool, DatabaseError>;
    fn delete_image_field(&self, key: &FieldKey) -> Result<bool, DatabaseError>;

    /// Persist text and confidence if `geometry` still matches the stored field.
    fn record_recognition(
        &self,
        key: &FieldKey,
        geometry: &FieldGeometry,
        text: &str,
        confidence: i32,
    ) -> Result<bool, DatabaseError>;
    fn record_recognition_failure(
        &self,
        key: &FieldKey,
        geometry: &FieldGeometry,
        error: &str,
    ) -> Result<bool, DatabaseError>;

    fn upsert_template_fields(&self, fields: &[TemplateField]) -> Result<(), DatabaseError>;
    fn get_template_field(&self, key: &FieldKey) -> Result<Option<TemplateField>, DatabaseError>;
    fn list_template_fields(&self, template: &str) -> Result<Vec<TemplateField>, DatabaseError>;
    fn update_template_field(
        &self,
        key: &FieldKey,
        update: &TemplateFieldUpdate,
    ) -> Result<bool, DatabaseError>;
    fn delete_template_field(&self, key: &FieldKey) -> Result<bool, DatabaseError>;

    fn upsert_image_field(&self, field: &ImageField) -> Result<(), DatabaseError> {
        self.upsert_image_fields(std::slice::from_ref(field))
    }

    fn upsert_template_field(&self, field: &TemplateField) -> Result<(), DatabaseError> {
        self.upsert_template_fields(std::slice::from_ref(field))
    }
}

/// SQLite-backed store over a single migrated connection.
pub struct SqliteEntityStore {
    conn: Mutex<Connection>,
}

impl SqliteEntityStore {
    /// Wrap an already-migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(open_database(path)?))
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(open_memory_database()?))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

impl EntityStore for SqliteEntityStore {
    fn upsert_image(&self, image: &Image) -> Result<(), DatabaseError> {
        repository::upsert_image(&*self.conn()?, image)
    }

    fn get_image(&self, name: &str) -> Result<Option<Image>, DatabaseError> {
        repository::get_image(&*self.conn()?, name)
    }

    fn update_image(&self, name: &str, update: &ImageUpdate) -> Result<bool, DatabaseError> {
        repository::update_image(&*self.conn()?, name, update)
    }

    fn delete_image(&self, name: &str) -> Result<bool, DatabaseError> {
        repository::delete_image(&*self.conn()?, name)
    }

    fn upsert_template(&self, template: &Template) -> Result<(), DatabaseError> {
        repository::upsert_template(&*self.conn()?, template)
    }

    fn get_template(&self, name: &str) -> Result<Option<Template>, DatabaseError> {
        repository::get_template(&*self.conn()?, name)
    }

    fn update_template(&self, name: &str, update: &TemplateUpdate) -> Result<bool, DatabaseError> {
        repository::update_template(&*self.conn()?, name, update)
    }

    fn delete_template(&self, name: &str) -> Result<bool, DatabaseError> {
        repository::delete_template(&*self.conn()?, name)
    }

    fn upsert_image_fields(&self, fields: &[ImageField]) -> Result<(), DatabaseError> {
        repository::upsert_image_fields(&*self.conn()?, fields)
    }

    fn get_image_field(&self, key: &FieldKey) -> Result<Option<ImageField>, DatabaseError> {
        repository::get_image_field(&*self.conn()?, key)
    }

    fn list_image_fields(&self, image: &str) -> Result<Vec<ImageField>, DatabaseError> {
        repository::list_image_fields(&*self.conn()?, image)
    }

    fn list_template_derived_fields(
        &self,
        image: &str,
        template: &str,
    ) -> Result<Vec<ImageField>, DatabaseError> {
        repository::list_template_derived_fields(&*self.conn()?, image, template)
    }

    fn count_image_fields(&self, image: &str, filter: FieldFilter) -> Result<u32, DatabaseError> {
        repository::count_image_fields(&*self.conn()?, image, filter)
    }

    fn update_image_field(
        &self,
        key: &FieldKey,
        update: &ImageFieldUpdate,
    ) -> Result<bool, DatabaseError> {
        repository::update_image_field(&*self.conn()?, key, update)
    }

    fn delete_image_field(&self, key: &FieldKey) -> Result<bool, DatabaseError> {
        repository::delete_image_field(&*self.conn()?, key)
    }

    fn record_recognition(
        &self,
        key: &FieldKey,
        geometry: &FieldGeometry,
        text: &str,
        confidence: i32,
    ) -> Result<bool, DatabaseError> {
        repository::record_recognition(&*self.conn()?, key, geometry, text, confidence)
    }

    fn record_recognition_failure(
        &self,
        key: &FieldKey,
        geometry: &FieldGeometry,
        error: &str,
    ) -> Result<bool, DatabaseError> {
        repository::record_recognition_failure(&*self.conn()?, key, geometry, error)
    }

    fn upsert_template_fields(&self, fields: &[TemplateField]) -> Result<(), DatabaseError> {
        repository::upsert_template_fields(&*self.conn()?, fields)
    }

    fn get_template_field(&self, key: &FieldKey) -> Result<Option<TemplateField>, DatabaseError> {
        repository::get_template_field(&*self.conn()?, key)
    }

    fn list_template_fields(&self, template: &str) -> Result<Vec<TemplateField>, DatabaseError> {
        repository::list_template_fields(&*self.conn()?, template)
    }

    fn update_template_field(
        &self,
        key: &FieldKey,
        update: &TemplateFieldUpdate,
    ) -> Result<bool, DatabaseError> {
        repository::update_template_field(&*self.conn()?, key, update)
    }

    fn delete_template_field(&self, key: &FieldKey) -> Result<bool, DatabaseError> {
        repository::delete_template_field(&*self.conn()?, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn trait_is_object_safe() {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteEntityStore::in_memory().unwrap());
        store.upsert_image(&Image::new("scan1", "/a.png", 600, 800)).unwrap();
        assert!(store.get_image("scan1").unwrap().is_some());
    }

    #[test]
    fn single_field_upsert_goes_through_batch_path() {
        let store = SqliteEntityStore::in_memory().unwrap();
        let field = ImageField::new(
            FieldKey::new("scan1", "amount"),
            FieldGeometry::new(1, 2, 3, 4),
            Thresholds::new(80, 40),
        );
        store.upsert_image_field(&field).unwrap();
        assert_eq!(store.list_image_fields("scan1").unwrap().len(), 1);
    }

    #[test]
    fn store_is_shareable_across_threads() {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteEntityStore::in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let field = ImageField::new(
                        FieldKey::new("scan1", format!("f{i}")),
                        FieldGeometry::new(0, 0, 5, 5),
                        Thresholds::new(80, 40),
                    );
                    store.upsert_image_field(&field).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.count_image_fields("scan1", FieldFilter::All).unwrap(), 4);
    }

    #[test]
    fn file_store_reopens_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fieldscan.db");
        {
            let store = SqliteEntityStore::open(&path).unwrap();
            store.upsert_template(&Template::new("formA", 600, 800)).unwrap();
        }
        let store = SqliteEntityStore::open(&path).unwrap();
        assert_eq!(store.get_template("formA").unwrap().unwrap().width, 800);
    }
}
