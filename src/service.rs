//! One-stop wiring of store, engine, dispatcher and the pipeline components.

use std::sync::Arc;

use thiserror::Error;

use crate::config::ScanConfig;
use crate::db::{DatabaseError, EntityStore, SqliteEntityStore};
use crate::pipeline::dispatch::{DispatcherConfig, JobContext, RecognitionDispatcher};
use crate::pipeline::extraction::{ExtractionError, OcrEngine};
use crate::pipeline::registration::{Catalog, FieldRegistrar, RecognitionScheduler, TemplateApplier};
use crate::pipeline::triage::ConfidenceClassifier;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),
}

pub struct FieldScanService {
    config: ScanConfig,
    store: Arc<dyn EntityStore>,
    dispatcher: Arc<RecognitionDispatcher>,
    catalog: Catalog,
    registrar: FieldRegistrar,
    applier: TemplateApplier,
    classifier: ConfidenceClassifier,
}

impl FieldScanService {
    /// Open the configured database and start the dispatcher.
    /// Must be called from inside a Tokio runtime.
    pub fn open(config: ScanConfig, engine: Arc<dyn OcrEngine>) -> Result<Self, ServiceError> {
        let path = config.database_path();
        let store = SqliteEntityStore::open(&path)?;
        tracing::info!(database = %path.display(), "{} v{} opening", crate::config::APP_NAME, crate::config::APP_VERSION);
        Ok(Self::with_store(config, Arc::new(store), engine))
    }

    /// Same wiring over an in-memory database.
    pub fn in_memory(config: ScanConfig, engine: Arc<dyn OcrEngine>) -> Result<Self, ServiceError> {
        let store = SqliteEntityStore::in_memory()?;
        Ok(Self::with_store(config, Arc::new(store), engine))
    }

    pub fn with_store(
        config: ScanConfig,
        store: Arc<dyn EntityStore>,
        engine: Arc<dyn OcrEngine>,
    ) -> Self {
        let dispatcher = Arc::new(RecognitionDispatcher::start(
            DispatcherConfig::from(&config),
            JobContext {
                store: Arc::clone(&store),
                engine,
                clamp_policy: config.clamp_policy,
            },
        ));
        let scheduler = RecognitionScheduler::new(Arc::clone(&dispatcher), config.crop_dir.clone());

        Self {
            catalog: Catalog::new(Arc::clone(&store)),
            registrar: FieldRegistrar::new(Arc::clone(&store), scheduler.clone()),
            applier: TemplateApplier::new(Arc::clone(&store), scheduler),
            classifier: ConfidenceClassifier::new(Arc::clone(&store)),
            dispatcher,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registrar(&self) -> &FieldRegistrar {
        &self.registrar
    }

    pub fn applier(&self) -> &TemplateApplier {
        &self.applier
    }

    pub fn classifier(&self) -> &ConfidenceClassifier {
        &self.classifier
    }

    pub fn dispatcher(&self) -> &Arc<RecognitionDispatcher> {
        &self.dispatcher
    }

    /// Drain queued recognition jobs and stop the workers.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

/// Tesseract engine from the configured tessdata directory and languages.
#[cfg(feature = "ocr")]
pub fn default_engine(config: &ScanConfig) -> Result<Arc<dyn OcrEngine>, ExtractionError> {
    let engine = crate::pipeline::extraction::BundledTesseract::new(&config.tessdata_dir)?
        .with_languages(&config.languages);
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "ocr"))]
pub fn default_engine(_config: &ScanConfig) -> Result<Arc<dyn OcrEngine>, ExtractionError> {
    Err(ExtractionError::OcrInit(
        "built without the `ocr` feature; supply an engine explicitly".into(),
    ))
}
