//! One crop → recognize → persist unit of work.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::EntityStore;
use crate::models::{ClampPolicy, FieldGeometry, FieldKey, Image, ImageField};
use crate::pipeline::extraction::{
    crop_output_path, crop_to_file, resolve_location, ExtractionError, OcrEngine, OcrFieldResult,
};

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const COMMITTING: u8 = 2;
const DONE: u8 = 3;
const CANCELLED: u8 = 4;

/// Everything a worker needs to recognize one field, captured at submit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionRequest {
    pub key: FieldKey,
    /// Geometry as registered. Results only persist while it is still current.
    pub geometry: FieldGeometry,
    pub char_set: Option<String>,
    pub source: PathBuf,
    pub output: PathBuf,
}

impl RecognitionRequest {
    pub fn for_field(image: &Image, field: &ImageField, crop_dir: Option<&Path>) -> Self {
        Self {
            key: field.key.clone(),
            geometry: field.geometry,
            char_set: field.char_set.clone(),
            source: resolve_location(&image.location),
            output: crop_output_path(&image.name, &image.location, &field.key.field, crop_dir),
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum JobOutcome {
    Recognized { text: String, confidence: i32 },
    /// The field was moved, re-registered or removed while the job ran.
    Superseded,
    Failed { error: String },
    Cancelled,
    TimedOut,
}

/// Shared lifecycle flag for a job. Cloned into the ticket and the worker.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    state: Arc<AtomicU8>,
}

impl JobHandle {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Arc::new(AtomicU8::new(QUEUED)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. Returns false once the job has started persisting.
    pub fn cancel(&self) -> bool {
        self.transition(QUEUED, CANCELLED) || self.transition(RUNNING, CANCELLED)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::SeqCst) == DONE
    }

    fn begin(&self) -> bool {
        self.transition(QUEUED, RUNNING)
    }

    /// Point of no return: after this, cancellation is refused.
    fn commit(&self) -> bool {
        self.transition(RUNNING, COMMITTING)
    }

    fn finish(&self) {
        self.transition(COMMITTING, DONE);
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Collaborators shared by every job.
pub struct JobContext {
    pub store: Arc<dyn EntityStore>,
    pub engine: Arc<dyn OcrEngine>,
    pub clamp_policy: ClampPolicy,
}

/// Run one job to completion on the current (blocking) thread.
///
/// Cancellation is honored before cropping, before recognition and before
/// persisting. Errors end up in the field record, never in the caller.
pub fn run_job(ctx: &JobContext, request: &RecognitionRequest, handle: &JobHandle) -> JobOutcome {
    if !handle.begin() {
        return JobOutcome::Cancelled;
    }

    let result = crop_and_recognize(ctx, request, handle);
    if !handle.commit() {
        tracing::debug!(job_id = %handle.id(), field = %request.key, "Discarding result of cancelled job");
        return JobOutcome::Cancelled;
    }

    let outcome = persist(ctx, request, handle, result);
    handle.finish();
    outcome
}

fn crop_and_recognize(
    ctx: &JobContext,
    request: &RecognitionRequest,
    handle: &JobHandle,
) -> Result<OcrFieldResult, ExtractionError> {
    let region = crop_to_file(
        &request.source,
        request.geometry.into(),
        &request.output,
        ctx.clamp_policy,
    )?;
    if handle.is_cancelled() {
        return Err(ExtractionError::Cancelled);
    }
    ctx.engine.recognize(&region.png, request.char_set.as_deref())
}

fn persist(
    ctx: &JobContext,
    request: &RecognitionRequest,
    handle: &JobHandle,
    result: Result<OcrFieldResult, ExtractionError>,
) -> JobOutcome {
    match result {
        Ok(ocr) => {
            match ctx
                .store
                .record_recognition(&request.key, &request.geometry, &ocr.text, ocr.confidence)
            {
                Ok(true) => {
                    tracing::info!(
                        job_id = %handle.id(),
                        field = %request.key,
                        confidence = ocr.confidence,
                        "Field recognized"
                    );
                    JobOutcome::Recognized {
                        text: ocr.text,
                        confidence: ocr.confidence,
                    }
                }
                Ok(false) => {
                    tracing::info!(job_id = %handle.id(), field = %request.key, "Field changed during recognition, result dropped");
                    JobOutcome::Superseded
                }
                Err(e) => {
                    tracing::error!(job_id = %handle.id(), field = %request.key, error = %e, "Failed to store recognition");
                    JobOutcome::Failed { error: e.to_string() }
                }
            }
        }
        Err(e) => {
            let error = e.to_string();
            tracing::warn!(job_id = %handle.id(), field = %request.key, error = %error, "Recognition failed");
            record_failure(ctx, request, &error);
            JobOutcome::Failed { error }
        }
    }
}

/// Mark the field failed under the same geometry guard as a success.
pub(crate) fn record_failure(ctx: &JobContext, request: &RecognitionRequest, error: &str) {
    if let Err(e) = ctx
        .store
        .record_recognition_failure(&request.key, &request.geometry, error)
    {
        tracing::error!(field = %request.key, error = %e, "Failed to store recognition failure");
    }
}
