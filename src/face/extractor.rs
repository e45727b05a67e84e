//! Descriptor extraction adapter.
//!
//! Wraps the face engine behind lazy, single-flight initialization: the
//! first caller constructs the engine under the state mutex while any
//! concurrent callers wait on the lock, and both success and failure are
//! cached. A failed warm-up is a first-class state, so every later call
//! short-circuits to `ModelUnavailable` without paying initialization cost
//! again until the process restarts.

use super::engine::{EngineError, EngineFactory, FaceEngine};
use super::records::{FaceData, FaceEntry};
use image::DynamicImage;
use std::sync::Mutex;

/// Descriptor extracted from a reference image.
///
/// Request-scoped: created per search, never persisted, dropped on every
/// exit path. Descriptors are biometric data; the calling layer must have
/// collected consent before handing the image bytes over.
#[derive(Debug, Clone)]
pub struct ReferenceDescriptor {
    pub vector: Vec<f32>,
    pub confidence: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// The bytes are not a decodable image. User-correctable.
    #[error("not a valid image: {0}")]
    InvalidImage(String),

    /// The image exceeds the configured size cap.
    #[error("image exceeds the {0} byte limit")]
    TooLarge(usize),

    /// Valid image, no extractable face. User-correctable, not a fault.
    #[error("no face detected in the image")]
    NoFaceDetected,

    /// The embedding capability failed to initialize; cached until restart.
    #[error("face model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference failed on a working engine. Unexpected.
    #[error("face engine error: {0}")]
    Engine(String),
}

enum EngineState {
    Uninitialized,
    Ready(Box<dyn FaceEngine>),
    Unavailable(String),
}

pub struct DescriptorExtractor {
    state: Mutex<EngineState>,
    factory: Box<EngineFactory>,
    max_image_bytes: usize,
}

impl DescriptorExtractor {
    pub fn new(factory: Box<EngineFactory>, max_image_bytes: usize) -> Self {
        Self {
            state: Mutex::new(EngineState::Uninitialized),
            factory,
            max_image_bytes,
        }
    }

    /// Extract a descriptor for the most prominent face of a reference
    /// image. Multi-face references are not disambiguated; the highest
    /// confidence detection wins.
    pub fn extract_reference(&self, bytes: &[u8]) -> Result<ReferenceDescriptor, ExtractionError> {
        let image = self.decode(bytes)?;

        self.with_engine(|engine| {
            let faces = map_engine_err(engine.detect(&image))?;

            let best = faces
                .into_iter()
                .max_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .ok_or(ExtractionError::NoFaceDetected)?;

            let vector = map_engine_err(engine.embed(&image, &best))?;

            Ok(ReferenceDescriptor {
                vector,
                confidence: best.confidence,
            })
        })
    }

    /// Extract every detected face with its descriptor. Used at photo
    /// ingest time; zero faces is a normal outcome here, and a face whose
    /// embedding fails is kept without a descriptor rather than aborting
    /// the whole photo.
    pub fn extract_all(&self, bytes: &[u8]) -> Result<FaceData, ExtractionError> {
        let image = self.decode(bytes)?;

        self.with_engine(|engine| {
            let faces = map_engine_err(engine.detect(&image))?;

            let mut entries = Vec::with_capacity(faces.len());
            for face in faces {
                let descriptor = match engine.embed(&image, &face) {
                    Ok(vector) => Some(vector),
                    Err(err) => {
                        log::warn!("descriptor extraction failed for one face: {err}");
                        None
                    }
                };
                entries.push(FaceEntry { face, descriptor });
            }

            Ok(FaceData { entries })
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, ExtractionError> {
        if bytes.is_empty() {
            return Err(ExtractionError::InvalidImage("empty input".to_string()));
        }
        if bytes.len() > self.max_image_bytes {
            return Err(ExtractionError::TooLarge(self.max_image_bytes));
        }

        match infer::get(bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {}
            _ => {
                return Err(ExtractionError::InvalidImage(
                    "unrecognized image format".to_string(),
                ))
            }
        }

        image::load_from_memory(bytes)
            .map_err(|err| ExtractionError::InvalidImage(err.to_string()))
    }

    /// Run `f` against the engine, initializing it first if this is the
    /// first call. Holding the mutex across initialization gives
    /// single-flight semantics; holding it across inference is required
    /// anyway because the engine needs `&mut`.
    fn with_engine<R>(
        &self,
        f: impl FnOnce(&mut dyn FaceEngine) -> Result<R, ExtractionError>,
    ) -> Result<R, ExtractionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|err| ExtractionError::Engine(format!("engine lock poisoned: {err}")))?;

        if let EngineState::Uninitialized = *state {
            *state = match (self.factory)() {
                Ok(engine) => EngineState::Ready(engine),
                Err(err) => {
                    log::warn!("face engine failed to initialize, feature degraded: {err}");
                    EngineState::Unavailable(err.to_string())
                }
            };
        }

        match &mut *state {
            EngineState::Ready(engine) => f(engine.as_mut()),
            EngineState::Unavailable(reason) => {
                Err(ExtractionError::ModelUnavailable(reason.clone()))
            }
            EngineState::Uninitialized => unreachable!("initialized above"),
        }
    }
}

fn map_engine_err<T>(result: Result<T, EngineError>) -> Result<T, ExtractionError> {
    result.map_err(|err| match err {
        EngineError::Unavailable(reason) => ExtractionError::ModelUnavailable(reason),
        EngineError::Inference(reason) => ExtractionError::Engine(reason),
    })
}
