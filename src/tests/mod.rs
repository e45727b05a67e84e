//! Integration-style tests.
//!
//! Each test builds an isolated app in its own temp directory with a
//! scripted face engine, so no model files and no real data are touched.


use crate::config::Config;
use crate::events::EventStore;
use crate::face::engine::{EngineError, EngineFactory, FaceEngine};
use crate::face::records::DetectedFace;
use crate::face::{DescriptorExtractor, FaceSearchService};
use crate::storage::BackendLocal;
use crate::web::AppState;
use image::DynamicImage;
use std::io::Cursor;
use std::sync::{Arc, RwLock};

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Engine that reports one face with a fixed descriptor for every image,
/// or no face at all when `descriptor` is `None`.
pub struct StubEngine {
    pub descriptor: Option<Vec<f32>>,
}

impl FaceEngine for StubEngine {
    fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<DetectedFace>, EngineError> {
        Ok(match &self.descriptor {
            Some(_) => vec![DetectedFace {
                x: 2.0,
                y: 2.0,
                width: 4.0,
                height: 4.0,
                confidence: 0.97,
            }],
            None => Vec::new(),
        })
    }

    fn embed(
        &mut self,
        _image: &DynamicImage,
        _face: &DetectedFace,
    ) -> Result<Vec<f32>, EngineError> {
        self.descriptor
            .clone()
            .ok_or_else(|| EngineError::Inference("no face to embed".to_string()))
    }
}

pub fn stub_factory(descriptor: Option<Vec<f32>>) -> Box<EngineFactory> {
    Box::new(move || {
        Ok(Box::new(StubEngine {
            descriptor: descriptor.clone(),
        }) as Box<dyn FaceEngine>)
    })
}

pub fn png_bytes() -> Vec<u8> {
    let img = DynamicImage::new_rgb8(8, 8);
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Creates an isolated AppState using a unique temp directory.
/// Each test gets its own directory so parallel tests never collide,
/// and no real data is touched.
pub fn create_app(factory: Box<EngineFactory>) -> (Arc<AppState>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let base = tmp.path().to_str().unwrap().to_string();

    let mut config = Config::load_with(&base).expect("failed to load config");
    config.admin_token = ADMIN_TOKEN.to_string();

    let uploads_dir = tmp.path().join("uploads");
    let uploads = Arc::new(BackendLocal::new(uploads_dir.to_str().unwrap()).expect("uploads dir"));

    let records = Arc::new(BackendLocal::new(&base).expect("records dir"));
    let store = Arc::new(EventStore::load(records).expect("load store"));

    let extractor = DescriptorExtractor::new(factory, config.face_search.max_reference_bytes);
    let face = Arc::new(FaceSearchService::new(
        extractor,
        config.face_search.default_min_similarity,
    ));

    let state = Arc::new(AppState {
        config: Arc::new(RwLock::new(config)),
        store,
        uploads,
        face,
        uploads_dir,
    });

    (state, tmp)
}
