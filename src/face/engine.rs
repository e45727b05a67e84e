//! The narrow contract to the external face detection/embedding capability.
//!
//! The engine is intentionally opaque to the rest of the crate: callers see
//! `detect` and `embed`, nothing about model internals. The real
//! implementation wraps two ONNX models (a YuNet-family detector and an
//! SFace-family recognizer) through `ort`, and is only compiled with the
//! `onnx` feature; without it, engine construction always reports the
//! capability as unavailable and the search feature degrades.

use super::records::DetectedFace;
use image::DynamicImage;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The capability could not be brought up at all (missing model files,
    /// runtime failed to initialize, or built without the `onnx` feature).
    #[error("face engine unavailable: {0}")]
    Unavailable(String),

    /// Inference failed on an otherwise working engine.
    #[error("face inference failed: {0}")]
    Inference(String),
}

/// Detection and embedding over decoded images.
///
/// `detect` returning an empty list means "no face in this image" and is not
/// an error. Inference takes `&mut self` because ONNX sessions do.
pub trait FaceEngine: Send {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, EngineError>;

    fn embed(&mut self, image: &DynamicImage, face: &DetectedFace)
        -> Result<Vec<f32>, EngineError>;
}

/// Constructor the extraction adapter invokes exactly once, on first use.
pub type EngineFactory = dyn Fn() -> Result<Box<dyn FaceEngine>, EngineError> + Send + Sync;

/// Factory for the default engine given resolved model paths.
#[cfg(feature = "onnx")]
pub fn default_factory(
    detector_model: PathBuf,
    recognition_model: PathBuf,
    detection_confidence: f32,
) -> Box<EngineFactory> {
    Box::new(move || {
        let engine = onnx::OnnxEngine::load(
            &detector_model,
            &recognition_model,
            detection_confidence,
        )?;
        Ok(Box::new(engine) as Box<dyn FaceEngine>)
    })
}

#[cfg(not(feature = "onnx"))]
pub fn default_factory(
    _detector_model: PathBuf,
    _recognition_model: PathBuf,
    _detection_confidence: f32,
) -> Box<EngineFactory> {
    Box::new(|| {
        Err(EngineError::Unavailable(
            "facefind was built without the onnx feature".to_string(),
        ))
    })
}

#[cfg(feature = "onnx")]
pub mod onnx {
    use super::{DetectedFace, EngineError, FaceEngine};
    use image::{imageops::FilterType, DynamicImage, GenericImageView};
    use ndarray::Array4;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Value;
    use std::path::Path;

    /// Square input size of the detection model.
    const DETECT_SIZE: u32 = 640;
    /// Square input size of the recognition model.
    const EMBED_SIZE: u32 = 112;
    /// Columns per detection row: bbox (4) + landmarks (10) + score (1).
    const DETECT_COLS: usize = 15;

    pub struct OnnxEngine {
        detector: Session,
        recognizer: Session,
        detection_confidence: f32,
    }

    impl OnnxEngine {
        /// Load both model sessions. Any failure here means the capability
        /// is unavailable; the caller caches that outcome.
        pub fn load(
            detector_model: &Path,
            recognition_model: &Path,
            detection_confidence: f32,
        ) -> Result<Self, EngineError> {
            let detector = load_session(detector_model)?;
            let recognizer = load_session(recognition_model)?;
            log::info!(
                "face engine ready (detector: {}, recognizer: {})",
                detector_model.display(),
                recognition_model.display()
            );

            Ok(Self {
                detector,
                recognizer,
                detection_confidence,
            })
        }
    }

    fn load_session(path: &Path) -> Result<Session, EngineError> {
        if !path.exists() {
            return Err(EngineError::Unavailable(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|err| {
                EngineError::Unavailable(format!("loading {}: {err}", path.display()))
            })
    }

    /// Pack an RGB image into a planar BGR f32 array of shape [1, 3, h, w].
    fn bgr_array(image: &DynamicImage, size: u32) -> Result<Array4<f32>, EngineError> {
        let rgb = image.to_rgb8();
        let pixel_count = (size * size) as usize;
        let mut data = vec![0f32; 3 * pixel_count];

        let (b_plane, rest) = data.split_at_mut(pixel_count);
        let (g_plane, r_plane) = rest.split_at_mut(pixel_count);

        let pixels = rgb.as_raw();
        for i in 0..pixel_count {
            let idx = i * 3;
            b_plane[i] = pixels[idx + 2] as f32;
            g_plane[i] = pixels[idx + 1] as f32;
            r_plane[i] = pixels[idx] as f32;
        }

        Array4::from_shape_vec((1, 3, size as usize, size as usize), data)
            .map_err(|err| EngineError::Inference(err.to_string()))
    }

    /// Run a session on one input array and return the first f32 output
    /// tensor as (shape, data).
    fn run_single(
        session: &mut Session,
        input: Array4<f32>,
    ) -> Result<(Vec<i64>, Vec<f32>), EngineError> {
        let input_tensor =
            Value::from_array(input).map_err(|err| EngineError::Inference(err.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|err| EngineError::Inference(err.to_string()))?;

        for (_name, output) in outputs.iter() {
            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                return Ok((shape.iter().copied().collect(), data.to_vec()));
            }
        }

        Err(EngineError::Inference(
            "model produced no f32 output tensor".to_string(),
        ))
    }

    impl FaceEngine for OnnxEngine {
        fn detect(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, EngineError> {
            let (orig_width, orig_height) = image.dimensions();
            if orig_width == 0 || orig_height == 0 {
                return Ok(Vec::new());
            }

            // letterbox into the detector's square input, keeping aspect
            let max_dim = orig_width.max(orig_height);
            let scale = DETECT_SIZE as f32 / max_dim as f32;
            let new_width = ((orig_width as f32 * scale) as u32).max(1);
            let new_height = ((orig_height as f32 * scale) as u32).max(1);

            let resized = image.resize_exact(new_width, new_height, FilterType::Triangle);
            let mut canvas = DynamicImage::new_rgb8(DETECT_SIZE, DETECT_SIZE);
            let offset_x = (DETECT_SIZE - new_width) / 2;
            let offset_y = (DETECT_SIZE - new_height) / 2;
            image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

            let input = bgr_array(&canvas, DETECT_SIZE)?;
            let (shape, data) = run_single(&mut self.detector, input)?;

            if shape.last().copied() != Some(DETECT_COLS as i64) {
                return Err(EngineError::Inference(format!(
                    "unexpected detector output shape {shape:?}"
                )));
            }

            let mut faces = Vec::new();
            for row in data.chunks_exact(DETECT_COLS) {
                let score = row[DETECT_COLS - 1];
                if score < self.detection_confidence {
                    continue;
                }

                // map from canvas coordinates back to the original image
                let x = (row[0] - offset_x as f32) / scale;
                let y = (row[1] - offset_y as f32) / scale;
                let width = row[2] / scale;
                let height = row[3] / scale;

                let x = x.clamp(0.0, orig_width as f32);
                let y = y.clamp(0.0, orig_height as f32);
                let width = width.min(orig_width as f32 - x);
                let height = height.min(orig_height as f32 - y);
                if width <= 0.0 || height <= 0.0 {
                    continue;
                }

                faces.push(DetectedFace {
                    x,
                    y,
                    width,
                    height,
                    confidence: score.clamp(0.0, 1.0),
                });
            }

            Ok(faces)
        }

        fn embed(
            &mut self,
            image: &DynamicImage,
            face: &DetectedFace,
        ) -> Result<Vec<f32>, EngineError> {
            let (orig_width, orig_height) = image.dimensions();

            let x = face.x.max(0.0) as u32;
            let y = face.y.max(0.0) as u32;
            let width = (face.width as u32).clamp(1, orig_width.saturating_sub(x).max(1));
            let height = (face.height as u32).clamp(1, orig_height.saturating_sub(y).max(1));

            let crop = image
                .crop_imm(x, y, width, height)
                .resize_exact(EMBED_SIZE, EMBED_SIZE, FilterType::Triangle);

            let input = bgr_array(&crop, EMBED_SIZE)?;
            let (_shape, data) = run_single(&mut self.recognizer, input)?;

            if data.is_empty() {
                return Err(EngineError::Inference(
                    "recognizer produced an empty descriptor".to_string(),
                ));
            }

            Ok(data)
        }
    }
}
