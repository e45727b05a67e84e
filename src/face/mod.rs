//! Face detection and descriptor similarity search.
//!
//! This module is the search core of facefind:
//!
//! - `records`: per-photo face/descriptor records and their persisted layout
//! - `similarity`: cosine similarity scan with threshold filtering and ranking
//! - `engine`: the narrow contract to the detection/embedding capability,
//!   with an ONNX-backed implementation behind the `onnx` feature
//! - `extractor`: descriptor extraction adapter with cached single-flight
//!   engine initialization
//! - `service`: high-level search orchestration and the error taxonomy

pub mod engine;
pub mod extractor;
pub mod records;
pub mod service;
pub mod similarity;

pub use extractor::{DescriptorExtractor, ExtractionError, ReferenceDescriptor};
pub use records::{DetectedFace, FaceData, FaceEntry, PhotoFaceRecord};
pub use service::{FaceSearchService, SearchError};
pub use similarity::{cosine_similarity, search_faces, FaceMatch};
