//! Per-photo face records.
//!
//! A photo owns zero or more detected faces, each optionally carrying a
//! descriptor. In memory a face and its descriptor travel together as one
//! `FaceEntry`; the persisted layout keeps the historical parallel-array
//! shape `{faceCount, faces, descriptors?}` for compatibility with blobs
//! written before descriptor storage existed.

use crate::eid::Eid;
use serde::{Deserialize, Serialize};

/// A detected face bounding box in image-pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// A detected face paired with its descriptor.
///
/// `descriptor: None` is the "detected but unmatchable" state: the face is
/// visible to detection features but invisible to similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEntry {
    pub face: DetectedFace,
    pub descriptor: Option<Vec<f32>>,
}

/// All face data stored for one photo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredFaceData", into = "StoredFaceData")]
pub struct FaceData {
    pub entries: Vec<FaceEntry>,
}

impl FaceData {
    pub fn face_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether at least one face carries a usable descriptor.
    pub fn has_descriptors(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.descriptor.as_ref().map(|d| !d.is_empty()).unwrap_or(false))
    }
}

/// Persisted wire layout: faces and descriptors as parallel arrays.
///
/// Tolerated historical states on load:
/// - `descriptors` absent: extraction predates descriptor storage
/// - `descriptors` length differing from `faces`: misaligned blob
///
/// Both degrade to faces without descriptors rather than an error. An empty
/// inner vector marks a face whose embedding failed at ingest time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredFaceData {
    face_count: usize,
    faces: Vec<DetectedFace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    descriptors: Option<Vec<Vec<f32>>>,
}

impl From<StoredFaceData> for FaceData {
    fn from(stored: StoredFaceData) -> Self {
        let descriptors = match stored.descriptors {
            Some(d) if d.len() == stored.faces.len() => d.into_iter().map(Some).collect(),
            _ => vec![None; stored.faces.len()],
        };

        let entries = stored
            .faces
            .into_iter()
            .zip(descriptors)
            .map(|(face, descriptor)| FaceEntry {
                face,
                descriptor: descriptor.filter(|d| !d.is_empty()),
            })
            .collect();

        FaceData { entries }
    }
}

impl From<FaceData> for StoredFaceData {
    fn from(data: FaceData) -> Self {
        let face_count = data.entries.len();
        let any_descriptor = data.entries.iter().any(|e| e.descriptor.is_some());

        let mut faces = Vec::with_capacity(face_count);
        let mut descriptors = Vec::with_capacity(face_count);
        for entry in data.entries {
            faces.push(entry.face);
            descriptors.push(entry.descriptor.unwrap_or_default());
        }

        StoredFaceData {
            face_count,
            faces,
            descriptors: any_descriptor.then_some(descriptors),
        }
    }
}

/// A photo's searchable faces, as handed to the similarity engine.
#[derive(Debug, Clone)]
pub struct PhotoFaceRecord {
    pub photo_id: Eid,
    pub photo_url: String,
    pub entries: Vec<FaceEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(confidence: f32) -> DetectedFace {
        DetectedFace {
            x: 10.0,
            y: 20.0,
            width: 64.0,
            height: 64.0,
            confidence,
        }
    }

    #[test]
    fn test_roundtrip_with_descriptors() {
        let data = FaceData {
            entries: vec![
                FaceEntry {
                    face: face(0.9),
                    descriptor: Some(vec![1.0, 0.0, 0.0]),
                },
                FaceEntry {
                    face: face(0.8),
                    descriptor: Some(vec![0.0, 1.0, 0.0]),
                },
            ],
        };

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["faceCount"], 2);
        assert_eq!(json["faces"].as_array().unwrap().len(), 2);
        assert_eq!(json["descriptors"].as_array().unwrap().len(), 2);

        let back: FaceData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_legacy_blob_without_descriptors() {
        let json = serde_json::json!({
            "faceCount": 2,
            "faces": [
                {"x": 1.0, "y": 2.0, "width": 30.0, "height": 30.0, "confidence": 0.95},
                {"x": 50.0, "y": 60.0, "width": 40.0, "height": 40.0, "confidence": 0.85},
            ],
        });

        let data: FaceData = serde_json::from_value(json).unwrap();
        assert_eq!(data.face_count(), 2);
        assert!(!data.has_descriptors());
        assert!(data.entries.iter().all(|e| e.descriptor.is_none()));
    }

    #[test]
    fn test_misaligned_descriptors_dropped() {
        let json = serde_json::json!({
            "faceCount": 2,
            "faces": [
                {"x": 1.0, "y": 2.0, "width": 30.0, "height": 30.0, "confidence": 0.95},
                {"x": 50.0, "y": 60.0, "width": 40.0, "height": 40.0, "confidence": 0.85},
            ],
            "descriptors": [[0.5, 0.5]],
        });

        let data: FaceData = serde_json::from_value(json).unwrap();
        // faces survive, the misaligned descriptor array does not
        assert_eq!(data.face_count(), 2);
        assert!(!data.has_descriptors());
    }

    #[test]
    fn test_partial_descriptor_roundtrip() {
        let data = FaceData {
            entries: vec![
                FaceEntry {
                    face: face(0.9),
                    descriptor: Some(vec![1.0, 2.0]),
                },
                FaceEntry {
                    face: face(0.7),
                    descriptor: None,
                },
            ],
        };

        let json = serde_json::to_value(&data).unwrap();
        // alignment is kept by writing an empty slot for the missing one
        assert_eq!(json["descriptors"].as_array().unwrap().len(), 2);

        let back: FaceData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
        assert!(back.has_descriptors());
    }

    #[test]
    fn test_empty_face_data() {
        let data = FaceData::default();
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["faceCount"], 0);
        assert!(json.get("descriptors").is_none());

        let back: FaceData = serde_json::from_value(json).unwrap();
        assert_eq!(back.face_count(), 0);
    }
}
