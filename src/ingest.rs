//! Photo upload processing.
//!
//! Validates the bytes, stores the binary in the uploads backend, runs
//! multi-face extraction and persists the photo record with its face blob.
//! Extraction unavailability degrades to a photo without face data; it
//! never fails an upload.

use crate::eid::Eid;
use crate::events::{EventStore, Photo, PhotoCreate};
use crate::face::extractor::ExtractionError;
use crate::face::FaceSearchService;
use crate::storage::StorageManager;
use anyhow::{bail, Context};

/// Validate upload bytes and return the file extension to store under.
fn sniff_image(bytes: &[u8]) -> anyhow::Result<&'static str> {
    if bytes.is_empty() {
        bail!("empty upload");
    }

    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(kind.extension()),
        Some(kind) => bail!("unsupported upload type: {}", kind.mime_type()),
        None => bail!("unrecognized upload format"),
    }
}

pub fn ingest_photo(
    store: &EventStore,
    uploads: &dyn StorageManager,
    face: &FaceSearchService,
    event_id: &Eid,
    bytes: &[u8],
    approved: bool,
) -> anyhow::Result<Photo> {
    let ext = sniff_image(bytes)?;

    // cheap decode check before committing anything to disk
    image::load_from_memory(bytes).context("decoding upload")?;

    let file_id = format!("{}.{ext}", Eid::new());
    uploads
        .write(&file_id, bytes)
        .with_context(|| format!("storing upload {file_id}"))?;

    let face_data = match face.extractor().extract_all(bytes) {
        Ok(data) => {
            log::debug!(
                "ingest {file_id}: {} faces, {} descriptors",
                data.face_count(),
                data.entries.iter().filter(|e| e.descriptor.is_some()).count()
            );
            Some(data)
        }
        Err(ExtractionError::ModelUnavailable(reason)) => {
            log::warn!("ingest {file_id}: face extraction skipped ({reason})");
            None
        }
        Err(err) => return Err(err).context("extracting faces"),
    };

    let photo = store.add_photo(PhotoCreate {
        event_id: event_id.clone(),
        file_id: file_id.clone(),
        url: format!("/api/file/{file_id}"),
        approved,
        face_data,
    })?;

    Ok(photo)
}

/// Re-run face extraction for every stored photo of an event. Returns the
/// number of photos whose face data was rewritten.
///
/// Useful after swapping model files or ingesting under a degraded engine.
pub fn reindex_event(
    store: &EventStore,
    uploads: &dyn StorageManager,
    face: &FaceSearchService,
    event_id: &Eid,
) -> anyhow::Result<usize> {
    let photos = store.photos_for_event(event_id);
    let mut updated = 0;

    for photo in photos {
        let bytes = match uploads.read(&photo.file_id) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("reindex: cannot read {}: {err}", photo.file_id);
                continue;
            }
        };

        match face.extractor().extract_all(&bytes) {
            Ok(data) => {
                store.set_face_data(&photo.id, Some(data))?;
                updated += 1;
            }
            Err(ExtractionError::ModelUnavailable(reason)) => {
                bail!("face model unavailable, reindex aborted: {reason}");
            }
            Err(err) => {
                // one undecodable or failing photo must not stop the sweep
                log::warn!("reindex: skipping {}: {err}", photo.id);
            }
        }
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventCreate;
    use crate::face::engine::{EngineError, FaceEngine};
    use crate::face::records::DetectedFace;
    use crate::face::DescriptorExtractor;
    use crate::storage::BackendLocal;
    use image::DynamicImage;
    use std::io::Cursor;
    use std::sync::Arc;

    struct OneFaceEngine;

    impl FaceEngine for OneFaceEngine {
        fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<DetectedFace>, EngineError> {
            Ok(vec![DetectedFace {
                x: 1.0,
                y: 1.0,
                width: 4.0,
                height: 4.0,
                confidence: 0.9,
            }])
        }

        fn embed(
            &mut self,
            _image: &DynamicImage,
            _face: &DetectedFace,
        ) -> Result<Vec<f32>, EngineError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::new_rgb8(8, 8);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn setup(available: bool) -> (EventStore, BackendLocal, FaceSearchService, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(BackendLocal::new(tmp.path().to_str().unwrap()).unwrap());
        let uploads =
            BackendLocal::new(tmp.path().join("uploads").to_str().unwrap()).unwrap();
        let store = EventStore::load(backend).unwrap();

        let extractor = DescriptorExtractor::new(
            Box::new(move || {
                if available {
                    Ok(Box::new(OneFaceEngine) as Box<dyn FaceEngine>)
                } else {
                    Err(EngineError::Unavailable("down".to_string()))
                }
            }),
            5 * 1024 * 1024,
        );
        let face = FaceSearchService::new(extractor, 0.6);

        (store, uploads, face, tmp)
    }

    #[test]
    fn test_ingest_stores_bytes_and_faces() {
        let (store, uploads, face, _tmp) = setup(true);
        let (event, _) = store
            .create_event(EventCreate {
                name: "e".to_string(),
                ..Default::default()
            })
            .unwrap();

        let photo = ingest_photo(&store, &uploads, &face, &event.id, &png_bytes(), true).unwrap();

        assert!(photo.file_id.ends_with(".png"));
        assert_eq!(photo.url, format!("/api/file/{}", photo.file_id));
        assert!(uploads.exists(&photo.file_id));
        assert_eq!(photo.face_data.as_ref().unwrap().face_count(), 1);
        assert_eq!(store.searchable_faces(&event.id).len(), 1);
    }

    #[test]
    fn test_ingest_degrades_without_model() {
        let (store, uploads, face, _tmp) = setup(false);
        let (event, _) = store
            .create_event(EventCreate {
                name: "e".to_string(),
                ..Default::default()
            })
            .unwrap();

        // upload still succeeds, photo is just not searchable
        let photo = ingest_photo(&store, &uploads, &face, &event.id, &png_bytes(), true).unwrap();
        assert!(photo.face_data.is_none());
        assert!(store.searchable_faces(&event.id).is_empty());
    }

    #[test]
    fn test_ingest_rejects_non_image() {
        let (store, uploads, face, _tmp) = setup(true);
        let (event, _) = store
            .create_event(EventCreate {
                name: "e".to_string(),
                ..Default::default()
            })
            .unwrap();

        assert!(ingest_photo(&store, &uploads, &face, &event.id, b"plain text", true).is_err());
        assert!(ingest_photo(&store, &uploads, &face, &event.id, b"", true).is_err());
    }

    #[test]
    fn test_reindex_rewrites_face_data() {
        let (store, uploads, face, _tmp) = setup(true);
        let (event, _) = store
            .create_event(EventCreate {
                name: "e".to_string(),
                ..Default::default()
            })
            .unwrap();

        let photo = ingest_photo(&store, &uploads, &face, &event.id, &png_bytes(), true).unwrap();
        store.set_face_data(&photo.id, None).unwrap();
        assert!(store.searchable_faces(&event.id).is_empty());

        let updated = reindex_event(&store, &uploads, &face, &event.id).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(store.searchable_faces(&event.id).len(), 1);
    }
}
