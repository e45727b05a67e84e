//! Cosine similarity scan over stored face descriptors.
//!
//! A deliberate linear scan: event galleries are small enough (hundreds to
//! low thousands of photos) that O(photos × faces × dims) completes within
//! interactive latency, and no index has to be kept consistent.

use super::records::{DetectedFace, PhotoFaceRecord};
use crate::eid::Eid;
use serde::Serialize;

/// A face that matched the reference descriptor.
///
/// One photo produces one match per matching face; a consumer may want to
/// highlight which specific face matched, so matches are not deduplicated
/// per photo.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceMatch {
    pub photo_id: Eid,
    pub photo_url: String,
    pub similarity: f32,
    pub face_position: DetectedFace,
}

/// Cosine similarity between two descriptors, clamped into [0.0, 1.0].
///
/// Mismatched lengths, zero vectors and non-finite results all score 0.0
/// rather than erroring: one malformed stored descriptor must never abort a
/// search, it just can't match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let score = dot / (norm_a * norm_b);
    if !score.is_finite() {
        return 0.0;
    }

    score.clamp(0.0, 1.0)
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scan every aligned (face, descriptor) pair of every candidate photo and
/// return the ranked matches scoring at least `min_similarity`.
///
/// The threshold is clamped into [0.0, 1.0]; out-of-range client values are
/// never trusted. Candidates are expected in (creation time, id) order so
/// that equal-similarity results tie-break deterministically.
pub fn search_faces(
    reference: &[f32],
    candidates: &[PhotoFaceRecord],
    min_similarity: f32,
) -> Vec<FaceMatch> {
    let threshold = min_similarity.clamp(0.0, 1.0);

    let mut matches = Vec::new();
    for record in candidates {
        for entry in &record.entries {
            let Some(descriptor) = entry.descriptor.as_deref() else {
                continue;
            };
            let similarity = cosine_similarity(reference, descriptor);
            if similarity >= threshold {
                matches.push(FaceMatch {
                    photo_id: record.photo_id.clone(),
                    photo_url: record.photo_url.clone(),
                    similarity,
                    face_position: entry.face.clone(),
                });
            }
        }
    }

    rank(&mut matches);
    matches
}

/// Order matches by similarity, best first.
///
/// The sort is stable, so equal scores keep the scan order: oldest photo
/// first, then lowest face index.
pub fn rank(matches: &mut [FaceMatch]) {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
