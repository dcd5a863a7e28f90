//! Gallery and photo file handling.
//!
//! JSON files stand in for the storage and detector collaborators:
//! the gallery file supplies persisted profiles and accepts updated
//! counters/thresholds back; a photo file supplies per-face bounding
//! boxes and precomputed embeddings, optionally with a face-crop
//! image path for quality assessment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use rollcall_core::config::QualityConfig;
use rollcall_core::quality;
use rollcall_core::types::{BoundingBox, Embedding, FaceObservation, QualityMetrics};
use rollcall_core::IdentityProfile;

/// Persisted gallery: the full set of enrolled profiles.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GalleryFile {
    pub profiles: Vec<IdentityProfile>,
}

impl GalleryFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading gallery {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing gallery {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("writing gallery {}", path.display()))?;
        Ok(())
    }
}

/// One detected face as supplied by the detector/embedding
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceInput {
    pub bbox: BoundingBox,
    pub embeddings: BTreeMap<String, Embedding>,
    /// Optional path to a face-crop image, used to compute quality
    /// metrics when the collaborator did not supply them.
    #[serde(default)]
    pub crop: Option<PathBuf>,
    /// Precomputed quality metrics, if the collaborator has them.
    #[serde(default)]
    pub quality: Option<QualityMetrics>,
}

/// One photo's worth of detections.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PhotoFile {
    pub faces: Vec<FaceInput>,
}

impl PhotoFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading photo {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing photo {}", path.display()))
    }

    /// Convert to engine observations, assessing quality from the crop
    /// image where provided. An unreadable crop degrades to neutral
    /// quality; it never fails the photo.
    pub fn observations(&self, quality_cfg: &QualityConfig) -> Vec<FaceObservation> {
        self.faces
            .iter()
            .enumerate()
            .map(|(face_index, input)| {
                let quality = match (&input.quality, &input.crop) {
                    (Some(q), _) => q.clone(),
                    (None, Some(path)) => assess_crop(path, &input.bbox, quality_cfg),
                    (None, None) => QualityMetrics::neutral(),
                };
                FaceObservation {
                    face_index,
                    bbox: input.bbox.clone(),
                    embeddings: input.embeddings.clone(),
                    quality,
                }
            })
            .collect()
    }
}

/// Decode a face-crop image to grayscale and run the quality assessor
/// over the whole crop. The size score comes from the detection's
/// bounding box, not the crop file's resolution.
fn assess_crop(path: &Path, bbox: &BoundingBox, cfg: &QualityConfig) -> QualityMetrics {
    let img = match image::open(path) {
        Ok(img) => img.to_luma8(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "crop unreadable; neutral quality");
            return QualityMetrics::neutral();
        }
    };
    let (w, h) = img.dimensions();
    quality::assess_standalone_crop(img.as_raw(), w, h, bbox.area(), cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_file_parses_minimal_input() {
        let raw = r#"{
            "faces": [{
                "bbox": {"x": 10.0, "y": 12.0, "width": 96.0, "height": 96.0, "confidence": 0.93, "eye_landmarks": null},
                "embeddings": {"arcface": {"values": [0.1, 0.2, 0.3]}}
            }]
        }"#;
        let photo: PhotoFile = serde_json::from_str(raw).unwrap();
        assert_eq!(photo.faces.len(), 1);
        assert!(photo.faces[0].quality.is_none());

        let obs = photo.observations(&QualityConfig::default());
        assert_eq!(obs[0].face_index, 0);
        // No crop and no precomputed quality: neutral.
        assert_eq!(obs[0].quality.overall, 0.5);
    }

    #[test]
    fn test_crop_size_score_uses_detection_bbox() {
        let dir = tempfile::tempdir().unwrap();
        let crop_path = dir.path().join("crop.png");

        // High-resolution crop file for a tiny 16x16 detection.
        let img = image::GrayImage::from_fn(96, 96, |x, y| {
            image::Luma([if (x + y) % 2 == 0 { 255 } else { 0 }])
        });
        img.save(&crop_path).unwrap();

        let photo = PhotoFile {
            faces: vec![FaceInput {
                bbox: BoundingBox {
                    x: 200.0,
                    y: 200.0,
                    width: 16.0,
                    height: 16.0,
                    confidence: 0.9,
                    eye_landmarks: None,
                },
                embeddings: BTreeMap::new(),
                crop: Some(crop_path),
                quality: None,
            }],
        };

        let cfg = QualityConfig::default();
        let obs = photo.observations(&cfg);
        assert!(
            obs[0].quality.size_score < cfg.min_size_score,
            "size_score = {}",
            obs[0].quality.size_score
        );
        assert!(!obs[0].quality.acceptable);
    }

    #[test]
    fn test_gallery_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");

        let gallery = GalleryFile {
            profiles: vec![IdentityProfile {
                id: "s1".into(),
                label: "Ada".into(),
                primary: BTreeMap::from([(
                    "arcface".to_string(),
                    Embedding::new(vec![1.0, 0.0]),
                )]),
                variants: BTreeMap::new(),
                threshold: 0.25,
                successes: 3,
                failures: 1,
                updated_at: chrono::Utc::now(),
                version: 4,
            }],
        };
        gallery.save(&path).unwrap();

        let loaded = GalleryFile::load(&path).unwrap();
        assert_eq!(loaded.profiles.len(), 1);
        assert_eq!(loaded.profiles[0].id, "s1");
        assert_eq!(loaded.profiles[0].version, 4);
    }

    #[test]
    fn test_missing_gallery_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = GalleryFile::load(&dir.path().join("absent.json")).unwrap();
        assert!(gallery.profiles.is_empty());
    }
}
