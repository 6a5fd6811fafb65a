use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding};
use crate::model::{self, ModelPaths};

/// One face found in an image together with its encoding.
#[derive(Debug, Clone)]
pub struct EncodedFace {
    pub detection: Detection,
    pub embedding: Embedding,
}

/// Turns an image into face encodings.
pub trait FaceEncoder {
    /// Every face in `img`, highest detector score first. An image with no
    /// faces yields an empty vector, not an error.
    fn encode_faces(&mut self, img: &DynamicImage) -> Result<Vec<EncodedFace>>;

    /// Load whatever the encoder needs up front. Errors here are fatal to
    /// the caller, unlike a failed `encode_faces` on a single frame.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Detector tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub settings: DetectorSettings,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths, settings: DetectorSettings) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(paths)?,
            encoder: model::recog_session(paths)?,
            settings,
        })
    }

    fn embed(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding> {
        let face_img = face::align_face(img, detection, 112).context("aligning face")?;
        face::encode_face(&mut self.encoder, &face_img).context("encoding face")
    }

    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let mut detections = face::detect_faces(
            &mut self.detector,
            img,
            self.settings.score_threshold,
            self.settings.nms_threshold,
        )
        .context("detecting faces")?;
        face::sort_by_score(&mut detections);
        Ok(detections)
    }
}

impl FaceEncoder for Pipeline {
    fn encode_faces(&mut self, img: &DynamicImage) -> Result<Vec<EncodedFace>> {
        let detections = self.detect(img)?;
        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            let embedding = self.embed(img, &detection)?;
            faces.push(EncodedFace {
                detection,
                embedding,
            });
        }
        Ok(faces)
    }
}
