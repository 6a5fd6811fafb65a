use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};
use std::path::{Path, PathBuf};

/// Locations of the two ONNX models the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    /// YuNet face detector.
    pub detector: PathBuf,
    /// SFace face recognizer.
    pub recognizer: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            recognizer: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
        }
    }
}

impl ModelPaths {
    /// True when both model files are present on disk.
    pub fn exist(&self) -> bool {
        self.detector.is_file() && self.recognizer.is_file()
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load(path: &Path, what: &str) -> Result<Session> {
    log::debug!("loading {} model from {}", what, path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))
}

pub fn recog_session(paths: &ModelPaths) -> Result<Session> {
    load(&paths.recognizer, "recognition")
}

pub fn detector_session(paths: &ModelPaths) -> Result<Session> {
    load(&paths.detector, "detector")
}
