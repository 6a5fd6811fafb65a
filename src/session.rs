//! Registration and attendance actions.
//!
//! Each action opens its own camera and drops it before returning, so the
//! device is released on every path out.

use crate::config::Config;
use crate::ledger::{Ledger, MarkOutcome};
use crate::matcher::{self, match_face};
use crate::storage::{validate_identity, ImageStore};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use image::{DynamicImage, ImageFormat, RgbImage};
use rollcall_vision::annotate::{draw_box, GREEN};
use rollcall_vision::{
    Camera, DetectorSettings, EncodedFace, FaceEncoder, FrameSource, ModelPaths, Pipeline,
};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

/// Opens a fresh camera handle per action.
pub trait CameraOpener {
    type Camera: FrameSource;

    fn open(&self) -> Result<Self::Camera>;
}

/// V4L2 camera by index or device path.
#[derive(Debug, Clone)]
pub struct V4lCameras {
    pub camera: String,
}

impl CameraOpener for V4lCameras {
    type Camera = Camera;

    fn open(&self) -> Result<Camera> {
        Camera::open(&self.camera)
    }
}

pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Loads the ONNX models on first use, so registering works without them.
pub struct LazyPipeline {
    paths: ModelPaths,
    settings: DetectorSettings,
    inner: Option<Pipeline>,
}

impl LazyPipeline {
    pub fn new(paths: ModelPaths, settings: DetectorSettings) -> Self {
        Self {
            paths,
            settings,
            inner: None,
        }
    }
}

impl FaceEncoder for LazyPipeline {
    fn encode_faces(&mut self, img: &DynamicImage) -> Result<Vec<EncodedFace>> {
        self.prepare()?;
        match self.inner.as_mut() {
            Some(pipeline) => pipeline.encode_faces(img),
            None => anyhow::bail!("face recognition pipeline unavailable"),
        }
    }

    fn prepare(&mut self) -> Result<()> {
        if self.inner.is_none() {
            let pipeline = Pipeline::new(&self.paths, self.settings)
                .context("Failed to initialize face recognition pipeline")?;
            self.inner = Some(pipeline);
        }
        Ok(())
    }
}

/// What one attendance window saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub frames: usize,
    pub failed_reads: usize,
    pub faces: usize,
    /// Labels newly added to the ledger, in order.
    pub marked: Vec<String>,
    pub already_marked: usize,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frame(s), {} failed read(s), {} face(s), {} newly marked, {} already marked",
            self.frames,
            self.failed_reads,
            self.faces,
            self.marked.len(),
            self.already_marked
        )
    }
}

pub struct Controller<C, E, K = SystemClock> {
    config: Config,
    store: ImageStore,
    cameras: C,
    encoder: E,
    clock: K,
}

impl Controller<V4lCameras, LazyPipeline, SystemClock> {
    /// Real camera, real models, local time.
    pub fn from_config(config: Config) -> Self {
        let cameras = V4lCameras {
            camera: config.camera.clone(),
        };
        let encoder = LazyPipeline::new(config.models(), config.detector());
        Self::new(config, cameras, encoder, SystemClock)
    }
}

impl<C, E, K> Controller<C, E, K>
where
    C: CameraOpener,
    E: FaceEncoder,
    K: Clock,
{
    pub fn new(config: Config, cameras: C, encoder: E, clock: K) -> Self {
        let store = ImageStore::new(&config.image_root);
        Self {
            config,
            store,
            cameras,
            encoder,
            clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Capture one reference image for `name` after the posing delay.
    ///
    /// Returns `Ok(None)` when the camera gives no frame; that is reported
    /// in the log, not as an error.
    pub fn register(&mut self, name: &str) -> Result<Option<PathBuf>> {
        let identity = validate_identity(name)?.to_string();
        self.store.ensure_identity_dir(&identity)?;

        let mut camera = match self.cameras.open() {
            Ok(camera) => camera,
            Err(e) => {
                log::error!("Unable to open camera: {:#}", e);
                return Ok(None);
            }
        };

        let delay = self.config.capture_delay();
        log::info!(
            "Get ready to capture image in {} seconds...",
            delay.as_secs_f32()
        );
        let deadline = Instant::now() + delay;
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));

        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Unable to capture image: {:#}", e);
                return Ok(None);
            }
        };
        drop(camera);

        let path = self.store.save_reference(&identity, &frame)?;
        log::info!("Image captured for {} at {}", identity, path.display());
        Ok(Some(path))
    }

    /// Watch the camera for the attendance window, marking everyone seen.
    /// The caller saves the ledger.
    ///
    /// Fails before the window opens if the encoder cannot be loaded; after
    /// that, per-frame read and encode errors are logged and skipped.
    pub fn take_attendance(&mut self, ledger: &mut Ledger) -> Result<SessionReport> {
        self.encoder.prepare()?;
        let known = matcher::build_known_set(&self.store, &mut self.encoder)?;
        let tolerance = self.config.tolerance;
        let policy = self.config.match_policy;

        let mut camera = self.cameras.open().context("Failed to open camera")?;
        let window = self.config.attendance_window();
        log::info!("Taking attendance for {} seconds...", window.as_secs_f32());

        let deadline = Instant::now() + window;
        let mut report = SessionReport::default();
        let mut last_frame: Option<RgbImage> = None;

        while Instant::now() < deadline {
            let frame = match camera.frame() {
                Ok(frame) => frame,
                Err(e) => {
                    report.failed_reads += 1;
                    log::warn!("Frame read failed: {:#}", e);
                    continue;
                }
            };
            report.frames += 1;

            let img = DynamicImage::ImageRgb8(frame);
            let faces = match self.encoder.encode_faces(&img) {
                Ok(faces) => faces,
                Err(e) => {
                    log::warn!("Frame {}: {:#}", report.frames, e);
                    continue;
                }
            };

            let mut annotated = img.into_rgb8();
            for face in &faces {
                report.faces += 1;
                let who = match_face(&known, &face.embedding, tolerance, policy);
                draw_box(&mut annotated, face.detection.bbox, GREEN, 2);
                log::debug!(
                    "Frame {}: {} (score {:.3})",
                    report.frames,
                    who,
                    face.detection.score
                );

                match ledger.mark(who.label(), self.clock.now()) {
                    MarkOutcome::Marked => report.marked.push(who.label().to_string()),
                    MarkOutcome::AlreadyMarked => report.already_marked += 1,
                }
            }
            last_frame = Some(annotated);
        }
        drop(camera);

        if let (Some(path), Some(frame)) = (&self.config.preview_path, &last_frame) {
            match frame.save_with_format(path, ImageFormat::Jpeg) {
                Ok(()) => log::debug!("wrote preview {}", path.display()),
                Err(e) => log::warn!("could not write preview {}: {}", path.display(), e),
            }
        }

        log::info!("Attendance session done: {}", report);
        Ok(report)
    }
}
