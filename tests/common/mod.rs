#![allow(dead_code)]

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use image::{DynamicImage, Rgb, RgbImage};
use rollcall::config::Config;
use rollcall::session::{CameraOpener, Clock, Controller};
use rollcall::{Detection, EncodedFace, Embedding, FaceEncoder};
use rollcall_vision::FrameSource;
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

pub const RED: [u8; 3] = [200, 30, 30];
pub const BLUE: [u8; 3] = [30, 30, 200];
pub const BLACK: [u8; 3] = [0, 0, 0];

/// Cycles through `frames`; `None` is a failed read.
pub struct ScriptedCamera {
    frames: Vec<Option<[u8; 3]>>,
    next: usize,
}

impl FrameSource for ScriptedCamera {
    fn frame(&mut self) -> Result<RgbImage> {
        let slot = self.frames[self.next % self.frames.len()];
        self.next += 1;
        match slot {
            Some(color) => Ok(RgbImage::from_pixel(16, 16, Rgb(color))),
            None => anyhow::bail!("no frame"),
        }
    }
}

pub struct ScriptedCameras {
    pub frames: Vec<Option<[u8; 3]>>,
    pub openable: bool,
}

impl ScriptedCameras {
    pub fn showing(color: [u8; 3]) -> Self {
        Self {
            frames: vec![Some(color)],
            openable: true,
        }
    }

    pub fn broken() -> Self {
        Self {
            frames: vec![None],
            openable: false,
        }
    }
}

impl CameraOpener for ScriptedCameras {
    type Camera = ScriptedCamera;

    fn open(&self) -> Result<ScriptedCamera> {
        if !self.openable {
            anyhow::bail!("no such device");
        }
        Ok(ScriptedCamera {
            frames: self.frames.clone(),
            next: 0,
        })
    }
}

/// One face per non-black image, encoded as the normalized colour of the
/// top-left pixel.
pub struct ColorEncoder;

impl FaceEncoder for ColorEncoder {
    fn encode_faces(&mut self, img: &DynamicImage) -> Result<Vec<EncodedFace>> {
        let px = *img.to_rgb8().get_pixel(0, 0);
        if px.0.iter().all(|&c| c < 10) {
            return Ok(vec![]);
        }
        Ok(vec![EncodedFace {
            detection: Detection {
                bbox: [2.0, 2.0, 8.0, 8.0],
                score: 0.9,
                landmarks: [0.0; 10],
            },
            embedding: Embedding::from_vec(px.0.iter().map(|&c| c as f32 / 255.0).collect()),
        }])
    }
}

/// Models that never load. Counts the encode calls it still receives.
#[derive(Default)]
pub struct UnloadableEncoder {
    pub encode_calls: Rc<Cell<usize>>,
}

impl FaceEncoder for UnloadableEncoder {
    fn encode_faces(&mut self, _img: &DynamicImage) -> Result<Vec<EncodedFace>> {
        self.encode_calls.set(self.encode_calls.get() + 1);
        anyhow::bail!("models not loaded")
    }

    fn prepare(&mut self) -> Result<()> {
        anyhow::bail!("load detector model models/missing.onnx")
    }
}

pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

pub fn day(d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 9, d)
        .and_then(|date| date.and_hms_opt(9, 15, 0))
        .unwrap()
}

pub fn test_config(root: &Path) -> Config {
    Config {
        image_root: root.join("student_images"),
        ledger_path: root.join("attendance.xlsx"),
        tolerance: 0.2,
        capture_delay_secs: 0.0,
        attendance_window_secs: 0.05,
        ..Config::default()
    }
}

pub fn controller(
    root: &Path,
    cameras: ScriptedCameras,
    now: NaiveDateTime,
) -> Controller<ScriptedCameras, ColorEncoder, FixedClock> {
    Controller::new(test_config(root), cameras, ColorEncoder, FixedClock(now))
}

pub fn register(root: &Path, name: &str, color: [u8; 3]) -> Result<()> {
    controller(root, ScriptedCameras::showing(color), day(1)).register(name)?;
    Ok(())
}
