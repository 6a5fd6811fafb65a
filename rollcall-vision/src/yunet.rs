//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: for each stride (8, 16, 32) it predicts directly
//! from grid cells. The model emits twelve tensors, grouped by kind and
//! ordered by stride inside each group:
//!
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32`
//!
//! A cell `(i, j)` at stride `s` decodes as
//! `cx = (j + dx) * s`, `cy = (i + dy) * s`, `w = dw * s`, `h = dh * s`,
//! all divided by the input side to land in `[0, 1]`.

use anyhow::Result;
use ndarray::Array2;

const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5 (normalized [0,1])
}

/// Per-stride prediction maps, one entry per stride in [`STRIDES`] order.
#[derive(Debug, Clone, Default)]
pub struct YunetHeads {
    /// `cls * obj`, `[cells, 1]`.
    pub scores: Vec<Array2<f32>>,
    /// `[cells, 4]`.
    pub bboxes: Vec<Array2<f32>>,
    /// `[cells, 10]`.
    pub landmarks: Vec<Array2<f32>>,
}

fn cells(input_size: usize, stride: usize) -> usize {
    let side = input_size / stride;
    side * side
}

/// Pull the three per-stride tensors of one output group, checking shapes.
fn take_group(
    outputs: &[(&[i64], &[f32])],
    group: usize,
    name: &str,
    width: usize,
    input_size: usize,
) -> Result<Vec<Array2<f32>>> {
    STRIDES
        .iter()
        .enumerate()
        .map(|(k, &stride)| {
            let idx = group * STRIDES.len() + k;
            let expected = cells(input_size, stride);
            let (shape, data) = outputs
                .get(idx)
                .ok_or_else(|| anyhow::anyhow!("Missing {} output at index {}", name, idx))?;
            if shape.len() != 3 || shape[0] != 1 || shape[2] as usize != width {
                anyhow::bail!(
                    "Unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
                    name,
                    idx,
                    shape,
                    expected,
                    width
                );
            }
            if shape[1] as usize != expected {
                anyhow::bail!(
                    "Expected {} locations for {} at index {}, got {}",
                    expected,
                    name,
                    idx,
                    shape[1]
                );
            }
            Ok(Array2::from_shape_vec((expected, width), data.to_vec())?)
        })
        .collect()
}

/// Parse YuNet raw outputs into per-stride maps; scores are `cls * obj`.
pub fn parse_yunet_outputs(
    outputs: &[(&[i64], &[f32])],
    input_size: usize,
) -> Result<YunetHeads> {
    let cls = take_group(outputs, 0, "cls", 1, input_size)?;
    let obj = take_group(outputs, 1, "obj", 1, input_size)?;
    let bboxes = take_group(outputs, 2, "bbox", 4, input_size)?;
    let landmarks = take_group(outputs, 3, "kps", 10, input_size)?;

    let scores = cls.iter().zip(obj.iter()).map(|(c, o)| c * o).collect();

    Ok(YunetHeads {
        scores,
        bboxes,
        landmarks,
    })
}

/// Decode every grid cell scoring at least `score_threshold`.
pub fn decode_detections(
    heads: &YunetHeads,
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    if heads.scores.len() != STRIDES.len()
        || heads.bboxes.len() != STRIDES.len()
        || heads.landmarks.len() != STRIDES.len()
    {
        anyhow::bail!("Expected {} prediction scales", STRIDES.len());
    }

    let norm = input_size as f32;
    let mut detections = Vec::new();

    for (k, &stride) in STRIDES.iter().enumerate() {
        let scores = &heads.scores[k];
        let bboxes = &heads.bboxes[k];
        let landmarks = &heads.landmarks[k];

        let side = input_size / stride;
        if scores.shape()[0] != side * side {
            anyhow::bail!(
                "Expected {} boxes for stride {} ({}x{} grid), got {}",
                side * side,
                stride,
                side,
                side,
                scores.shape()[0]
            );
        }

        let s = stride as f32;
        for idx in 0..side * side {
            let score = scores[[idx, 0]];
            if score < score_threshold {
                continue;
            }
            let (gi, gj) = ((idx / side) as f32, (idx % side) as f32);

            let cx = (gj + bboxes[[idx, 0]]) * s / norm;
            let cy = (gi + bboxes[[idx, 1]]) * s / norm;
            let w = bboxes[[idx, 2]] * s / norm;
            let h = bboxes[[idx, 3]] * s / norm;

            let mut lms = [0.0f32; 10];
            for p in 0..5 {
                lms[p * 2] = (gj + landmarks[[idx, p * 2]]) * s / norm;
                lms[p * 2 + 1] = (gi + landmarks[[idx, p * 2 + 1]]) * s / norm;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks: lms,
            });
        }
    }

    Ok(detections)
}

/// Apply sigmoid activation to scores
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Apply sigmoid to all classification scores
pub fn apply_sigmoid_to_scores(scores: &mut [Array2<f32>]) {
    for score_map in scores {
        score_map.mapv_inplace(sigmoid);
    }
}
