use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array2, Array4, Axis};
use ort::{session::Session, value::Value};

/// YuNet's fixed square input side.
const DETECTOR_INPUT: u32 = 640;
/// SFace's fixed square input side.
const ENCODER_INPUT: u32 = 112;

/// Detection result from YuNet
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Face embedding (SFace output), L2-normalized, shape `[1, N]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array2<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values).insert_axis(Axis(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    /// Euclidean (L2) distance to another embedding.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Where a source image landed inside the square detector canvas.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    /// Map a normalized canvas coordinate back to source pixels.
    fn unmap(&self, nx: f32, ny: f32) -> (f32, f32) {
        let side = DETECTOR_INPUT as f32;
        (
            (nx * side - self.offset_x) / self.scale,
            (ny * side - self.offset_y) / self.scale,
        )
    }

    fn unmap_len(&self, n: f32) -> f32 {
        n * DETECTOR_INPUT as f32 / self.scale
    }
}

/// Resize keeping aspect ratio and pad onto a black square canvas.
fn letterbox(img: &DynamicImage) -> (RgbImage, Letterbox) {
    let (w, h) = img.dimensions();
    let scale = DETECTOR_INPUT as f32 / w.max(h) as f32;
    let new_w = ((w as f32 * scale) as u32).clamp(1, DETECTOR_INPUT);
    let new_h = ((h as f32 * scale) as u32).clamp(1, DETECTOR_INPUT);
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);

    let mut canvas = DynamicImage::new_rgb8(DETECTOR_INPUT, DETECTOR_INPUT);
    let offset_x = (DETECTOR_INPUT - new_w) / 2;
    let offset_y = (DETECTOR_INPUT - new_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    (
        canvas.to_rgb8(),
        Letterbox {
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        },
    )
}

/// Interleaved RGB to planar BGR `[1, 3, H, W]`, the layout both models take.
fn to_bgr_tensor(rgb: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = rgb.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    let (b, rest) = data.split_at_mut(plane);
    let (g, r) = rest.split_at_mut(plane);
    for (i, px) in rgb.as_raw().chunks_exact(3).enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }
    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces in an image using YuNet detector
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (canvas, lb) = letterbox(img);
    let input_tensor = Value::from_array(to_bgr_tensor(&canvas)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        owned.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let refs: Vec<(&[i64], &[f32])> = owned
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let mut heads = yunet::parse_yunet_outputs(&refs, DETECTOR_INPUT as usize)?;
    yunet::apply_sigmoid_to_scores(&mut heads.scores);
    let raw = yunet::decode_detections(&heads, score_threshold, DETECTOR_INPUT as usize)?;

    let mut detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let (x, y) = lb.unmap(d.bbox[0], d.bbox[1]);
            let mut landmarks = [0.0f32; 10];
            for (dst, src) in landmarks.chunks_exact_mut(2).zip(d.landmarks.chunks_exact(2)) {
                let (lx, ly) = lb.unmap(src[0], src[1]);
                dst[0] = lx;
                dst[1] = ly;
            }
            Detection {
                bbox: [x, y, lb.unmap_len(d.bbox[2]), lb.unmap_len(d.bbox[3])],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    }
    log::debug!("detected {} face(s)", detections.len());

    Ok(detections)
}

/// Sort by score, highest first.
pub fn sort_by_score(detections: &mut [Detection]) {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sort_by_score(&mut sorted);

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Similarity transform taking source pixels to the aligned crop.
struct Affine {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    tx: f32,
    ty: f32,
}

impl Affine {
    /// Rotate and scale so the eyes land on the ArcFace reference positions.
    fn from_eyes(left: (f32, f32), right: (f32, f32), size: u32) -> Self {
        const REF_LEFT: (f32, f32) = (38.3, 51.7);
        const REF_RIGHT: (f32, f32) = (73.5, 51.5);
        let unit = size as f32 / ENCODER_INPUT as f32;

        let (dx, dy) = (right.0 - left.0, right.1 - left.1);
        let angle = dy.atan2(dx);
        let ref_dist = (REF_RIGHT.0 - REF_LEFT.0).hypot(REF_RIGHT.1 - REF_LEFT.1);
        let scale = unit * ref_dist / dx.hypot(dy).max(f32::EPSILON);

        let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
        let target = (
            (REF_LEFT.0 + REF_RIGHT.0) / 2.0 * unit,
            (REF_LEFT.1 + REF_RIGHT.1) / 2.0 * unit,
        );

        let (sin, cos) = angle.sin_cos();
        let (a, b, c, d) = (scale * cos, scale * sin, -scale * sin, scale * cos);
        Self {
            a,
            b,
            c,
            d,
            tx: target.0 - (a * center.0 + b * center.1),
            ty: target.1 - (c * center.0 + d * center.1),
        }
    }

    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let (x, y) = (x - self.tx, y - self.ty);
        let det = self.a * self.d - self.b * self.c;
        (
            (self.d * x - self.b * y) / det,
            (-self.c * x + self.a * y) / det,
        )
    }
}

/// Align and crop face using the eye landmarks
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let lm = &detection.landmarks;
    let transform = Affine::from_eyes((lm[0], lm[1]), (lm[2], lm[3]), size);

    let src = img.to_rgb8();
    let (w, h) = src.dimensions();
    let mut output = RgbImage::new(size, size);

    for (ox, oy, px) in output.enumerate_pixels_mut() {
        let (ix, iy) = transform.invert(ox as f32, oy as f32);
        if ix < 0.0 || iy < 0.0 || ix >= w as f32 || iy >= h as f32 {
            continue;
        }
        // bilinear
        let x0 = ix.floor() as u32;
        let y0 = iy.floor() as u32;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fx = ix - x0 as f32;
        let fy = iy - y0 as f32;
        let taps = [
            (src.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
            (src.get_pixel(x1, y0), fx * (1.0 - fy)),
            (src.get_pixel(x0, y1), (1.0 - fx) * fy),
            (src.get_pixel(x1, y1), fx * fy),
        ];
        for ch in 0..3 {
            let v: f32 = taps.iter().map(|(p, wgt)| p[ch] as f32 * wgt).sum();
            px[ch] = v as u8;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode face image to embedding using SFace
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face_rgb = face_img
        .resize_exact(
            ENCODER_INPUT,
            ENCODER_INPUT,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8();
    let input_tensor = Value::from_array(to_bgr_tensor(&face_rgb)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let embedding_size = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let mut values: Vec<f32> = data[0..embedding_size].to_vec();
    normalize(&mut values);

    Ok(Embedding::from_vec(values))
}

/// L2-normalize in place; zero vectors are left untouched.
pub fn normalize(values: &mut [f32]) {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms_keeps_highest_of_overlap() {
        let detections = vec![
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn test_distance() {
        let a = Embedding::from_vec(vec![1.0, 0.0]);
        let b = Embedding::from_vec(vec![0.0, 1.0]);
        assert!((a.distance(&b) - 2f32.sqrt()).abs() < 1e-6);
        assert_eq!(a.distance(&a), 0.0);
        assert!((b.distance(&a) - a.distance(&b)).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let img = DynamicImage::new_rgb8(320, 160);
        let (canvas, lb) = letterbox(&img);
        assert_eq!(canvas.dimensions(), (640, 640));
        // scale 2, image occupies rows 160..480
        let (x, y) = lb.unmap(0.5, 0.5);
        assert!((x - 160.0).abs() < 1e-3);
        assert!((y - 80.0).abs() < 1e-3);
        assert!((lb.unmap_len(0.5) - 160.0).abs() < 1e-3);
    }

    #[test]
    fn test_bgr_tensor_layout() -> Result<()> {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(0, 0, image::Rgb([10, 20, 30]));
        rgb.put_pixel(1, 0, image::Rgb([40, 50, 60]));
        let t = to_bgr_tensor(&rgb)?;
        assert_eq!(t.shape(), &[1, 3, 1, 2]);
        assert_eq!(t[[0, 0, 0, 0]], 30.0);
        assert_eq!(t[[0, 1, 0, 1]], 50.0);
        assert_eq!(t[[0, 2, 0, 1]], 40.0);
        Ok(())
    }

    #[test]
    fn test_align_face_output_size() -> Result<()> {
        let img = DynamicImage::new_rgb8(200, 200);
        let mut d = det([50.0, 50.0, 100.0, 100.0], 0.9);
        d.landmarks[..4].copy_from_slice(&[80.0, 90.0, 120.0, 90.0]);
        let aligned = align_face(&img, &d, ENCODER_INPUT)?;
        assert_eq!(aligned.dimensions(), (112, 112));
        Ok(())
    }
}
