//! Frame overlays for the attendance preview.

use image::{Rgb, RgbImage};

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// Outline `bbox` (`x, y, w, h` in pixels) with a `thickness`-pixel border,
/// clipped to the frame.
pub fn draw_box(frame: &mut RgbImage, bbox: [f32; 4], color: Rgb<u8>, thickness: u32) {
    let (fw, fh) = frame.dimensions();
    if fw == 0 || fh == 0 {
        return;
    }
    let clip = |v: f32, max: u32| v.round().clamp(0.0, (max - 1) as f32) as u32;
    let left = clip(bbox[0], fw);
    let top = clip(bbox[1], fh);
    let right = clip(bbox[0] + bbox[2], fw);
    let bottom = clip(bbox[1] + bbox[3], fh);
    if right < left || bottom < top {
        return;
    }

    for t in 0..thickness {
        for x in left..=right {
            for y in [top.saturating_add(t), bottom.saturating_sub(t)] {
                if y >= top && y <= bottom {
                    frame.put_pixel(x, y, color);
                }
            }
        }
        for y in top..=bottom {
            for x in [left.saturating_add(t), right.saturating_sub(t)] {
                if x >= left && x <= right {
                    frame.put_pixel(x, y, color);
                }
            }
        }
    }
}
