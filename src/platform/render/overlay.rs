// Debug landmark overlay drawn over the mirrored video

use crate::models::pose::{PoseFrame, POSE_CONNECTIONS};
use image::{Pixel, Rgba, RgbaImage};

const LANDMARK_COLOR: Rgba<u8> = Rgba([255, 255, 255, 204]); // White, 0.8 alpha
const CONNECTION_COLOR: Rgba<u8> = Rgba([255, 255, 255, 128]); // White, 0.5 alpha
const LANDMARK_RADIUS: f32 = 4.0;
const CONNECTION_WIDTH: f32 = 4.0;
/// Landmarks below this visibility are not drawn
const MIN_VISIBILITY: f32 = 0.5;

/// Draw the skeleton onto a copy of an already mirrored frame. Landmark x is
/// in camera space, so it is mirrored here to line up with the picture.
pub fn overlay_landmarks(frame: &RgbaImage, pose: &PoseFrame) -> RgbaImage {
    let (w, h) = (frame.width() as f32, frame.height() as f32);
    let to_screen = |x: f32, y: f32| ((1.0 - x) * w, y * h);
    let mut layer = RgbaImage::new(frame.width(), frame.height());

    for (a, b) in POSE_CONNECTIONS {
        let (Some(la), Some(lb)) = (pose.get(*a), pose.get(*b)) else {
            continue;
        };
        if !la.is_visible(MIN_VISIBILITY) || !lb.is_visible(MIN_VISIBILITY) {
            continue;
        }
        draw_line(
            &mut layer,
            to_screen(la.x, la.y),
            to_screen(lb.x, lb.y),
            CONNECTION_WIDTH / 2.0,
            CONNECTION_COLOR,
        );
    }

    for (_, landmark) in pose.iter() {
        if landmark.is_visible(MIN_VISIBILITY) {
            stamp(&mut layer, to_screen(landmark.x, landmark.y), LANDMARK_RADIUS, LANDMARK_COLOR);
        }
    }

    let mut out = frame.clone();
    for (dst, src) in out.pixels_mut().zip(layer.pixels()) {
        if src.0[3] > 0 {
            dst.blend(src);
        }
    }
    out
}

fn draw_line(layer: &mut RgbaImage, from: (f32, f32), to: (f32, f32), radius: f32, color: Rgba<u8>) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let length = (dx * dx + dy * dy).sqrt();
    if !length.is_finite() {
        return;
    }

    // Stamp discs at sub-radius spacing along the segment
    let steps = (length / radius.max(1.0)).ceil().max(1.0) as u32;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        stamp(layer, (from.0 + dx * t, from.1 + dy * t), radius, color);
    }
}

/// Fill a disc on the overlay layer. Stamps replace rather than blend, so
/// overlapping strokes keep a uniform opacity.
fn stamp(layer: &mut RgbaImage, center: (f32, f32), radius: f32, color: Rgba<u8>) {
    let (w, h) = (layer.width() as i64, layer.height() as i64);
    let x0 = (center.0 - radius).floor() as i64;
    let x1 = (center.0 + radius).ceil() as i64;
    let y0 = (center.1 - radius).floor() as i64;
    let y1 = (center.1 + radius).ceil() as i64;

    for y in y0.max(0)..=y1.min(h - 1) {
        for x in x0.max(0)..=x1.min(w - 1) {
            let (px, py) = (x as f32 + 0.5 - center.0, y as f32 + 0.5 - center.1);
            if px * px + py * py <= radius * radius {
                layer.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
