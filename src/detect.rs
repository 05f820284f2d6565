//! Board locator.
//! Classifies pixels against the two board square-color families in HSV,
//! cleans the combined mask with a morphological close/open pass, then
//! picks the largest roughly-square external contour and squares it up.
//! "No board on screen" is a normal outcome, not an error.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use tracing::{debug, trace};

use crate::board::BoardGeometry;

// Square color ranges in OpenCV-style HSV (H 0-179, S/V 0-255).
// Green squares: #769656, beige squares: #EEEED2. Ranges are generous to
// tolerate display gamma and scaling variance.
const GREEN_LOWER: [u8; 3] = [30, 40, 80];
const GREEN_UPPER: [u8; 3] = [90, 255, 200];

const BEIGE_LOWER: [u8; 3] = [20, 10, 180];
const BEIGE_UPPER: [u8; 3] = [45, 80, 255];

/// Minimum bounding-box area a candidate needs to count as a board.
pub const MIN_BOARD_AREA: u32 = 10_000;

// The 5x5 kernel applied for 3 closing and 2 opening iterations collapses
// into single passes with radii 6 and 4.
const CLOSE_RADIUS: u8 = 6;
const OPEN_RADIUS: u8 = 4;

/// Finds the chess board in a captured frame.
pub fn locate(frame: &RgbaImage, min_area: u32) -> Option<BoardGeometry> {
    let mask = board_color_mask(frame);
    let mask = close(&mask, Norm::LInf, CLOSE_RADIUS);
    let mask = open(&mask, Norm::LInf, OPEN_RADIUS);

    let contours = find_contours::<i32>(&mask);
    trace!("mask contours: {}", contours.len());

    let mut best: Option<(i32, i32, u32, u32)> = None;
    let mut best_area = 0u64;

    for contour in &contours {
        if contour.border_type != BorderType::Outer || contour.parent.is_some() {
            continue;
        }
        let Some((x, y, w, h)) = bounding_box(&contour.points) else {
            continue;
        };
        let area = w as u64 * h as u64;
        if area < min_area as u64 {
            continue;
        }
        let aspect = w as f32 / h as f32;
        if !(0.8..1.2).contains(&aspect) {
            trace!("candidate {}x{} rejected, aspect {:.2}", w, h, aspect);
            continue;
        }
        if area > best_area {
            best = Some((x, y, w, h));
            best_area = area;
        }
    }

    let (mut x, mut y, w, h) = best?;

    // Square the box, centering the shorter dimension.
    let side = w.max(h);
    if w < side {
        x -= ((side - w) / 2) as i32;
    }
    if h < side {
        y -= ((side - h) / 2) as i32;
    }

    debug!("board located at ({}, {}) side {}", x, y, side);
    Some(BoardGeometry { x, y, side })
}

/// Binary mask of pixels matching either square-color family.
fn board_color_mask(frame: &RgbaImage) -> GrayImage {
    let mut mask = GrayImage::new(frame.width(), frame.height());
    for (x, y, pixel) in frame.enumerate_pixels() {
        let hsv = rgb_to_hsv(pixel[0], pixel[1], pixel[2]);
        if in_range(hsv, GREEN_LOWER, GREEN_UPPER) || in_range(hsv, BEIGE_LOWER, BEIGE_UPPER) {
            mask.put_pixel(x, y, Luma([255u8]));
        }
    }
    mask
}

fn in_range(v: [u8; 3], lower: [u8; 3], upper: [u8; 3]) -> bool {
    (0..3).all(|i| lower[i] <= v[i] && v[i] <= upper[i])
}

/// RGB to OpenCV-scaled HSV: H in [0, 180), S and V in [0, 255].
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let h_deg = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    let h_deg = if h_deg < 0.0 { h_deg + 360.0 } else { h_deg };

    [(h_deg / 2.0) as u8, s.round() as u8, v.round() as u8]
}

fn bounding_box(points: &[imageproc::point::Point<i32>]) -> Option<(i32, i32, u32, u32)> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some((
        min_x,
        min_y,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}
