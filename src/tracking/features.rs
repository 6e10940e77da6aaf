//! Corner detectors used to seed tracks.

use image::GrayImage;
use imageproc::corners::corners_fast9;

use crate::config::DetectorKind;

/// Pixels excluded at the image border by both detectors.
pub const DETECTOR_BORDER: u32 = 3;

/// Harris trace weight.
const HARRIS_K: f32 = 0.04;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// Run the selected detector. [`DetectorKind::Off`] yields nothing.
pub fn detect(image: &GrayImage, kind: DetectorKind, sensitivity: f32) -> Vec<Corner> {
    match kind {
        DetectorKind::Fast => fast_corners(image, sensitivity.clamp(1.0, 255.0) as u8),
        DetectorKind::Harris => harris_corners(image, sensitivity),
        DetectorKind::Off => Vec::new(),
    }
}

/// FAST-9 segment test with 3x3 non-maximum suppression.
///
/// The score of a corner is the largest threshold at which it still passes.
pub fn fast_corners(image: &GrayImage, threshold: u8) -> Vec<Corner> {
    let (w, h) = image.dimensions();
    if w <= 2 * DETECTOR_BORDER || h <= 2 * DETECTOR_BORDER {
        return Vec::new();
    }
    let mut scores = vec![0.0f32; (w * h) as usize];
    for corner in corners_fast9(image, threshold) {
        scores[(corner.y * w + corner.x) as usize] = corner.score.max(f32::MIN_POSITIVE);
    }
    suppress_non_maxima(&scores, w, h)
}

/// Harris response on Sobel gradients with a 3x3 box window.
///
/// Corners must exceed `sensitivity / 1000` of the strongest response.
pub fn harris_corners(image: &GrayImage, sensitivity: f32) -> Vec<Corner> {
    let (w, h) = image.dimensions();
    if w <= 2 * DETECTOR_BORDER || h <= 2 * DETECTOR_BORDER {
        return Vec::new();
    }
    let at = |x: u32, y: u32| f32::from(image.get_pixel(x, y)[0]);
    let idx = |x: u32, y: u32| (y * w + x) as usize;

    let n = (w * h) as usize;
    let (mut ixx, mut iyy, mut ixy) = (vec![0.0f32; n], vec![0.0f32; n], vec![0.0f32; n]);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            let i = idx(x, y);
            ixx[i] = gx * gx;
            iyy[i] = gy * gy;
            ixy[i] = gx * gy;
        }
    }

    let mut response = vec![0.0f32; n];
    let mut max_response = 0.0f32;
    for y in DETECTOR_BORDER..h - DETECTOR_BORDER {
        for x in DETECTOR_BORDER..w - DETECTOR_BORDER {
            let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
            for wy in y - 1..=y + 1 {
                for wx in x - 1..=x + 1 {
                    let i = idx(wx, wy);
                    sxx += ixx[i];
                    syy += iyy[i];
                    sxy += ixy[i];
                }
            }
            let trace = sxx + syy;
            let r = sxx * syy - sxy * sxy - HARRIS_K * trace * trace;
            response[idx(x, y)] = r;
            max_response = max_response.max(r);
        }
    }
    if max_response <= 0.0 {
        return Vec::new();
    }

    let floor = max_response * (sensitivity / 1000.0);
    for r in response.iter_mut() {
        if *r <= floor {
            *r = 0.0;
        }
    }
    suppress_non_maxima(&response, w, h)
}

/// Keep positive scores that dominate their 3x3 neighbourhood.
/// Plateaus keep their first pixel in raster order.
fn suppress_non_maxima(scores: &[f32], w: u32, h: u32) -> Vec<Corner> {
    let mut corners = Vec::new();
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let s = scores[(y * w + x) as usize];
            if s <= 0.0 {
                continue;
            }
            let mut keep = true;
            'window: for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    if nx == x && ny == y {
                        continue;
                    }
                    let n = scores[(ny * w + nx) as usize];
                    let earlier = (ny, nx) < (y, x);
                    if n > s || (earlier && n == s) {
                        keep = false;
                        break 'window;
                    }
                }
            }
            if keep {
                corners.push(Corner { x, y, score: s });
            }
        }
    }
    corners
}

/// Pick the strongest corners that keep `min_distance` from each other and
/// from `occupied`, up to `limit`.
pub fn select(
    mut corners: Vec<Corner>,
    occupied: &[(u32, u32)],
    min_distance: f32,
    limit: usize,
) -> Vec<Corner> {
    corners.sort_by(|a, b| b.score.total_cmp(&a.score));
    let min_sq = min_distance * min_distance;
    let far_from = |c: &Corner, (x, y): (u32, u32)| {
        let dx = c.x as f32 - x as f32;
        let dy = c.y as f32 - y as f32;
        dx * dx + dy * dy >= min_sq
    };

    let mut chosen: Vec<Corner> = Vec::new();
    for corner in corners {
        if chosen.len() >= limit {
            break;
        }
        if occupied.iter().all(|&p| far_from(&corner, p))
            && chosen.iter().all(|c| far_from(&corner, (c.x, c.y)))
        {
            chosen.push(corner);
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    /// Dark frame with a bright square spanning `[x0, x0 + size)`.
    fn square(w: u32, h: u32, x0: u32, y0: u32, size: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let inside = (x0..x0 + size).contains(&x) && (y0..y0 + size).contains(&y);
            Luma([if inside { 200 } else { 20 }])
        })
    }

    fn near_square_corner(c: &Corner, x0: u32, y0: u32, size: u32) -> bool {
        let xs = [x0 as i32, (x0 + size - 1) as i32];
        let ys = [y0 as i32, (y0 + size - 1) as i32];
        xs.iter().any(|&x| (c.x as i32 - x).abs() <= 3)
            && ys.iter().any(|&y| (c.y as i32 - y).abs() <= 3)
    }

    #[test]
    fn test_uniform_image_has_no_corners() {
        let flat = GrayImage::from_pixel(32, 32, Luma([90]));
        assert!(fast_corners(&flat, 20).is_empty());
        assert!(harris_corners(&flat, 20.0).is_empty());
    }

    #[test]
    fn test_fast_finds_square_corners() {
        let img = square(48, 48, 16, 16, 16);
        let corners = fast_corners(&img, 20);
        assert!(corners.len() >= 4, "found {} corners", corners.len());
        assert!(corners.iter().all(|c| near_square_corner(c, 16, 16, 16)));
    }

    #[test]
    fn test_fast_threshold_above_contrast_finds_nothing() {
        let img = square(48, 48, 16, 16, 16);
        assert!(fast_corners(&img, 200).is_empty());
        assert!(!fast_corners(&img, 100).is_empty());
    }

    #[test]
    fn test_fast_ignores_tiny_images() {
        let img = GrayImage::from_pixel(6, 6, Luma([0]));
        assert!(fast_corners(&img, 20).is_empty());
    }

    #[test]
    fn test_harris_finds_square_corners() {
        let img = square(48, 48, 16, 16, 16);
        let corners = harris_corners(&img, 20.0);
        assert!(corners.len() >= 4, "found {} corners", corners.len());
        assert!(corners.iter().all(|c| near_square_corner(c, 16, 16, 16)));
    }

    #[test]
    fn test_detector_off_yields_nothing() {
        let img = square(48, 48, 16, 16, 16);
        assert!(detect(&img, DetectorKind::Off, 20.0).is_empty());
    }

    #[test]
    fn test_select_respects_spacing_and_limit() {
        let corners = vec![
            Corner { x: 10, y: 10, score: 5.0 },
            Corner { x: 11, y: 10, score: 9.0 },
            Corner { x: 30, y: 30, score: 1.0 },
            Corner { x: 50, y: 50, score: 3.0 },
        ];
        let chosen = select(corners.clone(), &[], 4.0, 10);
        let picked: Vec<(u32, u32)> = chosen.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(picked, vec![(11, 10), (50, 50), (30, 30)]);

        let chosen = select(corners.clone(), &[(50, 50)], 4.0, 1);
        assert_eq!(chosen.len(), 1);
        assert_eq!((chosen[0].x, chosen[0].y), (11, 10));
    }
}
