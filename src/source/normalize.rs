//! Per-frame format normalization shared by all sources.

use image::{GrayImage, Luma, imageops};

use super::RawFrame;
use crate::config::{Normalization, Roi};

const BINS: usize = u16::MAX as usize + 1;

/// Crop to the region of interest, clipped to the frame.
///
/// Returns `None` when the region does not overlap the frame.
pub fn crop(raw: RawFrame, roi: Option<Roi>) -> Option<RawFrame> {
    let Some(roi) = roi else {
        return Some(raw);
    };
    let (w, h) = raw.dimensions();
    if roi.x >= w || roi.y >= h {
        return None;
    }
    let width = roi.width.min(w - roi.x);
    let height = roi.height.min(h - roi.y);
    if width == 0 || height == 0 {
        return None;
    }
    Some(imageops::crop_imm(&raw, roi.x, roi.y, width, height).to_image())
}

/// Widen an 8-bit image to the 16-bit raw representation.
pub fn widen(gray: &GrayImage) -> RawFrame {
    RawFrame::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([u16::from(gray.get_pixel(x, y)[0]) * 257])
    })
}

/// True when both frames have identical size and content.
pub fn same_content(a: &RawFrame, b: &RawFrame) -> bool {
    a.dimensions() == b.dimensions() && a.as_raw() == b.as_raw()
}

/// Convert a raw frame to 8 bits.
pub fn to_8bit(raw: &RawFrame, mode: Normalization, clip_fraction: f32) -> GrayImage {
    match mode {
        Normalization::None => shift(raw),
        Normalization::Stretch => stretch(raw, clip_fraction),
        Normalization::Equalize => equalize(raw),
    }
}

fn shift(raw: &RawFrame) -> GrayImage {
    map(raw, |v| (v >> 8) as u8)
}

fn map(raw: &RawFrame, f: impl Fn(u16) -> u8) -> GrayImage {
    let (w, h) = raw.dimensions();
    let data = raw.as_raw().iter().map(|&v| f(v)).collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}

fn histogram(raw: &RawFrame) -> Vec<u64> {
    let mut hist = vec![0u64; BINS];
    for &v in raw.as_raw() {
        hist[v as usize] += 1;
    }
    hist
}

fn stretch(raw: &RawFrame, clip_fraction: f32) -> GrayImage {
    let n = raw.as_raw().len() as u64;
    if n == 0 {
        return shift(raw);
    }
    let hist = histogram(raw);
    let clip = (f64::from(clip_fraction.clamp(0.0, 0.49)) * n as f64) as u64;

    let mut acc = 0u64;
    let mut low = 0usize;
    for (v, &count) in hist.iter().enumerate() {
        acc += count;
        if acc > clip {
            low = v;
            break;
        }
    }
    acc = 0;
    let mut high = BINS - 1;
    for (v, &count) in hist.iter().enumerate().rev() {
        acc += count;
        if acc > clip {
            high = v;
            break;
        }
    }

    if high <= low {
        return shift(raw);
    }
    let (low, range) = (low as u32, (high - low) as u32);
    map(raw, |v| {
        let v = u32::from(v).clamp(low, low + range);
        ((v - low) * 255 / range) as u8
    })
}

fn equalize(raw: &RawFrame) -> GrayImage {
    let n = raw.as_raw().len() as u64;
    let hist = histogram(raw);

    let mut cdf = vec![0u64; BINS];
    let mut acc = 0u64;
    for (slot, &count) in cdf.iter_mut().zip(&hist) {
        acc += count;
        *slot = acc;
    }
    let cdf_min = hist
        .iter()
        .zip(&cdf)
        .find(|&(&count, _)| count > 0)
        .map(|(_, &c)| c)
        .unwrap_or(0);

    if n <= cdf_min {
        return shift(raw);
    }
    let denom = (n - cdf_min) as f64;
    map(raw, |v| {
        let c = cdf[v as usize] - cdf_min;
        ((c as f64 * 255.0 / denom).round()).min(255.0) as u8
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32, lo: u16, step: u16) -> RawFrame {
        RawFrame::from_fn(width, height, |x, y| Luma([lo + step * (y * width + x) as u16]))
    }

    #[test]
    fn test_crop_clips_to_frame() {
        let raw = ramp(8, 6, 0, 1);
        let cropped = crop(
            raw.clone(),
            Some(Roi {
                x: 6,
                y: 4,
                width: 10,
                height: 10,
            }),
        )
        .unwrap();
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.get_pixel(0, 0)[0], raw.get_pixel(6, 4)[0]);

        let outside = Roi {
            x: 8,
            y: 0,
            width: 2,
            height: 2,
        };
        assert!(crop(raw.clone(), Some(outside)).is_none());
        assert_eq!(crop(raw.clone(), None).unwrap(), raw);
    }

    #[test]
    fn test_widen_then_shift_is_lossless() {
        let gray = GrayImage::from_fn(4, 3, |x, y| Luma([(x * 60 + y) as u8]));
        let back = to_8bit(&widen(&gray), Normalization::None, 0.0);
        assert_eq!(back, gray);
    }

    #[test]
    fn test_stretch_spans_full_range() {
        // Narrow 16-bit band typical of thermal sensors.
        let raw = ramp(16, 16, 7000, 2);
        let out = to_8bit(&raw, Normalization::Stretch, 0.0);
        let min = out.as_raw().iter().min().copied().unwrap();
        let max = out.as_raw().iter().max().copied().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn test_flat_frame_falls_back_to_shift() {
        let raw = RawFrame::from_pixel(5, 5, Luma([0x4000]));
        for mode in [Normalization::Stretch, Normalization::Equalize] {
            let out = to_8bit(&raw, mode, 0.01);
            assert!(out.as_raw().iter().all(|&v| v == 0x40));
        }
    }

    #[test]
    fn test_equalize_is_monotonic() {
        let raw = ramp(10, 10, 100, 3);
        let out = to_8bit(&raw, Normalization::Equalize, 0.0);
        let values = out.as_raw();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*values.last().unwrap(), 255);
    }

    #[test]
    fn test_same_content() {
        let a = ramp(4, 4, 0, 1);
        let mut b = a.clone();
        assert!(same_content(&a, &b));
        b.put_pixel(0, 0, Luma([999]));
        assert!(!same_content(&a, &b));
        assert!(!same_content(&a, &ramp(4, 3, 0, 1)));
    }
}
