use crate::error::{PixelError, Result};
use crate::models::config::PreprocessingConfig;
use crate::models::element::Element;
use crate::models::raw_image::{Channels, RawImage};
use crate::models::roi::PixelRect;
use crate::services::ocr::pixel_ops;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use std::io::Cursor;

/// Color mask families used to isolate HUD text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskStyle {
    /// Gold experience digits
    Gold,
    /// Gold with looser hue/saturation bounds
    GoldWide,
    /// Low-saturation bright text
    White,
    /// Plain luminance threshold
    Bright,
}

impl MaskStyle {
    pub fn default_scale(self) -> f64 {
        match self {
            MaskStyle::Gold | MaskStyle::GoldWide => 5.0,
            MaskStyle::White | MaskStyle::Bright => 6.0,
        }
    }

    /// HSV bounds and closing kernel size for the color masks
    fn hsv_params(self) -> Option<([u8; 3], [u8; 3], u32)> {
        match self {
            MaskStyle::Gold => Some(([15, 90, 120], [42, 255, 255], 3)),
            MaskStyle::GoldWide => Some(([12, 60, 100], [48, 255, 255], 3)),
            MaskStyle::White => Some(([0, 0, 180], [179, 70, 255], 2)),
            MaskStyle::Bright => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            MaskStyle::Gold => "gold",
            MaskStyle::GoldWide => "goldwide",
            MaskStyle::White => "white",
            MaskStyle::Bright => "bright",
        }
    }
}

const BRIGHT_THRESHOLD: u8 = 180;

/// Image preprocessing service: codec, scaling, text masks and capture checks
pub struct PreprocessingService {
    config: PreprocessingConfig,
}

impl PreprocessingService {
    /// Create a new preprocessing service with custom configuration
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }

    /// Create a preprocessing service with default configuration
    pub fn default() -> Self {
        Self {
            config: PreprocessingConfig::default(),
        }
    }

    /// Decode a PNG into a BGR raster
    pub fn decode_png(&self, png: &[u8]) -> Result<RawImage> {
        let rgb = image::load_from_memory_with_format(png, ImageFormat::Png)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut data = rgb.into_raw();
        data.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
        Ok(RawImage::new(data, width, height, Channels::Bgr)?)
    }

    /// Encode a raster as PNG for the recognition engine
    pub fn encode_png(&self, img: &RawImage) -> Result<Vec<u8>> {
        let buffer_error = || PixelError::BufferLength {
            expected: img.pixel_count() * img.channels().count() as usize,
            actual: img.data().len(),
        };
        let dynamic = match img.channels() {
            Channels::Gray => DynamicImage::ImageLuma8(
                ImageBuffer::<Luma<u8>, _>::from_raw(img.width(), img.height(), img.data().to_vec())
                    .ok_or_else(buffer_error)?,
            ),
            Channels::Bgr => {
                let mut rgb = img.data().to_vec();
                rgb.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
                DynamicImage::ImageRgb8(
                    ImageBuffer::<Rgb<u8>, _>::from_raw(img.width(), img.height(), rgb)
                        .ok_or_else(buffer_error)?,
                )
            }
        };

        let mut out = Cursor::new(Vec::new());
        dynamic.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    /// Convert a BGR capture to grayscale
    pub fn to_grayscale(&self, bgr: &RawImage) -> std::result::Result<RawImage, PixelError> {
        pixel_ops::bgr_to_gray(bgr)
    }

    /// Cubic resampling by `factor`; works on any channel layout, HSV included
    pub fn resize(&self, img: &RawImage, factor: f64) -> std::result::Result<RawImage, PixelError> {
        let new_w = ((img.width() as f64 * factor).round() as u32).max(1);
        let new_h = ((img.height() as f64 * factor).round() as u32).max(1);
        if img.is_empty() {
            return Ok(img.clone());
        }
        let buffer_error = || PixelError::BufferLength {
            expected: img.pixel_count() * img.channels().count() as usize,
            actual: img.data().len(),
        };

        let data = match img.channels() {
            Channels::Gray => {
                let buf = ImageBuffer::<Luma<u8>, _>::from_raw(img.width(), img.height(), img.data().to_vec())
                    .ok_or_else(buffer_error)?;
                imageops::resize(&buf, new_w, new_h, FilterType::CatmullRom).into_raw()
            }
            // channel order does not matter to the resampler
            Channels::Bgr => {
                let buf = ImageBuffer::<Rgb<u8>, _>::from_raw(img.width(), img.height(), img.data().to_vec())
                    .ok_or_else(buffer_error)?;
                imageops::resize(&buf, new_w, new_h, FilterType::CatmullRom).into_raw()
            }
        };
        RawImage::new(data, new_w, new_h, img.channels())
    }

    /// Grayscale, upscale, then stretch to the full 0..255 range
    pub fn prep_gray(&self, bgr: &RawImage, scale: f64) -> std::result::Result<RawImage, PixelError> {
        let gray = self.to_grayscale(bgr)?;
        let scaled = self.resize(&gray, scale)?;
        pixel_ops::normalize(&scaled)
    }

    /// Build a text mask of the given style at `scale`
    pub fn extract_mask(
        &self,
        bgr: &RawImage,
        style: MaskStyle,
        scale: f64,
    ) -> std::result::Result<RawImage, PixelError> {
        match style.hsv_params() {
            Some((low, high, kernel)) => {
                // HSV is resized, not the BGR source
                let hsv = pixel_ops::bgr_to_hsv(bgr)?;
                let scaled = self.resize(&hsv, scale)?;
                let mask = pixel_ops::hsv_in_range(&scaled, low, high)?;
                pixel_ops::morph_close(&mask, kernel, kernel, 2)
            }
            None => {
                let gray = self.to_grayscale(bgr)?;
                let scaled = self.resize(&gray, scale)?;
                let mask = pixel_ops::threshold_binary(&scaled, BRIGHT_THRESHOLD)?;
                pixel_ops::clear_border(&mask, (scale * 2.0).round() as u32)
            }
        }
    }

    /// Crop a pixel rectangle out of a capture
    pub fn crop(&self, img: &RawImage, rect: PixelRect) -> std::result::Result<RawImage, PixelError> {
        pixel_ops::crop(img, rect.x, rect.y, rect.width, rect.height)
    }

    /// Estimate how much of a horizontal progress bar is filled, from its
    /// blue fill color. Returns a ratio in [0,1], `Some(0.0)` for an empty
    /// bar and `None` when the region does not look like a bar.
    pub fn estimate_fill_ratio(&self, bgr: &RawImage) -> std::result::Result<Option<f64>, PixelError> {
        let (w, h) = (bgr.width(), bgr.height());
        if h < 6 || w < 10 {
            return Ok(None);
        }
        if bgr.channels() != Channels::Bgr {
            return Err(PixelError::ChannelMismatch {
                op: "estimate_fill_ratio",
                expected: 3,
                actual: bgr.channels().count(),
            });
        }

        let top = (h as f64 * 0.2).floor() as u32;
        let bottom = (top + 1).max((h as f64 * 0.8).floor() as u32).min(h);
        let band = pixel_ops::crop(bgr, 0, top, w, bottom - top)?;

        let mut mask = fill_mask(&band, true)?;
        if mask.count_nonzero() == 0 {
            let lower_top = (h as f64 * 0.45).floor() as u32;
            let lower = pixel_ops::crop(bgr, 0, lower_top, w, h - lower_top)?;
            mask = fill_mask(&lower, false)?;
            if mask.count_nonzero() == 0 {
                return Ok(Some(0.0));
            }
        }

        if (mask.count_nonzero() as f64 / mask.data().len() as f64) < 0.02 {
            return Ok(Some(0.0));
        }

        // ignore the right-most 10%, where percentage text usually sits
        let cutoff = (w as f64 * 0.9).floor() as u32;
        let mut min_col = w;
        let mut max_col = 0;
        for y in 0..mask.height() {
            for x in 0..cutoff {
                if mask.get(x, y, 0) > 0 {
                    min_col = min_col.min(x);
                    max_col = max_col.max(x);
                }
            }
        }
        if min_col > max_col {
            return Ok(None);
        }

        let mut span = max_col - min_col + 1;
        let span_ratio = span as f64 / w as f64;
        if span_ratio > 0.1 && span_ratio < 0.9 {
            // gradient fade-out at the fill edge
            span = (w - min_col).min(span + 6);
        }

        if span < 4u32.max((w as f64 * 0.03).floor() as u32) {
            return Ok(None);
        }
        if min_col as f64 > w as f64 * 0.45 {
            return Ok(None);
        }

        let denom = (w - min_col).max(1) as f64;
        Ok(Some((span as f64 / denom).clamp(0.0, 1.0)))
    }

    /// True when the luma range of a capture is within the configured tolerance
    pub fn is_nearly_uniform(&self, bgr: &RawImage) -> bool {
        if bgr.is_empty() || bgr.channels() != Channels::Bgr {
            return true;
        }
        let mut min_lum = f64::MAX;
        let mut max_lum = f64::MIN;
        for px in bgr.data().chunks_exact(3) {
            let lum = (299.0 * px[2] as f64 + 587.0 * px[1] as f64 + 114.0 * px[0] as f64) / 1000.0;
            min_lum = min_lum.min(lum);
            max_lum = max_lum.max(lum);
            if max_lum - min_lum > self.config.uniform_luma_range {
                return false;
            }
        }
        max_lum - min_lum <= self.config.uniform_luma_range
    }

    /// Whether a red or green health bar occupies enough of the region
    pub fn detect_hp_bar(&self, bgr: &RawImage) -> bool {
        if bgr.is_empty() || bgr.channels() != Channels::Bgr {
            return false;
        }
        let hp_pixels = bgr
            .data()
            .chunks_exact(3)
            .filter(|px| {
                let (h, s, v) = rgb_to_hsv(px[2] as f64, px[1] as f64, px[0] as f64);
                if s < 0.25 || v < 0.20 {
                    return false;
                }
                h <= 20.0 || h >= 340.0 || (80.0..=160.0).contains(&h)
            })
            .count();
        hp_pixels as f64 / bgr.pixel_count() as f64 >= self.config.hp_bar_min_ratio
    }

    /// Classify the element icon in the center of `bgr`
    pub fn detect_element(&self, bgr: &RawImage) -> Option<Element> {
        if bgr.is_empty() || bgr.channels() != Channels::Bgr {
            return None;
        }
        let (width, height) = (bgr.width() as f64, bgr.height() as f64);
        let start_x = (width * 0.25).floor() as u32;
        let end_x = (width * 0.75).ceil() as u32;
        let start_y = (height * 0.25).floor() as u32;
        let end_y = (height * 0.75).ceil() as u32;
        let total = (end_x - start_x) as u64 * (end_y - start_y) as u64;

        let (mut sum_r, mut sum_g, mut sum_b, mut total_weight) = (0.0, 0.0, 0.0, 0.0);
        let mut survived = 0u64;
        for y in start_y..end_y {
            for x in start_x..end_x {
                let [b, g, r] = bgr.bgr_at(x, y);
                let (r, g, b) = (r as f64, g as f64, b as f64);
                let (ph, ps, pv) = rgb_to_hsv(r, g, b);
                // white text, dark shadow and the golden ring around the icon
                if (pv > 0.78 && ps < 0.15) || pv < 0.10 || ((20.0..=50.0).contains(&ph) && ps < 0.3) {
                    continue;
                }
                let w = 0.2 + ps;
                sum_r += r * w;
                sum_g += g * w;
                sum_b += b * w;
                total_weight += w;
                survived += 1;
            }
        }

        if total_weight == 0.0 {
            return None;
        }
        if total > 0 && (survived as f64 / total as f64) < 0.15 {
            return None;
        }

        let avg = [sum_r / total_weight, sum_g / total_weight, sum_b / total_weight];
        let (h, s, v) = rgb_to_hsv(avg[0], avg[1], avg[2]);
        if s > 0.12 && v > 0.25 {
            return Some(Element::from_hue(h));
        }

        Element::ALL
            .iter()
            .map(|&element| {
                let reference = element.reference_rgb();
                let dist = (0..3)
                    .map(|i| (avg[i] - reference[i]).powi(2))
                    .sum::<f64>()
                    .sqrt();
                (element, dist)
            })
            .fold(None, |best: Option<(Element, f64)>, cur| match best {
                Some(b) if b.1 <= cur.1 => Some(b),
                _ => Some(cur),
            })
            .filter(|(_, dist)| *dist <= 90.0)
            .map(|(element, _)| element)
    }
}

/// Blue fill mask for a progress bar band
fn fill_mask(band: &RawImage, tight: bool) -> std::result::Result<RawImage, PixelError> {
    let (low, high) = if tight {
        ([75, 40, 90], [125, 255, 255])
    } else {
        ([60, 25, 70], [140, 255, 255])
    };
    let hsv = pixel_ops::bgr_to_hsv(band)?;
    let hue_mask = pixel_ops::hsv_in_range(&hsv, low, high)?;

    let heuristic = RawImage::new(
        band.data()
            .chunks_exact(3)
            .map(|px| {
                let (b, g, r) = (px[0] as i32, px[1] as i32, px[2] as i32);
                if b - r > 40 && b - g > 10 && b > 90 {
                    255
                } else {
                    0
                }
            })
            .collect(),
        band.width(),
        band.height(),
        Channels::Gray,
    )?;

    let combined = pixel_ops::bitwise_or(&hue_mask, &heuristic)?;
    let closed = pixel_ops::morph_close(&combined, 3, 1, 1)?;
    if tight {
        Ok(closed)
    } else {
        // merge split bar segments
        pixel_ops::dilate(&closed, 5, 1, 1)
    }
}

/// Convert RGB to HSV with hue in degrees and saturation/value in [0,1]
fn rgb_to_hsv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let (r, g, b) = (r / 255.0, g / 255.0, b / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let mut h = 0.0;
    if delta != 0.0 {
        h = if max == r {
            (g - b) / delta + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / delta + 2.0
        } else {
            (r - g) / delta + 4.0
        };
        h *= 60.0;
    }
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: a bar whose left `fill` fraction is blue, the rest dark gray
    fn bar(width: u32, height: u32, fill: f64) -> RawImage {
        let edge = (width as f64 * fill) as u32;
        RawImage::bgr_from_fn(width, height, |x, _| {
            if x < edge {
                [200, 100, 30]
            } else {
                [25, 25, 25]
            }
        })
    }

    /// Helper: gold digits-like blob on a dark background
    fn gold_patch() -> RawImage {
        RawImage::bgr_from_fn(20, 10, |x, y| {
            if (5..15).contains(&x) && (3..7).contains(&y) {
                // BGR for a saturated gold (hue ~ 25)
                [20, 180, 230]
            } else {
                [10, 10, 10]
            }
        })
    }

    #[test]
    fn test_png_roundtrip_keeps_channel_order() {
        let service = PreprocessingService::default();
        let img = RawImage::bgr_from_fn(3, 2, |x, y| [x as u8 * 50, y as u8 * 80, 200]);
        let png = service.encode_png(&img).unwrap();
        let back = service.decode_png(&png).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn test_encode_gray_png() {
        let service = PreprocessingService::default();
        let mask = RawImage::gray_from_fn(4, 4, |x, _| if x < 2 { 0 } else { 255 });
        let png = service.encode_png(&mask).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let service = PreprocessingService::default();
        assert!(service.decode_png(b"not a png").is_err());
    }

    #[test]
    fn test_resize_dimensions() {
        let service = PreprocessingService::default();
        let gray = RawImage::gray_from_fn(10, 3, |x, _| x as u8 * 20);
        let scaled = service.resize(&gray, 2.5).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (25, 8));

        let color = RawImage::bgr_from_fn(4, 4, |_, _| [1, 2, 3]);
        let scaled = service.resize(&color, 5.0).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (20, 20));
        assert_eq!(scaled.channels(), Channels::Bgr);
        assert_eq!(scaled.bgr_at(10, 10), [1, 2, 3], "Flat input stays flat");
    }

    #[test]
    fn test_prep_gray_stretches() {
        let service = PreprocessingService::default();
        let img = RawImage::bgr_from_fn(8, 4, |x, _| if x < 4 { [60, 60, 60] } else { [120, 120, 120] });
        let prepped = service.prep_gray(&img, 4.0).unwrap();
        assert_eq!((prepped.width(), prepped.height()), (32, 16));
        assert_eq!(prepped.data().iter().copied().min(), Some(0));
        assert_eq!(prepped.data().iter().copied().max(), Some(255));
    }

    #[test]
    fn test_gold_mask_finds_gold() {
        let service = PreprocessingService::default();
        let mask = service
            .extract_mask(&gold_patch(), MaskStyle::Gold, MaskStyle::Gold.default_scale())
            .unwrap();
        assert_eq!((mask.width(), mask.height()), (100, 50));
        assert!(mask.is_binary());
        assert!(mask.get(50, 25, 0) == 255, "Center of the gold blob should be set");
        assert_eq!(mask.get(2, 2, 0), 0);
    }

    #[test]
    fn test_white_mask_ignores_gold() {
        let service = PreprocessingService::default();
        let mask = service.extract_mask(&gold_patch(), MaskStyle::White, 6.0).unwrap();
        assert_eq!(mask.count_nonzero(), 0);
    }

    #[test]
    fn test_bright_mask_clears_border() {
        let service = PreprocessingService::default();
        let white = RawImage::bgr_from_fn(10, 5, |_, _| [255, 255, 255]);
        let mask = service.extract_mask(&white, MaskStyle::Bright, 2.0).unwrap();
        assert_eq!((mask.width(), mask.height()), (20, 10));
        assert_eq!(mask.get(0, 0, 0), 0);
        assert_eq!(mask.get(3, 3, 0), 0, "Border of 4 px is cleared");
        assert_eq!(mask.get(10, 5, 0), 255);
    }

    #[test]
    fn test_fill_ratio_half_bar() {
        let service = PreprocessingService::default();
        let ratio = service.estimate_fill_ratio(&bar(400, 20, 0.5)).unwrap().unwrap();
        assert!((ratio - 0.515).abs() < 0.02, "Expected about 0.515, got {}", ratio);
    }

    #[test]
    fn test_fill_ratio_empty_bar() {
        let service = PreprocessingService::default();
        let dark = RawImage::bgr_from_fn(200, 20, |_, _| [20, 20, 20]);
        assert_eq!(service.estimate_fill_ratio(&dark).unwrap(), Some(0.0));
    }

    #[test]
    fn test_fill_ratio_too_small() {
        let service = PreprocessingService::default();
        assert_eq!(service.estimate_fill_ratio(&bar(9, 20, 0.5)).unwrap(), None);
        assert_eq!(service.estimate_fill_ratio(&bar(100, 5, 0.5)).unwrap(), None);
    }

    #[test]
    fn test_fill_ratio_rejects_right_side_blob() {
        let service = PreprocessingService::default();
        let img = RawImage::bgr_from_fn(200, 20, |x, _| {
            if (120..170).contains(&x) {
                [200, 100, 30]
            } else {
                [20, 20, 20]
            }
        });
        assert_eq!(service.estimate_fill_ratio(&img).unwrap(), None);
    }

    #[test]
    fn test_fill_ratio_stays_in_unit_range() {
        let service = PreprocessingService::default();
        for fill in [0.05, 0.3, 0.75, 1.0] {
            if let Some(ratio) = service.estimate_fill_ratio(&bar(300, 16, fill)).unwrap() {
                assert!((0.0..=1.0).contains(&ratio), "fill {} gave {}", fill, ratio);
            }
        }
    }

    #[test]
    fn test_uniform_detection() {
        let service = PreprocessingService::default();
        let flat = RawImage::bgr_from_fn(10, 10, |x, _| [40, 40, 40 + (x % 3) as u8]);
        assert!(service.is_nearly_uniform(&flat));
        let text = RawImage::bgr_from_fn(10, 10, |x, _| if x == 5 { [255, 255, 255] } else { [0, 0, 0] });
        assert!(!service.is_nearly_uniform(&text));
    }

    #[test]
    fn test_detect_hp_bar() {
        let service = PreprocessingService::default();
        let red = RawImage::bgr_from_fn(50, 8, |x, _| if x < 20 { [20, 20, 200] } else { [30, 30, 30] });
        assert!(service.detect_hp_bar(&red));
        let gray = RawImage::bgr_from_fn(50, 8, |_, _| [120, 120, 120]);
        assert!(!service.detect_hp_bar(&gray));
    }

    #[test]
    fn test_detect_element_by_hue() {
        let service = PreprocessingService::default();
        let fire = RawImage::bgr_from_fn(12, 12, |_, _| [30, 40, 200]);
        assert_eq!(service.detect_element(&fire), Some(Element::Fire));
        let water = RawImage::bgr_from_fn(12, 12, |_, _| [200, 120, 30]);
        assert_eq!(service.detect_element(&water), Some(Element::Water));
        let wind = RawImage::bgr_from_fn(12, 12, |_, _| [40, 180, 60]);
        assert_eq!(service.detect_element(&wind), Some(Element::Wind));
    }

    #[test]
    fn test_detect_element_reference_fallback() {
        let service = PreprocessingService::default();
        // too desaturated for hue classification, nearest to the water reference
        let muted = RawImage::bgr_from_fn(12, 12, |_, _| [136, 132, 128]);
        assert_eq!(service.detect_element(&muted), Some(Element::Water));
    }

    #[test]
    fn test_detect_element_none_on_text() {
        let service = PreprocessingService::default();
        let white = RawImage::bgr_from_fn(12, 12, |_, _| [250, 250, 250]);
        assert_eq!(service.detect_element(&white), None);
    }
}
