use serde::{Deserialize, Serialize};

/// Region of interest as fractions of the capture surface
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NormalizedRoi {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Pixel rectangle on the capture surface
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl NormalizedRoi {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Validate that the rectangle lies within the unit square and is non-empty
    pub fn validate(&self) -> Result<(), String> {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(self.x) || !in_unit(self.y) {
            return Err(format!("ROI origin ({}, {}) outside [0,1]", self.x, self.y));
        }
        if !(self.w.is_finite() && self.w > 0.0) || !(self.h.is_finite() && self.h > 0.0) {
            return Err("ROI width and height must be positive".to_string());
        }
        if self.x + self.w > 1.0 + 1e-9 || self.y + self.h > 1.0 + 1e-9 {
            return Err("ROI extends past the capture surface".to_string());
        }
        Ok(())
    }

    /// Scale to pixels on a `surface_w` x `surface_h` surface.
    ///
    /// Returns `None` when the surface is empty or the origin falls outside it.
    pub fn to_pixels(&self, surface_w: u32, surface_h: u32) -> Option<PixelRect> {
        if surface_w == 0 || surface_h == 0 {
            return None;
        }
        let x = (self.x * surface_w as f64).round().max(0.0) as u32;
        let y = (self.y * surface_h as f64).round().max(0.0) as u32;
        if x >= surface_w || y >= surface_h {
            return None;
        }
        let width = ((self.w * surface_w as f64).round() as u32).max(1);
        let height = ((self.h * surface_h as f64).round() as u32).max(1);
        Some(PixelRect {
            x,
            y,
            width: width.min(surface_w - x),
            height: height.min(surface_h - y),
        })
    }
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn x2(&self) -> u32 {
        self.x + self.width
    }

    pub fn y2(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Grow to at least `min_w` x `min_h` around the original center,
    /// limited by the surface.
    pub fn pad_to_min(&self, min_w: u32, min_h: u32, surface_w: u32, surface_h: u32) -> PixelRect {
        let mut padded = *self;
        if padded.width < min_w {
            let delta = min_w - padded.width;
            let new_x = padded.x.saturating_sub(delta / 2);
            let new_w = surface_w.saturating_sub(new_x).min(padded.width + delta);
            if new_w > padded.width {
                padded.x = new_x;
                padded.width = new_w;
            }
        }
        if padded.height < min_h {
            let delta = min_h - padded.height;
            let new_y = padded.y.saturating_sub(delta / 2);
            let new_h = surface_h.saturating_sub(new_y).min(padded.height + delta);
            if new_h > padded.height {
                padded.y = new_y;
                padded.height = new_h;
            }
        }
        padded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_roi_validation() {
        assert!(NormalizedRoi::new(0.1, 0.2, 0.3, 0.05).validate().is_ok());
        assert!(NormalizedRoi::new(-0.1, 0.2, 0.3, 0.05).validate().is_err());
        assert!(NormalizedRoi::new(0.1, 0.2, 0.0, 0.05).validate().is_err());
        assert!(NormalizedRoi::new(0.8, 0.2, 0.3, 0.05).validate().is_err());
    }

    #[test]
    fn test_to_pixels_rounds() {
        let roi = NormalizedRoi::new(0.25, 0.5, 0.1, 0.02);
        let rect = roi.to_pixels(1000, 500).unwrap();
        assert_eq!(rect, PixelRect::new(250, 250, 100, 10));
    }

    #[test]
    fn test_to_pixels_minimum_size() {
        let roi = NormalizedRoi::new(0.0, 0.0, 0.0001, 0.0001);
        let rect = roi.to_pixels(100, 100).unwrap();
        assert_eq!(rect.width, 1);
        assert_eq!(rect.height, 1);
    }

    #[test]
    fn test_to_pixels_empty_surface() {
        let roi = NormalizedRoi::new(0.1, 0.1, 0.1, 0.1);
        assert!(roi.to_pixels(0, 100).is_none());
    }

    #[test]
    fn test_pad_to_min() {
        let rect = PixelRect::new(100, 50, 40, 10);
        let padded = rect.pad_to_min(80, 22, 1920, 1080);
        assert_eq!(padded.width, 80);
        assert_eq!(padded.height, 22);
        assert_eq!((padded.x, padded.y), (80, 44), "Padding is centered");

        // Near the surface edge only the available room is used
        let edge = PixelRect::new(1900, 1075, 10, 4);
        let padded = edge.pad_to_min(80, 22, 1920, 1080);
        assert_eq!(padded.width, 55);
        assert_eq!(padded.height, 14);
        assert_eq!(padded.x2(), 1920);
        assert_eq!(padded.y2(), 1080);
    }

    #[test]
    fn test_rect_bounds() {
        let rect = PixelRect::new(100, 200, 300, 400);
        assert_eq!(rect.x2(), 400);
        assert_eq!(rect.y2(), 600);
        assert_eq!(rect.area(), 120_000);
        assert!(rect.is_valid());
        assert!(!PixelRect::new(0, 0, 0, 5).is_valid());
    }

    #[test]
    fn test_roi_serialization() {
        let roi = NormalizedRoi::new(0.1, 0.2, 0.3, 0.4);
        let json = serde_json::to_string(&roi).unwrap();
        let back: NormalizedRoi = serde_json::from_str(&json).unwrap();
        assert_eq!(roi, back);
    }
}
