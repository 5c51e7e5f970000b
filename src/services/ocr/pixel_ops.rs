//! Pixel-level image operations over [`RawImage`].
//!
//! Every function is pure and deterministic. Row-parallel passes write
//! disjoint output rows, so results are identical to a sequential run.

use crate::error::PixelError;
use crate::models::raw_image::{Channels, RawImage};
use rayon::prelude::*;

fn require(src: &RawImage, channels: Channels, op: &'static str) -> Result<(), PixelError> {
    if src.channels() != channels {
        return Err(PixelError::ChannelMismatch {
            op,
            expected: channels.count(),
            actual: src.channels().count(),
        });
    }
    Ok(())
}

/// Map every sample of a grayscale image through `f`
fn map_gray(src: &RawImage, f: impl Fn(u8) -> u8 + Sync) -> RawImage {
    let data: Vec<u8> = src.data().par_iter().map(|&v| f(v)).collect();
    RawImage::from_parts(data, src.width(), src.height(), Channels::Gray)
}

// ---------------------------------------------------------------------------
// Color conversion
// ---------------------------------------------------------------------------

/// HSV for one BGR pixel: hue in [0,180), saturation and value in [0,255]
pub fn hsv_pixel(b: u8, g: u8, r: u8) -> [u8; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let d = (max - min) as f64;

    let s = if max == 0 {
        0
    } else {
        (d / max as f64 * 255.0).round() as u8
    };

    let (rf, gf, bf) = (r as f64, g as f64, b as f64);
    let mut h = 0.0;
    if d != 0.0 {
        // argmax checked in r, g, b order so ties resolve the same way every time
        if max == r {
            h = 30.0 * ((gf - bf) / d + if g < b { 6.0 } else { 0.0 });
        } else if max == g {
            h = 30.0 * ((bf - rf) / d + 2.0);
        } else {
            h = 30.0 * ((rf - gf) / d + 4.0);
        }
    }
    let mut h = h.round() as i32;
    if h < 0 {
        h += 180;
    }
    if h >= 180 {
        h -= 180;
    }

    [h as u8, s, max]
}

/// Convert a BGR image to the integer-hue HSV convention
pub fn bgr_to_hsv(src: &RawImage) -> Result<RawImage, PixelError> {
    require(src, Channels::Bgr, "bgr_to_hsv")?;
    let mut out = vec![0u8; src.data().len()];
    out.par_chunks_mut(3)
        .zip(src.data().par_chunks(3))
        .for_each(|(dst, px)| dst.copy_from_slice(&hsv_pixel(px[0], px[1], px[2])));
    Ok(RawImage::from_parts(out, src.width(), src.height(), Channels::Bgr))
}

/// Luma with fixed weights `0.114 B + 0.587 G + 0.299 R`, rounded
pub fn bgr_to_gray(src: &RawImage) -> Result<RawImage, PixelError> {
    require(src, Channels::Bgr, "bgr_to_gray")?;
    let out: Vec<u8> = src
        .data()
        .par_chunks(3)
        .map(|px| (0.114 * px[0] as f64 + 0.587 * px[1] as f64 + 0.299 * px[2] as f64).round() as u8)
        .collect();
    Ok(RawImage::from_parts(out, src.width(), src.height(), Channels::Gray))
}

// ---------------------------------------------------------------------------
// Range filtering
// ---------------------------------------------------------------------------

/// 255 where every HSV component lies within the inclusive bounds, else 0
pub fn hsv_in_range(hsv: &RawImage, low: [u8; 3], high: [u8; 3]) -> Result<RawImage, PixelError> {
    require(hsv, Channels::Bgr, "hsv_in_range")?;
    let out: Vec<u8> = hsv
        .data()
        .par_chunks(3)
        .map(|px| {
            let inside = (0..3).all(|c| px[c] >= low[c] && px[c] <= high[c]);
            if inside {
                255
            } else {
                0
            }
        })
        .collect();
    Ok(RawImage::from_parts(out, hsv.width(), hsv.height(), Channels::Gray))
}

// ---------------------------------------------------------------------------
// Morphology
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Extreme {
    Max,
    Min,
}

impl Extreme {
    fn identity(self) -> u8 {
        match self {
            Extreme::Max => 0,
            Extreme::Min => 255,
        }
    }

    fn pick(self, a: u8, b: u8) -> u8 {
        match self {
            Extreme::Max => a.max(b),
            Extreme::Min => a.min(b),
        }
    }
}

/// Separable rectangular max/min filter, window clipped at the borders
fn rank_filter(data: &[u8], width: usize, height: usize, hw: usize, hh: usize, ext: Extreme) -> Vec<u8> {
    let mut tmp = vec![0u8; data.len()];
    tmp.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let src = &data[y * width..(y + 1) * width];
        for (x, dst) in row.iter_mut().enumerate() {
            let lo = x.saturating_sub(hw);
            let hi = (x + hw).min(width - 1);
            *dst = src[lo..=hi]
                .iter()
                .fold(ext.identity(), |acc, &v| ext.pick(acc, v));
        }
    });

    let mut out = vec![0u8; data.len()];
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let lo = y.saturating_sub(hh);
        let hi = (y + hh).min(height - 1);
        for (x, dst) in row.iter_mut().enumerate() {
            let mut acc = ext.identity();
            for ny in lo..=hi {
                acc = ext.pick(acc, tmp[ny * width + x]);
            }
            *dst = acc;
        }
    });
    out
}

fn morph(
    src: &RawImage,
    kw: u32,
    kh: u32,
    iterations: u32,
    ext: Extreme,
    op: &'static str,
) -> Result<RawImage, PixelError> {
    require(src, Channels::Gray, op)?;
    if src.is_empty() {
        return Ok(src.clone());
    }
    let (width, height) = (src.width() as usize, src.height() as usize);
    let (hw, hh) = ((kw / 2) as usize, (kh / 2) as usize);

    let mut data = src.data().to_vec();
    for _ in 0..iterations {
        data = rank_filter(&data, width, height, hw, hh, ext);
    }
    Ok(RawImage::from_parts(data, src.width(), src.height(), Channels::Gray))
}

/// Dilate with a `kw x kh` rectangular kernel
pub fn dilate(src: &RawImage, kw: u32, kh: u32, iterations: u32) -> Result<RawImage, PixelError> {
    morph(src, kw, kh, iterations, Extreme::Max, "dilate")
}

/// Erode with a `kw x kh` rectangular kernel
pub fn erode(src: &RawImage, kw: u32, kh: u32, iterations: u32) -> Result<RawImage, PixelError> {
    morph(src, kw, kh, iterations, Extreme::Min, "erode")
}

/// Dilate then erode
pub fn morph_close(src: &RawImage, kw: u32, kh: u32, iterations: u32) -> Result<RawImage, PixelError> {
    erode(&dilate(src, kw, kh, iterations)?, kw, kh, iterations)
}

/// Erode then dilate
pub fn morph_open(src: &RawImage, kw: u32, kh: u32, iterations: u32) -> Result<RawImage, PixelError> {
    dilate(&erode(src, kw, kh, iterations)?, kw, kh, iterations)
}

// ---------------------------------------------------------------------------
// Thresholding
// ---------------------------------------------------------------------------

fn histogram(data: &[u8]) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for &v in data {
        hist[v as usize] += 1;
    }
    hist
}

/// Otsu's method. Returns the chosen threshold and the `> t -> 255` mask.
pub fn threshold_otsu(src: &RawImage) -> Result<(u8, RawImage), PixelError> {
    require(src, Channels::Gray, "threshold_otsu")?;
    let hist = histogram(src.data());
    let total = src.pixel_count() as f64;

    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_bg = 0.0;
    let mut w_bg = 0.0;
    let mut max_variance = -1.0;
    let mut best_t = 0u8;

    for (t, &count) in hist.iter().enumerate() {
        w_bg += count as f64;
        if w_bg == 0.0 {
            continue;
        }
        let w_fg = total - w_bg;
        if w_fg == 0.0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / w_bg;
        let mean_fg = (sum_all - sum_bg) / w_fg;
        let variance = w_bg * w_fg * (mean_bg - mean_fg) * (mean_bg - mean_fg);
        // strict comparison keeps the first maximum
        if variance > max_variance {
            max_variance = variance;
            best_t = t as u8;
        }
    }

    let mask = map_gray(src, |v| if v > best_t { 255 } else { 0 });
    Ok((best_t, mask))
}

/// Fixed threshold: `> thresh -> 255`
pub fn threshold_binary(src: &RawImage, thresh: u8) -> Result<RawImage, PixelError> {
    require(src, Channels::Gray, "threshold_binary")?;
    Ok(map_gray(src, |v| if v > thresh { 255 } else { 0 }))
}

/// Gaussian-weighted local mean threshold: `px > mean - c -> max_val`
pub fn adaptive_threshold_gaussian(
    src: &RawImage,
    max_val: u8,
    block_size: u32,
    c: f64,
) -> Result<RawImage, PixelError> {
    require(src, Channels::Gray, "adaptive_threshold_gaussian")?;
    if src.is_empty() {
        return Ok(src.clone());
    }
    let (width, height) = (src.width() as usize, src.height() as usize);
    let block = block_size.max(1) as usize;
    let half = block / 2;

    let sigma = block as f64 * 0.5;
    let mut kernel: Vec<f64> = (0..block)
        .map(|i| {
            let d = i as f64 - half as f64;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let k_sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= k_sum);

    let data = src.data();

    let mut tmp = vec![0f64; data.len()];
    tmp.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, dst) in row.iter_mut().enumerate() {
            let (mut sum, mut wt) = (0.0, 0.0);
            for (k, &w) in kernel.iter().enumerate() {
                let nx = x as isize + k as isize - half as isize;
                if nx < 0 || nx >= width as isize {
                    continue;
                }
                sum += data[y * width + nx as usize] as f64 * w;
                wt += w;
            }
            *dst = sum / wt;
        }
    });

    let mut out = vec![0u8; data.len()];
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, dst) in row.iter_mut().enumerate() {
            let (mut sum, mut wt) = (0.0, 0.0);
            for (k, &w) in kernel.iter().enumerate() {
                let ny = y as isize + k as isize - half as isize;
                if ny < 0 || ny >= height as isize {
                    continue;
                }
                sum += tmp[ny as usize * width + x] * w;
                wt += w;
            }
            let local_mean = sum / wt;
            *dst = if data[y * width + x] as f64 > local_mean - c {
                max_val
            } else {
                0
            };
        }
    });

    Ok(RawImage::from_parts(out, src.width(), src.height(), Channels::Gray))
}

// ---------------------------------------------------------------------------
// CLAHE
// ---------------------------------------------------------------------------

/// Contrast limited adaptive histogram equalization.
///
/// Each tile histogram is clipped at `max(1, round(clip * tile_area / 256))`,
/// the excess spread evenly with the remainder strided across the bins, and
/// output pixels blend the four nearest tile CDFs evaluated at tile centers.
pub fn clahe(src: &RawImage, clip_limit: f64, grid_w: u32, grid_h: u32) -> Result<RawImage, PixelError> {
    require(src, Channels::Gray, "clahe")?;
    if src.is_empty() {
        return Ok(src.clone());
    }
    let (width, height) = (src.width() as usize, src.height() as usize);
    let (grid_w, grid_h) = (grid_w.max(1) as usize, grid_h.max(1) as usize);
    let tile_w = width.div_ceil(grid_w);
    let tile_h = height.div_ceil(grid_h);
    let clip_count = ((clip_limit * (tile_w * tile_h) as f64 / 256.0).round() as u64).max(1);
    let data = src.data();

    let tiles: Vec<([u64; 256], u64)> = (0..grid_w * grid_h)
        .into_par_iter()
        .map(|idx| {
            let (tx, ty) = (idx % grid_w, idx / grid_w);
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u64; 256];
            let mut count = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[data[y * width + x] as usize] += 1;
                    count += 1;
                }
            }

            let mut excess = 0u64;
            for bin in hist.iter_mut() {
                if *bin > clip_count {
                    excess += *bin - clip_count;
                    *bin = clip_count;
                }
            }
            let avg_add = excess / 256;
            let remainder = excess - avg_add * 256;
            hist.iter_mut().for_each(|bin| *bin += avg_add);
            let step = ((256 / (remainder + 1)) as usize).max(1);
            let mut left = remainder;
            let mut i = 0;
            while i < 256 && left > 0 {
                hist[i] += 1;
                i += step;
                left -= 1;
            }

            let mut cdf = [0u64; 256];
            let mut acc = 0u64;
            for (slot, &bin) in cdf.iter_mut().zip(hist.iter()) {
                acc += bin;
                *slot = acc;
            }
            (cdf, count)
        })
        .collect();

    let map_val = |tx: usize, ty: usize, px: u8| -> f64 {
        let (cdf, count) = &tiles[ty * grid_w + tx];
        if *count == 0 {
            return px as f64;
        }
        (cdf[px as usize] as f64 / *count as f64 * 255.0).round()
    };

    let mut out = vec![0u8; data.len()];
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let f_ty = (y as f64 + 0.5) / tile_h as f64 - 0.5;
        let ty0 = f_ty.floor().max(0.0) as usize;
        let ty1 = (ty0 + 1).min(grid_h - 1);
        let ay = (f_ty - ty0 as f64).clamp(0.0, 1.0);

        for (x, dst) in row.iter_mut().enumerate() {
            let px = data[y * width + x];
            let f_tx = (x as f64 + 0.5) / tile_w as f64 - 0.5;
            let tx0 = f_tx.floor().max(0.0) as usize;
            let tx1 = (tx0 + 1).min(grid_w - 1);
            let ax = (f_tx - tx0 as f64).clamp(0.0, 1.0);

            let top = map_val(tx0, ty0, px) * (1.0 - ax) + map_val(tx1, ty0, px) * ax;
            let bottom = map_val(tx0, ty1, px) * (1.0 - ax) + map_val(tx1, ty1, px) * ax;
            let val = (top * (1.0 - ay) + bottom * ay).round();
            *dst = val.clamp(0.0, 255.0) as u8;
        }
    });

    Ok(RawImage::from_parts(out, src.width(), src.height(), Channels::Gray))
}

// ---------------------------------------------------------------------------
// Utility ops
// ---------------------------------------------------------------------------

pub fn invert(src: &RawImage) -> Result<RawImage, PixelError> {
    require(src, Channels::Gray, "invert")?;
    Ok(map_gray(src, |v| 255 - v))
}

pub fn bitwise_or(a: &RawImage, b: &RawImage) -> Result<RawImage, PixelError> {
    require(a, Channels::Gray, "bitwise_or")?;
    require(b, Channels::Gray, "bitwise_or")?;
    if a.width() != b.width() || a.height() != b.height() {
        return Err(PixelError::SizeMismatch {
            op: "bitwise_or",
            left_w: a.width(),
            left_h: a.height(),
            right_w: b.width(),
            right_h: b.height(),
        });
    }
    let out: Vec<u8> = a
        .data()
        .par_iter()
        .zip(b.data().par_iter())
        .map(|(&x, &y)| x | y)
        .collect();
    Ok(RawImage::from_parts(out, a.width(), a.height(), Channels::Gray))
}

/// Min-max stretch to 0..=255; a flat image maps to all zeros
pub fn normalize(src: &RawImage) -> Result<RawImage, PixelError> {
    require(src, Channels::Gray, "normalize")?;
    let min = src.data().iter().copied().min().unwrap_or(0);
    let max = src.data().iter().copied().max().unwrap_or(0);
    let range = (max - min) as f64;
    if range == 0.0 {
        return Ok(RawImage::zeros(src.width(), src.height(), Channels::Gray));
    }
    Ok(map_gray(src, |v| ((v - min) as f64 / range * 255.0).round() as u8))
}

/// Single channel of a BGR image (0 = blue, 1 = green, 2 = red)
pub fn extract_channel(src: &RawImage, ch: usize) -> Result<RawImage, PixelError> {
    require(src, Channels::Bgr, "extract_channel")?;
    let ch = ch.min(2);
    let out: Vec<u8> = src.data().par_chunks(3).map(|px| px[ch]).collect();
    Ok(RawImage::from_parts(out, src.width(), src.height(), Channels::Gray))
}

/// Zero a frame of `border` pixels around a grayscale image
pub fn clear_border(src: &RawImage, border: u32) -> Result<RawImage, PixelError> {
    require(src, Channels::Gray, "clear_border")?;
    if src.is_empty() {
        return Ok(src.clone());
    }
    let (width, height) = (src.width(), src.height());
    let mut out = src.data().to_vec();
    out.par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as u32;
            let edge_row = y < border || y + border >= height;
            for (x, v) in row.iter_mut().enumerate() {
                let x = x as u32;
                if edge_row || x < border || x + border >= width {
                    *v = 0;
                }
            }
        });
    Ok(RawImage::from_parts(out, width, height, Channels::Gray))
}

/// Copy out a `w x h` window starting at `(x, y)`
pub fn crop(src: &RawImage, x: u32, y: u32, w: u32, h: u32) -> Result<RawImage, PixelError> {
    if x.checked_add(w).map_or(true, |x2| x2 > src.width())
        || y.checked_add(h).map_or(true, |y2| y2 > src.height())
    {
        return Err(PixelError::CropOutOfBounds {
            x,
            y,
            w,
            h,
            width: src.width(),
            height: src.height(),
        });
    }
    let n = src.channels().count() as usize;
    let stride = src.width() as usize * n;
    let mut out = Vec::with_capacity(w as usize * h as usize * n);
    for row in y..y + h {
        let start = row as usize * stride + x as usize * n;
        out.extend_from_slice(&src.data()[start..start + w as usize * n]);
    }
    Ok(RawImage::from_parts(out, w, h, src.channels()))
}
