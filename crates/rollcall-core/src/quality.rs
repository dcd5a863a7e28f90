//! Quality Assessor for detected face regions.
//!
//! Scores a grayscale face crop on sharpness, brightness, contrast,
//! size, pose symmetry, and occlusion, then gates acceptability. Pure
//! pixel math over raw luma buffers; no side effects. A region that
//! cannot be assessed yields neutral mid-quality metrics rather than
//! failing the photo.

use crate::config::QualityConfig;
use crate::types::{BoundingBox, QualityMetrics};

/// Minimum crop side for the metrics to be meaningful.
const MIN_REGION_SIDE: usize = 8;

/// Gradient magnitude above which a pixel counts as an edge pixel for
/// the occlusion heuristic.
const EDGE_MAGNITUDE: f32 = 24.0;

/// Assess one detected face region of a grayscale photo.
///
/// `frame` is row-major luma, `width` x `height`. The bounding box is
/// clamped to the frame; a degenerate or out-of-frame region returns
/// [`QualityMetrics::neutral`].
pub fn assess(
    frame: &[u8],
    width: u32,
    height: u32,
    bbox: &BoundingBox,
    cfg: &QualityConfig,
) -> QualityMetrics {
    let crop = match crop_region(frame, width, height, bbox) {
        Some(c) => c,
        None => {
            tracing::debug!(
                x = bbox.x,
                y = bbox.y,
                w = bbox.width,
                h = bbox.height,
                "face region degenerate or outside frame; using neutral quality"
            );
            return QualityMetrics::neutral();
        }
    };
    score_crop(&crop, bbox.area(), cfg)
}

/// Assess a standalone face-crop buffer.
///
/// The whole buffer is the face region; `detected_area` is the
/// detector's bounding-box area in the source photo, which may differ
/// from the crop file's own resolution and is what the size score must
/// reflect.
pub fn assess_standalone_crop(
    frame: &[u8],
    width: u32,
    height: u32,
    detected_area: f32,
    cfg: &QualityConfig,
) -> QualityMetrics {
    let w = width as usize;
    let h = height as usize;
    if frame.len() < w * h || w < MIN_REGION_SIDE || h < MIN_REGION_SIDE {
        tracing::debug!(width, height, "crop degenerate; using neutral quality");
        return QualityMetrics::neutral();
    }
    let crop = Crop {
        pixels: frame[..w * h].to_vec(),
        w,
        h,
    };
    score_crop(&crop, detected_area, cfg)
}

/// Score an extracted face region. `detected_area` is the detection's
/// bounding-box area in source-photo pixels.
fn score_crop(crop: &Crop, detected_area: f32, cfg: &QualityConfig) -> QualityMetrics {
    let (mean, std_dev) = luma_stats(&crop.pixels);
    let lap_var = laplacian_variance(&crop.pixels, crop.w, crop.h);

    let sharpness = (lap_var / cfg.sharpness_norm).clamp(0.0, 1.0);
    let blurry = lap_var < cfg.blur_floor;

    let brightness = brightness_score(mean, cfg.ideal_luma_low, cfg.ideal_luma_high);
    let contrast = (std_dev / cfg.contrast_norm).clamp(0.0, 1.0);
    let size_score = (detected_area / cfg.ideal_face_area).clamp(0.0, 1.0);
    let pose_score = symmetry_score(&crop.pixels, crop.w, crop.h);

    let edge_density = lower_half_edge_density(&crop.pixels, crop.w, crop.h);
    let occluded = edge_density < cfg.occlusion_edge_floor;
    let occlusion_score = (edge_density / (cfg.occlusion_edge_floor * 2.0)).clamp(0.0, 1.0);

    let w = &cfg.weights;
    let overall = (w.sharpness * sharpness
        + w.brightness * brightness
        + w.contrast * contrast
        + w.size * size_score
        + w.pose * pose_score
        + w.occlusion * occlusion_score)
        .clamp(0.0, 1.0);

    let acceptable =
        !blurry && !occluded && overall >= cfg.min_overall && size_score >= cfg.min_size_score;

    QualityMetrics {
        sharpness,
        brightness,
        contrast,
        size_score,
        pose_score,
        occlusion_score,
        overall,
        acceptable,
    }
}

struct Crop {
    pixels: Vec<u8>,
    w: usize,
    h: usize,
}

/// Clamp the bounding box to the frame and copy the region out.
fn crop_region(frame: &[u8], width: u32, height: u32, bbox: &BoundingBox) -> Option<Crop> {
    if frame.len() < (width as usize) * (height as usize) {
        return None;
    }

    let x0 = bbox.x.max(0.0) as usize;
    let y0 = bbox.y.max(0.0) as usize;
    let x1 = ((bbox.x + bbox.width).min(width as f32)).max(0.0) as usize;
    let y1 = ((bbox.y + bbox.height).min(height as f32)).max(0.0) as usize;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let w = x1 - x0;
    let h = y1 - y0;
    if w < MIN_REGION_SIDE || h < MIN_REGION_SIDE {
        return None;
    }

    let mut pixels = Vec::with_capacity(w * h);
    for y in y0..y1 {
        let row = y * width as usize;
        pixels.extend_from_slice(&frame[row + x0..row + x1]);
    }
    Some(Crop { pixels, w, h })
}

/// Mean and standard deviation of luma.
fn luma_stats(pixels: &[u8]) -> (f32, f32) {
    let n = pixels.len() as f32;
    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    for &p in pixels {
        sum += p as u64;
        sum_sq += (p as u64) * (p as u64);
    }
    let mean = sum as f32 / n;
    let variance = (sum_sq as f32 / n - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

/// Variance of the 4-neighbor Laplacian over the interior pixels.
/// Higher = sharper; near zero = blurred or flat.
fn laplacian_variance(pixels: &[u8], w: usize, h: usize) -> f32 {
    if w < 3 || h < 3 {
        return 0.0;
    }
    let at = |x: usize, y: usize| pixels[y * w + x] as f32;

    let mut responses = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            responses.push(lap);
        }
    }

    let n = responses.len() as f32;
    let mean = responses.iter().sum::<f32>() / n;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f32>() / n
}

/// 1.0 inside the ideal luma band, falling off linearly to 0.0 at full
/// black / full white.
fn brightness_score(mean: f32, low: f32, high: f32) -> f32 {
    if mean >= low && mean <= high {
        1.0
    } else if mean < low {
        (mean / low).clamp(0.0, 1.0)
    } else {
        ((255.0 - mean) / (255.0 - high)).clamp(0.0, 1.0)
    }
}

/// Left/right symmetry as Pearson correlation between the left half
/// and the mirrored right half. Frontal faces score near 1.0.
fn symmetry_score(pixels: &[u8], w: usize, h: usize) -> f32 {
    let half = w / 2;
    if half == 0 {
        return 0.5;
    }

    let mut left = Vec::with_capacity(half * h);
    let mut right = Vec::with_capacity(half * h);
    for y in 0..h {
        for x in 0..half {
            left.push(pixels[y * w + x] as f32);
            right.push(pixels[y * w + (w - 1 - x)] as f32);
        }
    }

    let n = left.len() as f32;
    let mean_l = left.iter().sum::<f32>() / n;
    let mean_r = right.iter().sum::<f32>() / n;

    let mut cov = 0.0f32;
    let mut var_l = 0.0f32;
    let mut var_r = 0.0f32;
    for (l, r) in left.iter().zip(right.iter()) {
        let dl = l - mean_l;
        let dr = r - mean_r;
        cov += dl * dr;
        var_l += dl * dl;
        var_r += dr * dr;
    }

    let denom = (var_l * var_r).sqrt();
    if denom < 1e-6 {
        // Flat halves carry no asymmetry signal; treat as symmetric.
        return 1.0;
    }
    // Map correlation [-1, 1] to a [0, 1] score.
    ((cov / denom + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Fraction of lower-half pixels with a strong horizontal/vertical
/// gradient. Mouth/chin detail produces edges; a very low density
/// suggests the lower face is covered.
fn lower_half_edge_density(pixels: &[u8], w: usize, h: usize) -> f32 {
    let y_start = h / 2;
    if w < 2 || h - y_start < 2 {
        return 0.0;
    }
    let at = |x: usize, y: usize| pixels[y * w + x] as f32;

    let mut edges = 0usize;
    let mut total = 0usize;
    for y in y_start..h - 1 {
        for x in 0..w - 1 {
            let gx = at(x + 1, y) - at(x, y);
            let gy = at(x, y + 1) - at(x, y);
            if (gx * gx + gy * gy).sqrt() > EDGE_MAGNITUDE {
                edges += 1;
            }
            total += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        edges as f32 / total as f32
    }
}
