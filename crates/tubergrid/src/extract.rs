//! Blob-based seed extraction from a grayscale intensity field.
//!
//! Smooth, threshold relative to the image maximum, pick local maxima with
//! non-maximum suppression, then measure each peak with the same radial
//! sampler used for propagation evidence, but under the strict seed
//! thresholds. Candidates failing contrast, circularity, or the diameter
//! range are dropped.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::evidence::{EvidenceSource, EvidenceThresholds, ImageEvidence};
use crate::feature::Feature;

/// Seed extraction controls. Diameters are in pixels, already converted
/// from physical units by the calibration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractParams {
    /// Peak threshold as a fraction of the smoothed image maximum.
    pub threshold: f32,
    /// Gaussian sigma for pre-smoothing.
    pub smooth_sigma: f32,
    /// Non-maximum suppression radius in pixels.
    pub nms_radius: f64,
    /// Minimum peak-to-background contrast ratio (strict).
    pub min_contrast: f64,
    /// Minimum circularity for a seed (strict).
    pub circularity_floor: f64,
    /// Minimum accepted tubercle diameter in pixels.
    pub diameter_min_px: f64,
    /// Maximum accepted tubercle diameter in pixels.
    pub diameter_max_px: f64,
}

impl Default for ExtractParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            smooth_sigma: 1.0,
            nms_radius: 5.0,
            min_contrast: 1.5,
            circularity_floor: 0.6,
            diameter_min_px: 6.0,
            diameter_max_px: 24.0,
        }
    }
}

impl ExtractParams {
    fn nominal_radius(&self) -> f64 {
        0.25 * (self.diameter_min_px + self.diameter_max_px)
    }

    fn thresholds(&self) -> EvidenceThresholds {
        let nominal = self.nominal_radius();
        EvidenceThresholds {
            min_contrast: self.min_contrast,
            min_circularity: self.circularity_floor,
            min_size_ratio: 0.5 * self.diameter_min_px / nominal,
            max_size_ratio: 0.5 * self.diameter_max_px / nominal,
        }
    }
}

fn blur(gray: &GrayImage, sigma: f32) -> image::ImageBuffer<Luma<f32>, Vec<f32>> {
    let (w, h) = gray.dimensions();
    let mut f = image::ImageBuffer::<Luma<f32>, Vec<f32>>::new(w, h);
    for y in 0..h {
        for x in 0..w {
            f.put_pixel(x, y, Luma([gray.get_pixel(x, y)[0] as f32 / 255.0]));
        }
    }
    imageproc::filter::gaussian_blur_f32(&f, sigma)
}

/// Extract candidate tubercle features from a grayscale image.
///
/// Returns candidates sorted by confidence descending. The result is the
/// unfiltered candidate list; callers run seed selection on top of it.
pub fn extract_features(gray: &GrayImage, params: &ExtractParams) -> Vec<Feature> {
    let (w, h) = gray.dimensions();
    if w < 4 || h < 4 {
        return Vec::new();
    }

    let smoothed = blur(gray, params.smooth_sigma);
    let data = smoothed.as_raw();
    let stride = w as usize;

    let max_val = data.iter().cloned().fold(0.0f32, f32::max);
    if max_val < 1e-6 {
        return Vec::new();
    }
    let level = params.threshold * max_val;

    // Local maxima with non-maximum suppression; strict tie-break on
    // index so plateaus yield exactly one peak.
    let nms_r = params.nms_radius.ceil() as i32;
    let nms_r_sq = params.nms_radius * params.nms_radius;
    let mut offsets = Vec::new();
    for dy in -nms_r..=nms_r {
        for dx in -nms_r..=nms_r {
            if dx == 0 && dy == 0 {
                continue;
            }
            if (dx * dx + dy * dy) as f64 > nms_r_sq {
                continue;
            }
            offsets.push((dx, dy));
        }
    }

    let mut peaks: Vec<(u32, u32, f32)> = Vec::new();
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let idx = y as usize * stride + x as usize;
            let val = data[idx];
            if val < level {
                continue;
            }
            let mut is_max = true;
            for &(dx, dy) in &offsets {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                    continue;
                }
                let nidx = ny as usize * stride + nx as usize;
                if data[nidx] > val || (data[nidx] == val && nidx < idx) {
                    is_max = false;
                    break;
                }
            }
            if is_max {
                peaks.push((x as u32, y as u32, val));
            }
        }
    }

    // Measure each peak with the shared radial sampler under strict gates.
    let evidence = ImageEvidence::new(gray);
    let thresholds = params.thresholds();
    let nominal_radius = params.nominal_radius();
    // No lattice yet: bound the search window by the expected blob size.
    let pseudo_spacing = 2.0 * params.diameter_max_px;

    let mut features: Vec<Feature> = peaks
        .iter()
        .filter_map(|&(x, y, _)| {
            let hit = evidence.check_candidate(
                [x as f64, y as f64],
                nominal_radius,
                pseudo_spacing,
                &thresholds,
            )?;
            Some(Feature::seed(hit.position, hit.radius, hit.confidence()))
        })
        .collect();

    features.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    tracing::debug!(
        "extractor: {} peaks, {} candidates passed strict gates",
        peaks.len(),
        features.len()
    );
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::draw_blob_image;

    #[test]
    fn finds_isolated_blobs() {
        let centers = [[30.0, 30.0], [70.0, 30.0], [50.0, 70.0]];
        let img = draw_blob_image(100, 100, &centers, 5.0, 220, 30);
        let params = ExtractParams::default();
        let features = extract_features(&img, &params);
        assert!(
            features.len() >= centers.len(),
            "found {} candidates",
            features.len()
        );
        for c in &centers {
            let found = features.iter().any(|f| {
                let dx = f.position[0] - c[0];
                let dy = f.position[1] - c[1];
                (dx * dx + dy * dy).sqrt() < 2.0
            });
            assert!(found, "blob at {:?} not extracted", c);
        }
    }

    #[test]
    fn empty_image_yields_no_candidates() {
        let img = GrayImage::new(64, 64);
        assert!(extract_features(&img, &ExtractParams::default()).is_empty());
    }

    #[test]
    fn rejects_blob_outside_diameter_range() {
        // Diameter 4 blob sits below the default 6px minimum.
        let img = draw_blob_image(64, 64, &[[32.0, 32.0]], 2.0, 220, 30);
        let params = ExtractParams::default();
        let features = extract_features(&img, &params);
        assert!(
            features.is_empty(),
            "undersized blob must be rejected, got {:?}",
            features
        );
    }
}
