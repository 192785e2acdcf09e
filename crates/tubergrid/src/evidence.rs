//! Image-evidence validation for predicted feature positions.
//!
//! Propagation and gap-fill predict where a tubercle should be; this module
//! answers whether the image actually supports one there. The sampler is a
//! pure in-memory routine over a grayscale intensity field: find the local
//! intensity peak near the predicted position, refine it to a weighted
//! centroid, then cast radial rays to the half-maximum crossing to measure
//! radius and circularity.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Acceptance thresholds for an evidence check.
///
/// Seed extraction uses the strict defaults; propagation uses
/// [`EvidenceThresholds::loose`], because lattice support substitutes for
/// local confidence; gap-fill relaxes the loose set further.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceThresholds {
    /// Minimum peak-to-background intensity ratio.
    pub min_contrast: f64,
    /// Minimum circularity in [0, 1].
    pub min_circularity: f64,
    /// Measured radius must be at least this fraction of the expected radius.
    pub min_size_ratio: f64,
    /// Measured radius must be at most this fraction of the expected radius.
    pub max_size_ratio: f64,
}

impl Default for EvidenceThresholds {
    fn default() -> Self {
        Self {
            min_contrast: 1.5,
            min_circularity: 0.6,
            min_size_ratio: 0.5,
            max_size_ratio: 1.6,
        }
    }
}

impl EvidenceThresholds {
    /// Loosened thresholds for lattice-supported candidates.
    pub fn loose() -> Self {
        Self {
            min_contrast: 1.2,
            min_circularity: 0.4,
            min_size_ratio: 0.6,
            max_size_ratio: 1.4,
        }
    }

    /// Relax every gate by `leniency` (< 1.0 loosens).
    pub fn relaxed(self, leniency: f64) -> Self {
        Self {
            min_contrast: 1.0 + (self.min_contrast - 1.0) * leniency,
            min_circularity: self.min_circularity * leniency,
            min_size_ratio: self.min_size_ratio * leniency,
            max_size_ratio: self.max_size_ratio / leniency,
        }
    }
}

/// A validated intensity peak.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvidenceHit {
    /// Peak position refined to the intensity-weighted centroid.
    pub position: [f64; 2],
    /// Mean ray radius in pixels.
    pub radius: f64,
    /// Peak-to-background intensity ratio.
    pub contrast: f64,
    /// `max(0, 1 - 2 * CV)` over per-ray radii, clamped to [0, 1].
    pub circularity: f64,
}

impl EvidenceHit {
    /// Confidence heuristic in [0, 1] combining contrast and shape.
    pub fn confidence(&self) -> f32 {
        let contrast_term = ((self.contrast - 1.0) / 2.0).clamp(0.0, 1.0);
        (0.5 * contrast_term + 0.5 * self.circularity).clamp(0.0, 1.0) as f32
    }
}

/// Source of image evidence for candidate validation.
///
/// `spacing` bounds the search neighborhood; implementations must not read
/// outside a `0.5 * spacing` radius around `position` so that checks for
/// independently predicted candidates touch disjoint regions.
pub trait EvidenceSource {
    /// Validate a predicted feature at `position`.
    ///
    /// Returns `None` when the neighborhood fails the thresholds; the
    /// candidate is then rejected, never an error.
    fn check_candidate(
        &self,
        position: [f64; 2],
        expected_radius: f64,
        spacing: f64,
        thresholds: &EvidenceThresholds,
    ) -> Option<EvidenceHit>;
}

/// Fraction of the lattice spacing searched around a predicted position.
const SEARCH_RADIUS_FACTOR: f64 = 0.3;
/// Rays cast for the radial radius measurement.
const N_RAYS: usize = 16;

/// Evidence source backed by a grayscale image.
#[derive(Debug, Clone, Copy)]
pub struct ImageEvidence<'a> {
    gray: &'a GrayImage,
}

impl<'a> ImageEvidence<'a> {
    pub fn new(gray: &'a GrayImage) -> Self {
        Self { gray }
    }

    fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let (w, h) = self.gray.dimensions();
        if x < 0.0 || y < 0.0 || x >= w as f64 || y >= h as f64 {
            return None;
        }
        Some(self.gray.get_pixel(x as u32, y as u32)[0] as f64)
    }

    /// Brightest pixel within `radius` of `position`.
    fn find_peak(&self, position: [f64; 2], radius: f64) -> Option<([f64; 2], f64)> {
        let r = radius.ceil() as i64;
        let cx = position[0].round() as i64;
        let cy = position[1].round() as i64;
        let mut best: Option<([f64; 2], f64)> = None;
        for dy in -r..=r {
            for dx in -r..=r {
                if (dx * dx + dy * dy) as f64 > radius * radius {
                    continue;
                }
                let (x, y) = ((cx + dx) as f64, (cy + dy) as f64);
                if let Some(v) = self.sample(x, y) {
                    // Lowest-index tie-break keeps the scan deterministic.
                    if best.map_or(true, |(_, bv)| v > bv) {
                        best = Some(([x, y], v));
                    }
                }
            }
        }
        best
    }

    /// Intensity-weighted centroid of above-half-max pixels around a peak.
    fn refine_centroid(&self, peak: [f64; 2], half_level: f64, radius: f64) -> [f64; 2] {
        let r = radius.ceil() as i64;
        let cx = peak[0] as i64;
        let cy = peak[1] as i64;
        let mut sum_w = 0.0;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        for dy in -r..=r {
            for dx in -r..=r {
                if (dx * dx + dy * dy) as f64 > radius * radius {
                    continue;
                }
                let (x, y) = ((cx + dx) as f64, (cy + dy) as f64);
                if let Some(v) = self.sample(x, y) {
                    if v >= half_level {
                        let w = v - half_level;
                        sum_w += w;
                        sum_x += w * x;
                        sum_y += w * y;
                    }
                }
            }
        }
        if sum_w > 0.0 {
            [sum_x / sum_w, sum_y / sum_w]
        } else {
            peak
        }
    }

    /// Mean intensity on a ring, used as the local background estimate.
    fn ring_mean(&self, center: [f64; 2], radius: f64) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for k in 0..N_RAYS {
            let theta = 2.0 * std::f64::consts::PI * k as f64 / N_RAYS as f64;
            let x = center[0] + radius * theta.cos();
            let y = center[1] + radius * theta.sin();
            if let Some(v) = self.sample(x, y) {
                sum += v;
                n += 1;
            }
        }
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    }

    /// Per-ray half-maximum crossing radii from `center`.
    fn ray_radii(&self, center: [f64; 2], half_level: f64, max_r: f64) -> Vec<f64> {
        let mut radii = Vec::with_capacity(N_RAYS);
        for k in 0..N_RAYS {
            let theta = 2.0 * std::f64::consts::PI * k as f64 / N_RAYS as f64;
            let (dx, dy) = (theta.cos(), theta.sin());
            let mut r = 0.5;
            let mut crossing = None;
            while r <= max_r {
                let v = self
                    .sample(center[0] + dx * r, center[1] + dy * r)
                    .unwrap_or(0.0);
                if v < half_level {
                    crossing = Some(r);
                    break;
                }
                r += 0.5;
            }
            if let Some(c) = crossing {
                radii.push(c);
            }
        }
        radii
    }
}

impl EvidenceSource for ImageEvidence<'_> {
    fn check_candidate(
        &self,
        position: [f64; 2],
        expected_radius: f64,
        spacing: f64,
        thresholds: &EvidenceThresholds,
    ) -> Option<EvidenceHit> {
        let search_r = SEARCH_RADIUS_FACTOR * spacing;
        let (peak, peak_val) = self.find_peak(position, search_r)?;

        // Background from a ring between the expected blob and its neighbors.
        let bg_radius = (2.0 * expected_radius).min(0.5 * spacing);
        let background = self.ring_mean(peak, bg_radius).max(1.0);
        let contrast = peak_val / background;
        if contrast < thresholds.min_contrast {
            return None;
        }

        let half_level = 0.5 * (peak_val + background);
        // Window covers the whole blob from any in-blob peak pixel.
        let center = self.refine_centroid(peak, half_level, expected_radius.max(2.0) * 2.0);

        let max_r = (expected_radius * 2.0).max(3.0);
        let radii = self.ray_radii(center, half_level, max_r);
        // Rays that never cross count against circularity via the shortfall.
        if radii.len() < N_RAYS / 2 {
            return None;
        }
        let mean_r = radii.iter().sum::<f64>() / radii.len() as f64;
        let var = radii.iter().map(|r| (r - mean_r).powi(2)).sum::<f64>() / radii.len() as f64;
        let cv = if mean_r > 0.0 {
            var.sqrt() / mean_r
        } else {
            1.0
        };
        let coverage = radii.len() as f64 / N_RAYS as f64;
        let circularity = ((1.0 - 2.0 * cv) * coverage).clamp(0.0, 1.0);
        if circularity < thresholds.min_circularity {
            return None;
        }

        let size_ratio = mean_r / expected_radius;
        if size_ratio < thresholds.min_size_ratio || size_ratio > thresholds.max_size_ratio {
            return None;
        }

        Some(EvidenceHit {
            position: center,
            radius: mean_r,
            contrast,
            circularity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::draw_blob_image;

    #[test]
    fn accepts_centered_blob() {
        let img = draw_blob_image(64, 64, &[[32.0, 32.0]], 5.0, 220, 30);
        let ev = ImageEvidence::new(&img);
        let hit = ev
            .check_candidate([33.5, 30.5], 5.0, 20.0, &EvidenceThresholds::loose())
            .expect("offset prediction near a blob must be accepted");
        let err = ((hit.position[0] - 32.0).powi(2) + (hit.position[1] - 32.0).powi(2)).sqrt();
        assert!(err < 1.5, "refined center off by {:.2}px", err);
        assert!((hit.radius - 5.0).abs() < 2.0);
        assert!(hit.contrast > 1.2);
        assert!(hit.circularity > 0.4);
    }

    #[test]
    fn rejects_empty_background() {
        let img = draw_blob_image(64, 64, &[], 5.0, 220, 30);
        let ev = ImageEvidence::new(&img);
        assert!(ev
            .check_candidate([32.0, 32.0], 5.0, 20.0, &EvidenceThresholds::loose())
            .is_none());
    }

    #[test]
    fn rejects_wrong_size() {
        // Blob radius 2 where 8 is expected: below the 60% size floor.
        let img = draw_blob_image(64, 64, &[[32.0, 32.0]], 2.0, 220, 30);
        let ev = ImageEvidence::new(&img);
        assert!(ev
            .check_candidate([32.0, 32.0], 8.0, 30.0, &EvidenceThresholds::loose())
            .is_none());
    }

    #[test]
    fn loose_thresholds_are_looser_than_strict() {
        let strict = EvidenceThresholds::default();
        let loose = EvidenceThresholds::loose();
        assert!(loose.min_contrast < strict.min_contrast);
        assert!(loose.min_circularity < strict.min_circularity);
        let relaxed = loose.relaxed(0.9);
        assert!(relaxed.min_contrast < loose.min_contrast);
        assert!(relaxed.min_circularity < loose.min_circularity);
        assert!(relaxed.max_size_ratio > loose.max_size_ratio);
    }
}
