//! Top-level detection configuration.

use serde::{Deserialize, Serialize};

use crate::extract::ExtractParams;
use crate::lattice::LatticeConfig;
use crate::propagate::PropagationParams;
use crate::refine::RefineParams;
use crate::seeds::SeedSelectParams;

/// Aggregated configuration for the lattice detection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Minimum number of selected seeds to attempt lattice detection;
    /// below this the pipeline falls back to the seed set unmodified.
    pub min_seeds: usize,
    /// Long-edge filter: discard graph edges longer than this factor times
    /// the median edge length.
    pub max_distance_factor: f64,
    /// Seed selection controls.
    pub seeds: SeedSelectParams,
    /// Seed extraction controls (used by callers that start from an image
    /// rather than a candidate list).
    pub extract: ExtractParams,
    /// Lattice estimation tolerances and validity gate.
    pub lattice: LatticeConfig,
    /// Propagation controls.
    pub propagation: PropagationParams,
    /// Refinement controls.
    pub refine: RefineParams,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            min_seeds: 5,
            max_distance_factor: 1.5,
            seeds: SeedSelectParams::default(),
            extract: ExtractParams::default(),
            lattice: LatticeConfig::default(),
            propagation: PropagationParams::default(),
            refine: RefineParams::default(),
        }
    }
}

impl DetectConfig {
    /// Build a configuration with scale-coupled parameters derived from an
    /// expected lattice spacing in pixels.
    ///
    /// This is the recommended constructor when the physical scan
    /// resolution is known; individual fields can be overridden afterwards.
    pub fn from_spacing_hint(spacing_px: f64) -> Self {
        let mut cfg = Self::default();
        cfg.set_spacing_hint(spacing_px);
        cfg
    }

    /// Re-derive scale-coupled parameters from an expected spacing.
    pub fn set_spacing_hint(&mut self, spacing_px: f64) {
        let spacing = spacing_px.max(4.0);
        // Tubercle diameters are typically 30-70% of the lattice spacing.
        self.extract.diameter_min_px = (0.2 * spacing).max(2.0);
        self.extract.diameter_max_px = (0.8 * spacing).max(self.extract.diameter_min_px);
        self.extract.nms_radius = (0.5 * spacing).max(2.0);
        self.seeds.min_separation_px = (0.5 * spacing).max(2.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_gates() {
        let cfg = DetectConfig::default();
        assert_eq!(cfg.min_seeds, 5);
        assert!((cfg.max_distance_factor - 1.5).abs() < 1e-9);
        assert!((cfg.lattice.min_regularity - 0.7).abs() < 1e-9);
        assert!((cfg.refine.max_lattice_deviation - 0.4).abs() < 1e-9);
        assert_eq!(cfg.propagation.max_iterations, 10_000);
    }

    #[test]
    fn spacing_hint_derives_extractor_range() {
        let cfg = DetectConfig::from_spacing_hint(20.0);
        assert!((cfg.extract.diameter_min_px - 4.0).abs() < 1e-9);
        assert!((cfg.extract.diameter_max_px - 16.0).abs() < 1e-9);
        assert!((cfg.seeds.min_separation_px - 10.0).abs() < 1e-9);
    }
}
