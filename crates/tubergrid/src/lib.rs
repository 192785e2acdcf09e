//! Lattice-aware pattern completion for tubercle fields.
//!
//! Tubercles on scanned specimen surfaces form locally hexagonal
//! arrangements. Given a partial set of detected features, this crate
//! estimates the underlying hexagonal lattice, predicts where undetected
//! tubercles should be, validates each prediction against image evidence,
//! and iteratively refines the result until it stabilizes.
//!
//! The main entry point is [`run_lattice_detection`]; pipeline stages are
//! also usable on their own:
//!
//! - [`extract_features`] / [`select_seeds`]: blob extraction and seed
//!   selection from a grayscale image.
//! - [`build_neighbor_graph`]: Delaunay triangulation with a long-edge
//!   filter.
//! - [`estimate_lattice`]: basis-vector estimation with a hexagonal
//!   validity gate.
//! - [`propagate`]: priority-queue completion with evidence validation.
//! - [`refine_pass`]: re-estimation, outlier pruning, and gap filling.
//! - [`score_quality`]: the shared "hexagonalness" metric.
//!
//! All computations are deterministic: identical inputs and configuration
//! produce byte-identical results.

pub mod config;
pub mod evidence;
pub mod extract;
pub mod feature;
pub mod graph;
pub mod lattice;
pub mod pipeline;
pub mod propagate;
pub mod quality;
pub mod refine;
pub mod seeds;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::DetectConfig;
pub use evidence::{EvidenceHit, EvidenceSource, EvidenceThresholds, ImageEvidence};
pub use extract::{extract_features, ExtractParams};
pub use feature::{Feature, FeatureArena, FeatureId, FeatureOrigin, FeatureState};
pub use graph::{build_neighbor_graph, GraphEdge, LengthClass, NeighborGraph};
pub use lattice::{estimate_lattice, LatticeConfig, LatticeError, LatticeModel};
pub use pipeline::{run_lattice_detection, DetectionResult, FallbackReason};
pub use propagate::{propagate, PropagationParams, PropagationStats};
pub use quality::{score_quality, QualityReport};
pub use refine::{refine_pass, RefineParams, RefinePassStats};
pub use seeds::{select_seeds, SeedSelectParams};

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Working area for prediction acceptance, in image pixel coordinates.
///
/// Predictions outside the bounds are dropped without an evidence check.
/// The margin keeps candidates far enough from the image edge for the
/// radial sampler to measure them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
    /// Exclusion band along every edge, in pixels.
    pub margin: f64,
}

impl Bounds {
    pub fn new(width: f64, height: f64, margin: f64) -> Self {
        Self {
            width,
            height,
            margin,
        }
    }

    /// Bounds covering an image with a 2px sampling margin.
    pub fn of_image(gray: &GrayImage) -> Self {
        let (w, h) = gray.dimensions();
        Self::new(w as f64, h as f64, 2.0)
    }

    /// True when `p` lies inside the bounds, margin excluded.
    pub fn contains(&self, p: [f64; 2]) -> bool {
        p[0] >= self.margin
            && p[0] < self.width - self.margin
            && p[1] >= self.margin
            && p[1] < self.height - self.margin
    }
}
