//! Seed selection: confidence-ordered greedy dedup of extractor candidates.

use serde::{Deserialize, Serialize};

use crate::feature::Feature;

/// Seed selection controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedSelectParams {
    /// Candidates below this confidence are dropped outright.
    pub min_confidence: f32,
    /// Keep only the highest-confidence candidate within this radius.
    pub min_separation_px: f64,
    /// Optional cap on the number of seeds.
    pub max_seeds: Option<usize>,
}

impl Default for SeedSelectParams {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            min_separation_px: 6.0,
            max_seeds: Some(512),
        }
    }
}

/// Select seed features from extractor candidates.
///
/// Candidates are sorted by confidence descending (stable, so equal
/// confidences keep their input order) and accepted greedily under the
/// min-separation constraint.
pub fn select_seeds(mut candidates: Vec<Feature>, params: &SeedSelectParams) -> Vec<Feature> {
    candidates.retain(|c| c.confidence >= params.min_confidence);
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    let r2 = params.min_separation_px * params.min_separation_px;
    let mut selected: Vec<Feature> = Vec::new();
    for candidate in candidates {
        if let Some(cap) = params.max_seeds {
            if selected.len() >= cap {
                break;
            }
        }
        let clear = selected.iter().all(|s| {
            let dx = s.position[0] - candidate.position[0];
            let dy = s.position[1] - candidate.position[1];
            dx * dx + dy * dy >= r2
        });
        if clear {
            selected.push(candidate);
        }
    }
    selected
}
