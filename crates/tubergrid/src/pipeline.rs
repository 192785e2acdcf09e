//! Pipeline orchestration: seeds → graph → lattice → propagation → refinement.
//!
//! Every fallback path is non-fatal and yields a usable (if degraded)
//! result. The run state (feature arena, neighbor graph, lattice model,
//! quality report) is recomputed together whenever the feature set
//! changes; nothing is patched incrementally.

use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceSource;
use crate::feature::{Feature, FeatureArena, FeatureId, FeatureState};
use crate::graph::{build_neighbor_graph, NeighborGraph};
use crate::lattice::{estimate_lattice, LatticeModel};
use crate::propagate::{propagate, PropagationStats};
use crate::quality::QualityReport;
use crate::refine::{refine_pass, RefinePassStats};
use crate::{Bounds, DetectConfig};

/// Why the pipeline fell back to returning the seed set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    /// Fewer seeds than the configured minimum; propagation cannot begin.
    InsufficientSeeds { needed: usize, got: usize },
    /// The lattice validity gate rejected the arrangement.
    InvalidLattice { reason: String },
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientSeeds { needed, got } => {
                write!(f, "insufficient seeds: need {}, got {}", needed, got)
            }
            Self::InvalidLattice { reason } => write!(f, "invalid lattice: {}", reason),
        }
    }
}

/// Full result of one lattice detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    /// All features, pruned included, in stable handle order.
    pub features: Vec<Feature>,
    /// Final neighbor graph over the active features.
    pub graph: NeighborGraph,
    /// Arena handles of the graph nodes, index-aligned with graph node ids.
    pub graph_nodes: Vec<FeatureId>,
    /// Final lattice model, absent on fallback.
    pub lattice: Option<LatticeModel>,
    /// Quality report for the final graph.
    pub quality: QualityReport,
    /// Present when the pipeline fell back to the seed set.
    pub fallback: Option<FallbackReason>,
    /// Propagation counters (all zero on fallback).
    pub propagation: PropagationStats,
    /// Per-pass refinement counters.
    pub refine_passes: Vec<RefinePassStats>,
}

impl DetectionResult {
    /// True when the pipeline returned the seed set unmodified.
    pub fn fallback_used(&self) -> bool {
        self.fallback.is_some()
    }

    /// Features currently participating in the lattice (not pruned).
    pub fn active_features(&self) -> impl Iterator<Item = &Feature> {
        self.features
            .iter()
            .filter(|f| f.state != FeatureState::Pruned)
    }
}

fn snapshot(
    arena: &FeatureArena,
    config: &DetectConfig,
) -> (Vec<FeatureId>, Vec<[f64; 2]>, NeighborGraph, QualityReport) {
    let (ids, positions) = arena.active_positions();
    let graph = build_neighbor_graph(&positions, config.max_distance_factor, arena.version());
    let quality = graph.quality();
    (ids, positions, graph, quality)
}

fn fallback_result(
    arena: FeatureArena,
    config: &DetectConfig,
    reason: FallbackReason,
) -> DetectionResult {
    tracing::warn!("lattice detection fallback: {}", reason);
    let (ids, _, graph, quality) = snapshot(&arena, config);
    DetectionResult {
        features: arena.to_features(),
        graph,
        graph_nodes: ids,
        lattice: None,
        quality,
        fallback: Some(reason),
        propagation: PropagationStats::default(),
        refine_passes: Vec::new(),
    }
}

/// Run the full lattice-aware pattern completion pipeline.
///
/// `seeds` is the already-selected seed set (see [`crate::select_seeds`]);
/// `evidence` supplies image validation for predicted positions. The run is
/// a pure function of its inputs: same seeds, evidence, and configuration
/// always produce the identical result.
pub fn run_lattice_detection(
    seeds: Vec<Feature>,
    evidence: &dyn EvidenceSource,
    bounds: &Bounds,
    config: &DetectConfig,
) -> DetectionResult {
    let n_seeds = seeds.len();
    tracing::info!("lattice detection: {} seeds", n_seeds);

    if n_seeds < config.min_seeds {
        return fallback_result(
            FeatureArena::from_seeds(seeds),
            config,
            FallbackReason::InsufficientSeeds {
                needed: config.min_seeds,
                got: n_seeds,
            },
        );
    }

    // Estimate the initial lattice from the seed set alone.
    let arena = FeatureArena::from_seeds(seeds);
    let (_, positions, graph, _) = snapshot(&arena, config);
    let lattice = match estimate_lattice(&positions, &graph, &config.lattice) {
        Ok(model) => model,
        Err(err) => {
            return fallback_result(
                arena,
                config,
                FallbackReason::InvalidLattice {
                    reason: err.to_string(),
                },
            );
        }
    };

    // Seeds become confirmed only once the lattice gate has passed, so the
    // fallback paths above return them untouched.
    let mut arena = arena;
    for id in 0..arena.len() {
        arena.set_state(id, FeatureState::Confirmed);
    }

    let propagation = propagate(&mut arena, &lattice, evidence, bounds, &config.propagation);

    // Refinement passes until a fixed point or the pass cap.
    let mut refine_passes = Vec::new();
    let mut final_lattice = lattice;
    for pass in 1..=config.refine.max_passes {
        match refine_pass(&mut arena, evidence, bounds, config, pass) {
            Ok((model, stats)) => {
                let converged = stats.is_fixed_point();
                final_lattice = model;
                refine_passes.push(stats);
                if converged {
                    break;
                }
            }
            Err(err) => {
                // Refit failed on the grown set; keep the last valid model.
                tracing::warn!("refinement pass {} lattice refit failed: {}", pass, err);
                break;
            }
        }
    }

    let (ids, _, graph, quality) = snapshot(&arena, config);
    tracing::info!(
        "lattice detection done: {} active features, hexagonalness {:.3}",
        ids.len(),
        quality.hexagonalness
    );
    DetectionResult {
        features: arena.to_features(),
        graph,
        graph_nodes: ids,
        lattice: Some(final_lattice),
        quality,
        fallback: None,
        propagation,
        refine_passes,
    }
}
