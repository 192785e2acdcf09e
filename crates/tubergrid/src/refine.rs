//! Iterative refinement: re-estimation, outlier pruning, and gap filling.
//!
//! Propagation can shift the effective lattice, so each pass rebuilds the
//! neighbor graph and re-runs lattice estimation over the full confirmed
//! set before doing anything else. Features too far from their nearest
//! ideal site are coincidental intensity peaks, not lattice members, and
//! get pruned. Interior sites with strong neighbor support but no feature
//! get one lenient evidence check.
//!
//! A pass never mutates graph state incrementally; everything derived is
//! rebuilt from the arena snapshot, so passes compose without stale
//! topology.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceSource;
use crate::feature::{Feature, FeatureArena, FeatureOrigin, FeatureState};
use crate::graph::build_neighbor_graph;
use crate::lattice::{estimate_lattice, LatticeError, LatticeModel};
use crate::{Bounds, DetectConfig};

/// Refinement controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Prune features whose distance to the nearest ideal lattice site
    /// exceeds this fraction of the spacing.
    pub max_lattice_deviation: f64,
    /// Minimum occupied hex neighbors for a gap-fill attempt.
    pub min_gap_neighbors: usize,
    /// Threshold relaxation factor for gap-fill evidence checks (< 1.0
    /// loosens the propagation thresholds further).
    pub gap_fill_leniency: f64,
    /// Maximum refinement passes run by the pipeline; passes stop early at
    /// a fixed point.
    pub max_passes: usize,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            max_lattice_deviation: 0.4,
            min_gap_neighbors: 4,
            gap_fill_leniency: 0.9,
            max_passes: 3,
        }
    }
}

/// Counters and fit summary for one refinement pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefinePassStats {
    pub pass: usize,
    pub n_active_before: usize,
    pub n_pruned: usize,
    pub n_filled: usize,
    pub regularity: f64,
    pub spacing: f64,
}

impl RefinePassStats {
    /// True when the pass changed nothing: refinement has converged.
    pub fn is_fixed_point(&self) -> bool {
        self.n_pruned == 0 && self.n_filled == 0
    }
}

/// Integer offsets of the six hex-adjacent lattice sites (for the
/// canonical ~120 degree basis).
const SITE_NEIGHBORS: [(i64, i64); 6] = [(1, 0), (-1, 0), (0, 1), (0, -1), (1, 1), (-1, -1)];

/// Run one refinement pass over the arena.
///
/// Returns the re-estimated lattice and pass statistics, or `Err` when the
/// confirmed set no longer supports a valid lattice; the caller keeps the
/// previous model in that case.
pub fn refine_pass(
    arena: &mut FeatureArena,
    evidence: &dyn EvidenceSource,
    bounds: &Bounds,
    config: &DetectConfig,
    pass: usize,
) -> Result<(LatticeModel, RefinePassStats), LatticeError> {
    let params = &config.refine;
    let (ids, positions) = arena.active_positions();
    let graph = build_neighbor_graph(&positions, config.max_distance_factor, arena.version());
    let lattice = estimate_lattice(&positions, &graph, &config.lattice)?;

    let mut stats = RefinePassStats {
        pass,
        n_active_before: ids.len(),
        regularity: lattice.regularity,
        spacing: lattice.spacing,
        ..Default::default()
    };

    // Prune off-lattice features.
    for (&id, &position) in ids.iter().zip(positions.iter()) {
        let deviation = lattice.normalized_deviation(position);
        if deviation > params.max_lattice_deviation {
            tracing::debug!(
                "pruning feature {} at ({:.1}, {:.1}): deviation {:.2} spacings",
                id,
                position[0],
                position[1],
                deviation
            );
            arena.set_state(id, FeatureState::Pruned);
            stats.n_pruned += 1;
        }
    }

    // Occupancy over surviving features, keyed by integer site coordinates.
    // BTreeMap keeps the gap scan deterministic.
    let mut occupied: BTreeMap<(i64, i64), usize> = BTreeMap::new();
    for (_, f) in arena.iter_active() {
        let (a, b, _) = lattice.nearest_site(f.position);
        *occupied.entry((a, b)).or_default() += 1;
    }

    // Candidate gaps: unoccupied neighbors of occupied sites.
    let mut gaps: BTreeMap<(i64, i64), usize> = BTreeMap::new();
    for &(a, b) in occupied.keys() {
        for (da, db) in SITE_NEIGHBORS {
            let site = (a + da, b + db);
            if !occupied.contains_key(&site) {
                *gaps.entry(site).or_default() += 1;
            }
        }
    }

    let thresholds = config
        .propagation
        .thresholds
        .relaxed(params.gap_fill_leniency);
    let mean_radius = {
        let (sum, n) = arena
            .iter_active()
            .fold((0.0, 0usize), |(s, n), (_, f)| (s + f.radius, n + 1));
        if n > 0 {
            sum / n as f64
        } else {
            0.25 * lattice.spacing
        }
    };

    for (&site, &support) in &gaps {
        if support < params.min_gap_neighbors {
            continue;
        }
        let position = lattice.site_position(site.0, site.1);
        if !bounds.contains(position) {
            continue;
        }
        let Some(hit) = evidence.check_candidate(position, mean_radius, lattice.spacing, &thresholds)
        else {
            continue;
        };
        arena.push(Feature {
            position: hit.position,
            radius: hit.radius,
            confidence: hit.confidence(),
            state: FeatureState::Confirmed,
            origin: FeatureOrigin::GapFill { pass },
        });
        stats.n_filled += 1;
        tracing::debug!(
            "gap-fill at site ({}, {}) -> ({:.1}, {:.1})",
            site.0,
            site.1,
            hit.position[0],
            hit.position[1]
        );
    }

    tracing::info!(
        "refine pass {}: {} active, pruned {}, filled {}, regularity {:.3}",
        pass,
        stats.n_active_before,
        stats.n_pruned,
        stats.n_filled,
        stats.regularity
    );
    Ok((lattice, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureState;
    use crate::test_utils::draw_hex_lattice_image;
    use crate::ImageEvidence;

    fn confirmed_arena(points: &[[f64; 2]]) -> FeatureArena {
        let mut arena = FeatureArena::from_seeds(
            points
                .iter()
                .map(|&p| Feature::seed(p, 5.0, 0.9))
                .collect(),
        );
        for id in 0..arena.len() {
            arena.set_state(id, FeatureState::Confirmed);
        }
        arena
    }

    #[test]
    fn prunes_off_lattice_outlier() {
        let (img, centers) = draw_hex_lattice_image(6, 6, 20.0, 5.0, [30.0, 30.0]);
        let mut points = centers.clone();
        // A coincidental peak halfway between sites.
        points.push([centers[14][0] + 10.0, centers[14][1] + 1.0]);
        let mut arena = confirmed_arena(&points);
        let evidence = ImageEvidence::new(&img);
        let bounds = Bounds::of_image(&img);
        let (_, stats) =
            refine_pass(&mut arena, &evidence, &bounds, &DetectConfig::default(), 1).unwrap();
        assert_eq!(stats.n_pruned, 1);
        assert_eq!(
            arena.get(points.len() - 1).state,
            FeatureState::Pruned,
            "the outlier must be the pruned entry"
        );
    }

    #[test]
    fn fills_supported_interior_gap() {
        let (img, centers) = draw_hex_lattice_image(6, 6, 20.0, 5.0, [30.0, 30.0]);
        // Remove one interior point; the image still shows its blob.
        let hole = 14;
        let points: Vec<[f64; 2]> = centers
            .iter()
            .enumerate()
            .filter_map(|(k, &p)| (k != hole).then_some(p))
            .collect();
        let mut arena = confirmed_arena(&points);
        let evidence = ImageEvidence::new(&img);
        let bounds = Bounds::of_image(&img);
        let (_, stats) =
            refine_pass(&mut arena, &evidence, &bounds, &DetectConfig::default(), 1).unwrap();
        assert_eq!(stats.n_filled, 1, "interior hole must be filled");
        let filled = arena
            .iter_active()
            .find(|(_, f)| matches!(f.origin, FeatureOrigin::GapFill { .. }))
            .expect("gap-fill feature present");
        let dx = filled.1.position[0] - centers[hole][0];
        let dy = filled.1.position[1] - centers[hole][1];
        assert!((dx * dx + dy * dy).sqrt() < 2.0);
    }

    #[test]
    fn refinement_is_idempotent_on_clean_lattice() {
        let (img, centers) = draw_hex_lattice_image(6, 6, 20.0, 5.0, [30.0, 30.0]);
        let mut arena = confirmed_arena(&centers);
        let evidence = ImageEvidence::new(&img);
        let bounds = Bounds::of_image(&img);
        let config = DetectConfig::default();
        let (_, first) = refine_pass(&mut arena, &evidence, &bounds, &config, 1).unwrap();
        let n_after_first = arena.n_active();
        let (_, second) = refine_pass(&mut arena, &evidence, &bounds, &config, 2).unwrap();
        assert!(first.is_fixed_point() || second.is_fixed_point());
        assert_eq!(
            arena.n_active(),
            n_after_first,
            "second pass on converged output must not change the count"
        );
        assert!(second.is_fixed_point());
    }
}
