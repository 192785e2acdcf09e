//! Lattice-guided propagation of predicted feature positions.
//!
//! Every confirmed feature predicts six neighbors at the hex offsets of the
//! lattice model. Candidates go through a max-heap ordered by priority
//! (source confidence scaled by lattice fit quality), with insertion-order
//! tie-break so the expansion is fully deterministic. A uniform spatial hash
//! grid performs the min-separation dedup against confirmed features and
//! already-queued candidates; an explicit worklist avoids recursion-depth
//! issues and makes termination a visible iteration cap.

use std::collections::BinaryHeap;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::evidence::{EvidenceSource, EvidenceThresholds};
use crate::feature::{Feature, FeatureArena, FeatureId, FeatureOrigin, FeatureState};
use crate::lattice::LatticeModel;
use crate::Bounds;

/// Propagation controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationParams {
    /// Minimum separation between features, as a fraction of lattice spacing.
    pub min_separation_factor: f64,
    /// Hard cap on queue pops, bounding runtime on pathological inputs.
    pub max_iterations: usize,
    /// Acceptance thresholds; looser than seed detection because lattice
    /// support substitutes for local confidence.
    pub thresholds: EvidenceThresholds,
}

impl Default for PropagationParams {
    fn default() -> Self {
        Self {
            min_separation_factor: 0.5,
            max_iterations: 10_000,
            thresholds: EvidenceThresholds::loose(),
        }
    }
}

/// Counters for one propagation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropagationStats {
    pub n_predicted: usize,
    pub n_out_of_bounds: usize,
    pub n_duplicate: usize,
    pub n_popped: usize,
    pub n_rejected: usize,
    pub n_accepted: usize,
    /// True when the iteration cap stopped the run before the queue emptied.
    pub cap_hit: bool,
}

/// A predicted neighbor position awaiting validation. Transient: lives only
/// in the propagation worklist.
#[derive(Debug, Clone)]
struct PropagationCandidate {
    position: [f64; 2],
    #[allow(dead_code)]
    source: FeatureId,
    #[allow(dead_code)]
    direction: usize,
    expected_radius: f64,
    priority: f32,
    seq: u64,
}

impl PartialEq for PropagationCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PropagationCandidate {}

impl Ord for PropagationCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: highest priority first, then earliest insertion.
        self.priority
            .partial_cmp(&other.priority)
            .unwrap()
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PropagationCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Uniform hash grid for radius queries with query radius <= cell size.
struct SpatialGrid {
    cell: f64,
    cells: HashMap<(i64, i64), Vec<[f64; 2]>>,
}

impl SpatialGrid {
    fn new(cell: f64) -> Self {
        Self {
            cell: cell.max(1e-6),
            cells: HashMap::new(),
        }
    }

    fn key(&self, p: [f64; 2]) -> (i64, i64) {
        (
            (p[0] / self.cell).floor() as i64,
            (p[1] / self.cell).floor() as i64,
        )
    }

    fn insert(&mut self, p: [f64; 2]) {
        let k = self.key(p);
        self.cells.entry(k).or_default().push(p);
    }

    fn any_within(&self, p: [f64; 2], radius: f64) -> bool {
        debug_assert!(radius <= self.cell + 1e-9);
        let (kx, ky) = self.key(p);
        let r2 = radius * radius;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if let Some(bucket) = self.cells.get(&(kx + dx, ky + dy)) {
                    for q in bucket {
                        let ddx = q[0] - p[0];
                        let ddy = q[1] - p[1];
                        if ddx * ddx + ddy * ddy < r2 {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }
}

struct Worklist {
    heap: BinaryHeap<PropagationCandidate>,
    queued: SpatialGrid,
    accepted: SpatialGrid,
    min_separation: f64,
    seq: u64,
}

impl Worklist {
    /// Predict the six hex neighbors of `source_pos` and enqueue the novel
    /// in-bounds ones.
    #[allow(clippy::too_many_arguments)]
    fn predict_from(
        &mut self,
        source: FeatureId,
        source_pos: [f64; 2],
        expected_radius: f64,
        priority: f32,
        lattice: &LatticeModel,
        bounds: &Bounds,
        stats: &mut PropagationStats,
    ) {
        for (direction, d) in lattice.hex_directions().into_iter().enumerate() {
            let position = [source_pos[0] + d.x, source_pos[1] + d.y];
            stats.n_predicted += 1;
            if !bounds.contains(position) {
                stats.n_out_of_bounds += 1;
                continue;
            }
            if self.accepted.any_within(position, self.min_separation)
                || self.queued.any_within(position, self.min_separation)
            {
                stats.n_duplicate += 1;
                continue;
            }
            self.queued.insert(position);
            self.seq += 1;
            self.heap.push(PropagationCandidate {
                position,
                source,
                direction,
                expected_radius,
                priority,
                seq: self.seq,
            });
        }
    }
}

/// Expand the confirmed set by validating lattice-predicted positions.
///
/// Deterministic per input: queue order is (priority, insertion order) and
/// the arena is mutated only by accepted candidates, in pop order.
pub fn propagate(
    arena: &mut FeatureArena,
    lattice: &LatticeModel,
    evidence: &dyn EvidenceSource,
    bounds: &Bounds,
    params: &PropagationParams,
) -> PropagationStats {
    let mut stats = PropagationStats::default();
    let min_separation = params.min_separation_factor * lattice.spacing;
    let mut worklist = Worklist {
        heap: BinaryHeap::new(),
        queued: SpatialGrid::new(min_separation),
        accepted: SpatialGrid::new(min_separation),
        min_separation,
        seq: 0,
    };

    let confirmed: Vec<(FeatureId, [f64; 2], f64, f32)> = arena
        .iter_active()
        .filter(|(_, f)| f.state == FeatureState::Confirmed)
        .map(|(id, f)| (id, f.position, f.radius, f.confidence))
        .collect();
    for (_, pos, _, _) in &confirmed {
        worklist.accepted.insert(*pos);
    }
    for (id, pos, radius, confidence) in &confirmed {
        let priority = confidence * lattice.regularity as f32;
        worklist.predict_from(*id, *pos, *radius, priority, lattice, bounds, &mut stats);
    }

    while let Some(candidate) = worklist.heap.pop() {
        if stats.n_popped >= params.max_iterations {
            stats.cap_hit = true;
            tracing::warn!(
                "propagation iteration cap {} reached with {} candidates left",
                params.max_iterations,
                worklist.heap.len() + 1
            );
            break;
        }
        stats.n_popped += 1;

        // A higher-priority candidate may have claimed this neighborhood
        // since the prediction was queued.
        if worklist
            .accepted
            .any_within(candidate.position, min_separation)
        {
            stats.n_duplicate += 1;
            continue;
        }

        let hit = match evidence.check_candidate(
            candidate.position,
            candidate.expected_radius,
            lattice.spacing,
            &params.thresholds,
        ) {
            Some(hit) => hit,
            None => {
                stats.n_rejected += 1;
                continue;
            }
        };
        // Peak refinement may pull the hit onto an existing feature.
        if worklist.accepted.any_within(hit.position, min_separation) {
            stats.n_duplicate += 1;
            continue;
        }

        stats.n_accepted += 1;
        let step = stats.n_accepted as u64;
        let id = arena.push(Feature {
            position: hit.position,
            radius: hit.radius,
            confidence: hit.confidence(),
            state: FeatureState::Confirmed,
            origin: FeatureOrigin::Propagated { step },
        });
        worklist.accepted.insert(hit.position);
        let priority = hit.confidence() * lattice.regularity as f32;
        worklist.predict_from(
            id,
            hit.position,
            hit.radius,
            priority,
            lattice,
            bounds,
            &mut stats,
        );
    }

    tracing::info!(
        "propagation: accepted {} of {} popped ({} rejected, {} duplicate, {} out of bounds)",
        stats.n_accepted,
        stats.n_popped,
        stats.n_rejected,
        stats.n_duplicate,
        stats.n_out_of_bounds
    );
    stats
}
