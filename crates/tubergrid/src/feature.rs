//! Feature arena: stable handles, append-only storage, provenance tracking.
//!
//! Features are never removed once created; refinement marks rejected
//! entries [`FeatureState::Pruned`] instead, so handles stay valid for the
//! lifetime of a run and provenance is preserved. Derived values (neighbor
//! graph, lattice model, quality report) key off [`FeatureArena::version`]
//! to detect staleness.

use serde::{Deserialize, Serialize};

/// Stable handle into a [`FeatureArena`]. Never reused within a run.
pub type FeatureId = usize;

/// Detection state of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    /// Selected from extractor candidates, not yet lattice-validated.
    Seed,
    /// Predicted by propagation, pending evidence validation.
    Propagated,
    /// Validated against image evidence (or accepted seed).
    Confirmed,
    /// Rejected during refinement; kept for provenance, excluded from
    /// all derived computations.
    Pruned,
}

/// How a feature entered the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureOrigin {
    /// Produced by the seed extractor.
    Extracted,
    /// Predicted and validated during propagation step `step`.
    Propagated { step: u64 },
    /// Inserted by refinement gap-fill during pass `pass`.
    GapFill { pass: usize },
}

/// A candidate or confirmed surface structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Center (x, y) in image pixel coordinates.
    pub position: [f64; 2],
    /// Measured radius in pixels.
    pub radius: f64,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Current lifecycle state.
    pub state: FeatureState,
    /// Provenance record.
    pub origin: FeatureOrigin,
}

impl Feature {
    /// Construct a seed feature from extractor output.
    pub fn seed(position: [f64; 2], radius: f64, confidence: f32) -> Self {
        Self {
            position,
            radius,
            confidence,
            state: FeatureState::Seed,
            origin: FeatureOrigin::Extracted,
        }
    }
}

/// Append-only feature storage addressed by stable [`FeatureId`] handles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureArena {
    features: Vec<Feature>,
    /// Bumped on every mutation; derived structures record the version they
    /// were built from.
    version: u64,
}

impl FeatureArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena pre-populated with seed features.
    pub fn from_seeds(seeds: Vec<Feature>) -> Self {
        let version = seeds.len() as u64;
        Self {
            features: seeds,
            version,
        }
    }

    /// Append a feature, returning its handle.
    pub fn push(&mut self, feature: Feature) -> FeatureId {
        let id = self.features.len();
        self.features.push(feature);
        self.version += 1;
        id
    }

    /// Total number of entries, pruned included.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// True when the arena holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Current mutation counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, id: FeatureId) -> &Feature {
        &self.features[id]
    }

    /// Transition a feature's state, bumping the version.
    pub fn set_state(&mut self, id: FeatureId, state: FeatureState) {
        self.features[id].state = state;
        self.version += 1;
    }

    /// Move a feature during position refinement, bumping the version.
    pub fn set_position(&mut self, id: FeatureId, position: [f64; 2]) {
        self.features[id].position = position;
        self.version += 1;
    }

    /// All entries in handle order, pruned included.
    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, &Feature)> {
        self.features.iter().enumerate()
    }

    /// Entries that still participate in derived computations
    /// (everything not marked pruned).
    pub fn iter_active(&self) -> impl Iterator<Item = (FeatureId, &Feature)> {
        self.iter().filter(|(_, f)| f.state != FeatureState::Pruned)
    }

    /// Handles and positions of active features, in handle order.
    ///
    /// This is the canonical input to graph building: index `k` in the
    /// returned vectors is graph node `k`, and `ids[k]` maps back to the
    /// arena handle.
    pub fn active_positions(&self) -> (Vec<FeatureId>, Vec<[f64; 2]>) {
        let mut ids = Vec::new();
        let mut positions = Vec::new();
        for (id, f) in self.iter_active() {
            ids.push(id);
            positions.push(f.position);
        }
        (ids, positions)
    }

    /// Number of active (non-pruned) features.
    pub fn n_active(&self) -> usize {
        self.iter_active().count()
    }

    /// Clone the full feature list for result reporting.
    pub fn to_features(&self) -> Vec<Feature> {
        self.features.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_stable_across_pruning() {
        let mut arena = FeatureArena::from_seeds(vec![
            Feature::seed([0.0, 0.0], 3.0, 0.9),
            Feature::seed([10.0, 0.0], 3.0, 0.8),
            Feature::seed([20.0, 0.0], 3.0, 0.7),
        ]);
        arena.set_state(1, FeatureState::Pruned);

        assert_eq!(arena.len(), 3, "pruning must not remove entries");
        assert_eq!(arena.n_active(), 2);
        let (ids, _) = arena.active_positions();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(arena.get(2).position, [20.0, 0.0]);
    }

    #[test]
    fn version_bumps_on_every_mutation() {
        let mut arena = FeatureArena::new();
        let v0 = arena.version();
        let id = arena.push(Feature::seed([1.0, 2.0], 3.0, 0.5));
        assert!(arena.version() > v0);
        let v1 = arena.version();
        arena.set_state(id, FeatureState::Confirmed);
        assert!(arena.version() > v1);
        let v2 = arena.version();
        arena.set_position(id, [1.5, 2.5]);
        assert!(arena.version() > v2);
    }
}
