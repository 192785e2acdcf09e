//! Neighbor graph construction: Delaunay triangulation plus long-edge filtering.
//!
//! True hexagonal neighbors have near-uniform spacing, while triangulation
//! artifacts at the convex hull produce spuriously long edges. Edges longer
//! than `max_distance_factor × median_edge_length` are therefore classified
//! [`LengthClass::Filtered`] and excluded from lattice estimation and quality
//! scoring. Filtered edges are retained in the structure for diagnostics.
//!
//! The graph is a pure derived value: it is always rebuilt from a feature
//! snapshot and never patched in place.

use delaunator::{triangulate, Point};
use serde::{Deserialize, Serialize};

use crate::quality::{score_quality, QualityReport};

/// Whether an edge survived the long-edge filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthClass {
    Kept,
    Filtered,
}

/// Undirected edge between graph nodes `i < j`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GraphEdge {
    pub i: usize,
    pub j: usize,
    /// Euclidean length in pixels.
    pub distance: f64,
    pub length_class: LengthClass,
}

/// Proximity graph over a feature position snapshot.
///
/// Node indices refer to the position slice the graph was built from; the
/// caller owns the mapping back to arena handles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeighborGraph {
    pub n_nodes: usize,
    pub edges: Vec<GraphEdge>,
    /// Arena version this graph was built from, for staleness checks.
    pub built_from_version: u64,
}

impl NeighborGraph {
    /// Edges that survived the long-edge filter.
    pub fn kept_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges
            .iter()
            .filter(|e| e.length_class == LengthClass::Kept)
    }

    /// Number of kept edges.
    pub fn n_kept(&self) -> usize {
        self.kept_edges().count()
    }

    /// Per-node degree over kept edges.
    pub fn degrees(&self) -> Vec<usize> {
        let mut deg = vec![0usize; self.n_nodes];
        for e in self.kept_edges() {
            deg[e.i] += 1;
            deg[e.j] += 1;
        }
        deg
    }

    /// Regularity report for this graph (delegates to [`score_quality`],
    /// the single hexagonalness implementation).
    pub fn quality(&self) -> QualityReport {
        score_quality(self.n_nodes, &self.edges)
    }
}

/// Build a neighbor graph over `positions`.
///
/// Degenerate inputs (fewer than 3 points, collinear points, failed
/// triangulation) yield a graph with zero edges rather than an error;
/// downstream lattice estimation treats such graphs as invalid.
pub fn build_neighbor_graph(
    positions: &[[f64; 2]],
    max_distance_factor: f64,
    arena_version: u64,
) -> NeighborGraph {
    let n_nodes = positions.len();
    let mut graph = NeighborGraph {
        n_nodes,
        edges: Vec::new(),
        built_from_version: arena_version,
    };
    if n_nodes < 3 {
        return graph;
    }

    let points: Vec<Point> = positions.iter().map(|p| Point { x: p[0], y: p[1] }).collect();
    let tri = triangulate(&points);
    if tri.triangles.is_empty() {
        // Collinear or otherwise degenerate layout.
        tracing::debug!("triangulation degenerate for {} points", n_nodes);
        return graph;
    }

    // Unique undirected edges from the triangle list.
    let mut seen = std::collections::HashSet::new();
    for t in tri.triangles.chunks_exact(3) {
        for &(a, b) in &[(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
            let (i, j) = if a < b { (a, b) } else { (b, a) };
            if seen.insert((i, j)) {
                let dx = positions[j][0] - positions[i][0];
                let dy = positions[j][1] - positions[i][1];
                graph.edges.push(GraphEdge {
                    i,
                    j,
                    distance: (dx * dx + dy * dy).sqrt(),
                    length_class: LengthClass::Kept,
                });
            }
        }
    }

    // Classify long edges against the median length.
    let mut lengths: Vec<f64> = graph.edges.iter().map(|e| e.distance).collect();
    lengths.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = lengths[lengths.len() / 2];
    let cutoff = max_distance_factor * median;
    let mut n_filtered = 0usize;
    for e in &mut graph.edges {
        if e.distance > cutoff {
            e.length_class = LengthClass::Filtered;
            n_filtered += 1;
        }
    }
    // Deterministic edge order regardless of triangulation internals.
    graph
        .edges
        .sort_by(|a, b| (a.i, a.j).cmp(&(b.i, b.j)));

    tracing::debug!(
        "neighbor graph: {} nodes, {} edges ({} filtered, median={:.2}px)",
        n_nodes,
        graph.edges.len(),
        n_filtered,
        median
    );
    graph
}
