//! Shared synthetic-data helpers for unit tests.
//!
//! Consolidated here so the graph, lattice, propagation, and pipeline tests
//! all render lattices and blob images the same way.

use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Points of a `rows x cols` hexagonal lattice patch with the given spacing.
///
/// Row-major order; row `i` is offset by half a spacing for odd `i`, giving
/// a triangular (hexagonal) Bravais lattice.
pub(crate) fn hex_lattice_points(rows: usize, cols: usize, spacing: f64) -> Vec<[f64; 2]> {
    let row_h = spacing * 3f64.sqrt() / 2.0;
    let mut pts = Vec::with_capacity(rows * cols);
    for i in 0..rows {
        for j in 0..cols {
            let x = (j as f64 + 0.5 * (i % 2) as f64) * spacing;
            pts.push([x, i as f64 * row_h]);
        }
    }
    pts
}

/// Uniform random points in a `size x size` square.
pub(crate) fn random_points(n: usize, size: f64, seed: u64) -> Vec<[f64; 2]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| [rng.gen::<f64>() * size, rng.gen::<f64>() * size])
        .collect()
}

/// Add Gaussian position noise with standard deviation `sigma`.
pub(crate) fn jitter(points: &[[f64; 2]], sigma: f64, seed: u64) -> Vec<[f64; 2]> {
    let mut rng = StdRng::seed_from_u64(seed);
    // Box-Muller keeps the dev-dependency surface at plain `rand`.
    let mut gauss = move || -> f64 {
        let u1: f64 = rng.gen::<f64>().max(1e-12);
        let u2: f64 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    };
    points
        .iter()
        .map(|p| [p[0] + sigma * gauss(), p[1] + sigma * gauss()])
        .collect()
}

/// Render bright circular blobs on a flat background.
pub(crate) fn draw_blob_image(
    w: u32,
    h: u32,
    centers: &[[f64; 2]],
    radius: f64,
    blob_pix: u8,
    bg_pix: u8,
) -> GrayImage {
    let mut img = GrayImage::from_pixel(w, h, Luma([bg_pix]));
    for c in centers {
        let x0 = ((c[0] - radius).floor().max(0.0)) as u32;
        let x1 = ((c[0] + radius).ceil().min(w as f64 - 1.0)) as u32;
        let y0 = ((c[1] - radius).floor().max(0.0)) as u32;
        let y1 = ((c[1] + radius).ceil().min(h as f64 - 1.0)) as u32;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f64 - c[0];
                let dy = y as f64 - c[1];
                if dx * dx + dy * dy <= radius * radius {
                    img.put_pixel(x, y, Luma([blob_pix]));
                }
            }
        }
    }
    img
}

/// Render a hex lattice of blobs and return (image, centers).
///
/// Centers are shifted by `offset` so the lattice sits inside the image
/// with a clear margin.
pub(crate) fn draw_hex_lattice_image(
    rows: usize,
    cols: usize,
    spacing: f64,
    blob_radius: f64,
    offset: [f64; 2],
) -> (GrayImage, Vec<[f64; 2]>) {
    let centers: Vec<[f64; 2]> = hex_lattice_points(rows, cols, spacing)
        .into_iter()
        .map(|p| [p[0] + offset[0], p[1] + offset[1]])
        .collect();
    let w = (cols as f64 * spacing + 2.0 * offset[0]).ceil() as u32;
    let h = (rows as f64 * spacing + 2.0 * offset[1]).ceil() as u32;
    let img = draw_blob_image(w, h, &centers, blob_radius, 220, 30);
    (img, centers)
}
