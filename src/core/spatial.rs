use nalgebra::{Point3, Vector3};

use crate::core::domain::{Image, Lattice};

/// Vector from `p1` to `p2`.
/// If `lattice` is provided, applies Minimum Image Convention (MIC).
#[inline]
pub fn displacement(p1: &Point3<f64>, p2: &Point3<f64>, lattice: Option<&Lattice>) -> Vector3<f64> {
    let d_cart = p2 - p1;
    match lattice {
        Some(lat) => {
            let mut d_frac = lat.inverse * d_cart;

            // Wrap fractional components to [-0.5, 0.5]
            d_frac.x -= d_frac.x.round();
            d_frac.y -= d_frac.y.round();
            d_frac.z -= d_frac.z.round();

            lat.vectors * d_frac
        }
        None => d_cart,
    }
}

/// Calculates the squared distance between two points (MIC when periodic).
#[inline]
pub fn distance_sq(p1: &Point3<f64>, p2: &Point3<f64>, lattice: Option<&Lattice>) -> f64 {
    match lattice {
        Some(_) => displacement(p1, p2, lattice).norm_squared(),
        None => nalgebra::distance_squared(p1, p2),
    }
}

/// Per-atom displacement taking image `from` onto image `to`, as a flat vector.
///
/// Images must be compatible. The lattice of `from` decides the MIC.
pub fn image_displacement(from: &Image, to: &Image) -> Vec<f64> {
    let lattice = from.lattice.as_ref();
    from.atoms
        .iter()
        .zip(&to.atoms)
        .flat_map(|(a, b)| {
            let d = displacement(&a.position, &b.position, lattice);
            [d.x, d.y, d.z]
        })
        .collect()
}

/// All unique pair distances `(i, j, r)` with `i < j` and `r < cutoff`.
pub fn neighbor_pairs(image: &Image, cutoff: f64) -> Vec<(usize, usize, f64)> {
    let atoms = &image.atoms;
    let lattice = image.lattice.as_ref();
    let cutoff_sq = cutoff * cutoff;
    let mut pairs = Vec::new();

    for i in 0..atoms.len() {
        for j in (i + 1)..atoms.len() {
            let d2 = distance_sq(&atoms[i].position, &atoms[j].position, lattice);
            if d2 < cutoff_sq {
                pairs.push((i, j, d2.sqrt()));
            }
        }
    }
    pairs
}

/// Largest per-atom force magnitude in a flat force vector.
pub fn max_atom_norm(flat: &[f64]) -> f64 {
    flat.chunks_exact(3)
        .map(|f| (f[0] * f[0] + f[1] * f[1] + f[2] * f[2]).sqrt())
        .fold(0.0, f64::max)
}

#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
