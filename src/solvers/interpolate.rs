//! Geometric initial guesses for the interior of a band.

use crate::core::config::Interpolation;
use crate::core::domain::Image;
use crate::core::path::Band;
use crate::core::spatial;
use crate::solvers::bfgs::Bfgs;

const IDPP_FMAX: f64 = 0.1;
const IDPP_STEPS: usize = 100;
const IDPP_MAXSTEP: f64 = 0.1;

/// Replaces every interior geometry with an interpolated guess. Labels are cleared.
pub fn interpolate(band: &mut Band, method: Interpolation) {
    linear(band);
    if method == Interpolation::Idpp {
        idpp(band);
    }
}

fn fraction(i: usize, len: usize) -> f64 {
    i as f64 / (len - 1) as f64
}

/// Straight line between the endpoints, following the minimum image when periodic.
pub fn linear(band: &mut Band) {
    let len = band.len();
    let start = band.initial().positions_flat();
    let delta = spatial::image_displacement(band.initial(), band.final_image());

    for (k, image) in band.interior_mut().iter_mut().enumerate() {
        let t = fraction(k + 1, len);
        let positions: Vec<f64> = start.iter().zip(&delta).map(|(x, d)| x + t * d).collect();
        *image = image.unlabeled();
        image.set_positions_flat(&positions);
    }
}

fn pair_distances(image: &Image) -> Vec<f64> {
    let lattice = image.lattice.as_ref();
    let atoms = &image.atoms;
    let mut out = Vec::with_capacity(atoms.len() * atoms.len().saturating_sub(1) / 2);
    for i in 0..atoms.len() {
        for j in (i + 1)..atoms.len() {
            out.push(spatial::distance_sq(&atoms[i].position, &atoms[j].position, lattice).sqrt());
        }
    }
    out
}

/// IDPP objective `S = sum w(d) (d_target - d)^2` with `w = d^-4`, and its
/// negative gradient (flat).
fn idpp_objective(image: &Image, targets: &[f64]) -> (f64, Vec<f64>) {
    let lattice = image.lattice.as_ref();
    let atoms = &image.atoms;
    let mut value = 0.0;
    let mut forces = vec![0.0; 3 * atoms.len()];
    let mut k = 0;

    for i in 0..atoms.len() {
        for j in (i + 1)..atoms.len() {
            let target = targets[k];
            k += 1;
            let d = spatial::displacement(&atoms[i].position, &atoms[j].position, lattice);
            let r = d.norm();
            if r < 1e-8 {
                continue;
            }
            let w = r.powi(-4);
            let gap = target - r;
            value += w * gap * gap;

            // dS/dr
            let ds = -4.0 * w / r * gap * gap - 2.0 * w * gap;
            let u = d / r;
            for c in 0..3 {
                forces[3 * i + c] += ds * u[c];
                forces[3 * j + c] -= ds * u[c];
            }
        }
    }
    (value, forces)
}

/// Image-dependent pair potential refinement of a linear band.
pub fn idpp(band: &mut Band) {
    let len = band.len();
    let d_start = pair_distances(band.initial());
    let d_end = pair_distances(band.final_image());

    for (k, image) in band.interior_mut().iter_mut().enumerate() {
        let t = fraction(k + 1, len);
        let targets: Vec<f64> = d_start.iter().zip(&d_end).map(|(a, b)| a + t * (b - a)).collect();
        let mut optimizer = Bfgs::new(IDPP_MAXSTEP);

        for _ in 0..IDPP_STEPS {
            let (_, mut forces) = idpp_objective(image, &targets);
            for (atom, f) in image.atoms.iter().zip(forces.chunks_exact_mut(3)) {
                if atom.is_fixed {
                    f.fill(0.0);
                }
            }
            if spatial::max_atom_norm(&forces) < IDPP_FMAX {
                break;
            }
            let next = optimizer.step(&image.positions_flat(), &forces);
            image.set_positions_flat(&next);
        }
    }
}
