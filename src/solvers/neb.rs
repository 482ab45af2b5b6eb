//! Nudged-elastic-band force projection.
//!
//! Pure functions over a synchronized band snapshot; every rank evaluates them
//! on identical data and gets identical results.

use crate::core::config::{NebArgs, NebMethod};
use crate::core::domain::Image;
use crate::core::spatial::{self, dot};

/// Index of the highest-energy interior image.
pub fn highest_interior(energies: &[f64]) -> usize {
    let n = energies.len();
    (1..n.saturating_sub(1))
        .max_by(|&a, &b| energies[a].total_cmp(&energies[b]))
        .unwrap_or(1)
}

fn zero_fixed(image: &Image, flat: &mut [f64]) {
    for (atom, f) in image.atoms.iter().zip(flat.chunks_exact_mut(3)) {
        if atom.is_fixed {
            f.fill(0.0);
        }
    }
}

fn tangent(method: NebMethod, i: usize, imax: usize, energies: &[f64], t_minus: &[f64], t_plus: &[f64]) -> Vec<f64> {
    match method {
        NebMethod::Aseneb => {
            if i < imax {
                t_plus.to_vec()
            } else if i > imax {
                t_minus.to_vec()
            } else {
                t_minus.iter().zip(t_plus).map(|(a, b)| a + b).collect()
            }
        }
        NebMethod::ImprovedTangent => {
            let (e_prev, e, e_next) = (energies[i - 1], energies[i], energies[i + 1]);
            let t = if e_next > e && e > e_prev {
                t_plus.to_vec()
            } else if e_next < e && e < e_prev {
                t_minus.to_vec()
            } else {
                let d_next = (e_next - e).abs();
                let d_prev = (e_prev - e).abs();
                let (d_max, d_min) = (d_next.max(d_prev), d_next.min(d_prev));
                let (w_plus, w_minus) = if e_next > e_prev { (d_max, d_min) } else { (d_min, d_max) };
                t_plus.iter().zip(t_minus).map(|(p, m)| w_plus * p + w_minus * m).collect()
            };
            let norm = dot(&t, &t).sqrt();
            if norm > 0.0 {
                t.into_iter().map(|v| v / norm).collect()
            } else {
                t
            }
        }
    }
}

/// NEB forces for every interior image.
///
/// * `images` - the whole band, endpoints included (positions only are read).
/// * `energies` - one energy per band image.
/// * `forces` - raw forces of the interior images, flat, in band order.
pub fn project_forces(images: &[Image], energies: &[f64], forces: &[Vec<f64>], args: &NebArgs) -> Vec<Vec<f64>> {
    let n = images.len();
    debug_assert_eq!(energies.len(), n);
    debug_assert_eq!(forces.len(), n.saturating_sub(2));

    let imax = highest_interior(energies);
    let mut out = Vec::with_capacity(forces.len());

    for i in 1..n - 1 {
        let mut f = forces[i - 1].clone();
        zero_fixed(&images[i], &mut f);

        let t_minus = spatial::image_displacement(&images[i - 1], &images[i]);
        let t_plus = spatial::image_displacement(&images[i], &images[i + 1]);
        let tau = tangent(args.method, i, imax, energies, &t_minus, &t_plus);
        let tt = dot(&tau, &tau);

        // Coincident neighbours: no tangent to project on.
        if tt < 1e-20 {
            out.push(f);
            continue;
        }

        let ft = dot(&f, &tau);
        if args.climb && i == imax {
            for (fk, tk) in f.iter_mut().zip(&tau) {
                *fk -= 2.0 * ft / tt * tk;
            }
        } else {
            let spring = match args.method {
                NebMethod::Aseneb => args.spring * (dot(&t_plus, &tau) - dot(&t_minus, &tau)) / tt,
                NebMethod::ImprovedTangent => {
                    args.spring * (dot(&t_plus, &t_plus).sqrt() - dot(&t_minus, &t_minus).sqrt()) / tt.sqrt()
                }
            };
            for (fk, tk) in f.iter_mut().zip(&tau) {
                *fk += (spring - ft / tt) * tk;
            }
        }

        zero_fixed(&images[i], &mut f);
        out.push(f);
    }
    out
}

/// Largest per-atom NEB force over the interior (the convergence measure).
pub fn band_fmax(neb_forces: &[Vec<f64>]) -> f64 {
    neb_forces.iter().map(|f| spatial::max_atom_norm(f)).fold(0.0, f64::max)
}
