//! Distributed relaxation of a band on the surrogate surface.
//!
//! Rank `r` owns interior image `r + 1` and is the only rank that ever moves
//! it. Every step each rank predicts its own image, the per-rank results are
//! all-gathered, and every rank then computes the same NEB forces and the same
//! convergence decision from that identical snapshot.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::comm::CollectiveChannel;
use crate::core::config::NebArgs;
use crate::core::domain::Image;
use crate::core::error::{AinebError, AinebResult, Signal};
use crate::core::path::Band;
use crate::engine::surrogate::Surrogate;
use crate::solvers::bfgs::Bfgs;
use crate::solvers::{interpolate, neb};

/// One rank's contribution to a relaxation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeState {
    positions: Vec<f64>,
    energy: f64,
    forces: Vec<f64>,
}

/// How the local relaxation ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelaxSummary {
    pub steps: usize,
    pub fmax: f64,
    pub converged: bool,
}

/// Fails unless exactly one rank is available per interior image.
pub fn check_ownership(workers: usize, interior: usize) -> AinebResult<()> {
    if workers != interior {
        return Err(AinebError::ConfigurationMismatch { workers, images: interior });
    }
    Ok(())
}

fn flat_forces(forces: &[nalgebra::Vector3<f64>]) -> Vec<f64> {
    forces.iter().flat_map(|f| [f.x, f.y, f.z]).collect()
}

fn surrogate_failure(iteration: usize, rank: usize, err: anyhow::Error) -> AinebError {
    AinebError::Surrogate {
        iteration,
        message: format!("rank {}: {:#}", rank, err),
    }
}

/// Endpoint energy: the stored label, or the surrogate's estimate when unlabeled.
fn endpoint_energy(image: &Image, model: &dyn Surrogate, iteration: usize, rank: usize) -> AinebResult<f64> {
    match image.energy {
        Some(e) => Ok(e),
        None => model
            .predict(image)
            .map(|sp| sp.energy)
            .map_err(|e| surrogate_failure(iteration, rank, e)),
    }
}

pub struct BandOptimizer<'a> {
    args: &'a NebArgs,
}

impl<'a> BandOptimizer<'a> {
    pub fn new(args: &'a NebArgs) -> Self {
        Self { args }
    }

    /// Collective. Relaxes the band with `model` and returns the relaxed band
    /// on the coordinator (`None` elsewhere) plus the shared summary.
    ///
    /// `seed` is read on the coordinator only. With `reseed` the coordinator
    /// replaces its interior with the configured interpolation before the
    /// band is broadcast.
    pub fn optimize<C: CollectiveChannel>(
        &self,
        channel: &C,
        seed: Option<AinebResult<Band>>,
        model: &dyn Surrogate,
        reseed: bool,
        iteration: usize,
    ) -> AinebResult<(Option<Band>, RelaxSummary)> {
        let rank = channel.rank();

        let (outgoing, originals) = match seed {
            Some(Ok(mut band)) => {
                let endpoints = (band.initial().clone(), band.final_image().clone());
                if reseed {
                    interpolate::interpolate(&mut band, self.args.interp);
                    debug!("Interpolated {} interior images ({:?})", band.num_interior(), self.args.interp);
                }
                (Some(Signal::Proceed(band)), Some(endpoints))
            }
            Some(Err(e)) => (Some(Signal::from_result(Err(e), iteration)), None),
            None => (None, None),
        };
        let band = channel.broadcast(outgoing)?.into_result()?;
        check_ownership(channel.size(), band.num_interior())?;

        let own = rank + 1;
        let last = band.len() - 1;
        let mut images = band.into_images();
        let mut energies = vec![0.0; images.len()];
        energies[0] = endpoint_energy(&images[0], model, iteration, rank)?;
        energies[last] = endpoint_energy(&images[last], model, iteration, rank)?;

        let mut optimizer = Bfgs::new(self.args.maxstep);
        let mut summary = RelaxSummary {
            steps: 0,
            fmax: f64::INFINITY,
            converged: false,
        };

        for step in 0..=self.args.steps {
            let local = model
                .predict(&images[own])
                .map(|sp| NodeState {
                    positions: images[own].positions_flat(),
                    energy: sp.energy,
                    forces: flat_forces(&sp.forces),
                })
                .map_err(|e| surrogate_failure(iteration, rank, e));

            let states = channel
                .all_gather(Signal::from_result(local, iteration))?
                .into_iter()
                .map(Signal::into_result)
                .collect::<AinebResult<Vec<NodeState>>>()?;

            let mut raw = Vec::with_capacity(states.len());
            for (r, state) in states.into_iter().enumerate() {
                images[r + 1].set_positions_flat(&state.positions);
                energies[r + 1] = state.energy;
                raw.push(state.forces);
            }

            let forces = neb::project_forces(&images, &energies, &raw, self.args);
            let fmax = neb::band_fmax(&forces);
            summary.steps = step;
            summary.fmax = fmax;
            debug!("NEB step {:>4}  fmax {:.4e}", step, fmax);

            if fmax <= self.args.fmax {
                summary.converged = true;
                break;
            }
            if step == self.args.steps {
                break;
            }

            let current = images[own].positions_flat();
            let mut next = optimizer.step(&current, &forces[rank]);
            for (atom, (n, c)) in images[own]
                .atoms
                .iter()
                .zip(next.chunks_exact_mut(3).zip(current.chunks_exact(3)))
            {
                if atom.is_fixed {
                    n.copy_from_slice(c);
                }
            }
            images[own].set_positions_flat(&next);
        }

        if channel.is_coordinator() {
            if summary.converged {
                info!("Band relaxed in {} steps (fmax {:.4e})", summary.steps, summary.fmax);
            } else {
                warn!("Band not relaxed after {} steps (fmax {:.4e})", summary.steps, summary.fmax);
            }
        }

        let gathered = channel.gather(images[own].unlabeled())?;
        let relaxed = match (gathered, originals) {
            (Some(interior), Some((initial, final_image))) => {
                Some(Band::from_parts(initial, interior, final_image)?)
            }
            _ => None,
        };
        Ok((relaxed, summary))
    }
}
