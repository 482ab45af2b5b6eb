use anyhow::{bail, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::domain::Image;
use crate::core::spatial;
use crate::engine::evaluator::{Evaluator, EvaluatorFactory, ResultCache, SinglePoint};

/// Shifted Lennard-Jones pair potential, species-blind.
///
/// Cheap enough to stand in for a first-principles code in demos and tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LennardJonesParams {
    pub epsilon: f64,
    pub sigma: f64,
    pub cutoff: f64,
}

impl LennardJonesParams {
    fn pair(&self, r: f64) -> (f64, f64) {
        let sr6 = (self.sigma / r).powi(6);
        let sc6 = (self.sigma / self.cutoff).powi(6);
        let e = 4.0 * self.epsilon * (sr6 * sr6 - sr6) - 4.0 * self.epsilon * (sc6 * sc6 - sc6);
        // dE/dr
        let de = -24.0 * self.epsilon * (2.0 * sr6 * sr6 - sr6) / r;
        (e, de)
    }

    pub fn compute(&self, image: &Image) -> Result<SinglePoint> {
        let lattice = image.lattice.as_ref();
        let mut energy = 0.0;
        let mut forces = vec![Vector3::zeros(); image.len()];

        for (i, j, r) in spatial::neighbor_pairs(image, self.cutoff) {
            if r < 1e-8 {
                bail!("atoms {} and {} overlap", i, j);
            }
            let (e, de) = self.pair(r);
            energy += e;
            // d points from i to j
            let d = spatial::displacement(&image.atoms[i].position, &image.atoms[j].position, lattice);
            let f = d * (de / r);
            forces[i] += f;
            forces[j] -= f;
        }

        Ok(SinglePoint { energy, forces })
    }
}

#[derive(Debug, Clone)]
pub struct LennardJones {
    params: LennardJonesParams,
    cache: ResultCache,
}

impl LennardJones {
    pub fn new(epsilon: f64, sigma: f64, cutoff: f64) -> Self {
        Self {
            params: LennardJonesParams { epsilon, sigma, cutoff },
            cache: ResultCache::default(),
        }
    }
}

impl Evaluator for LennardJones {
    fn forces(&mut self, image: &Image) -> Result<Vec<Vector3<f64>>> {
        let params = self.params;
        let sp = self.cache.get_or_compute(image, |img| params.compute(img))?;
        Ok(sp.forces.clone())
    }

    fn energy(&mut self, image: &Image) -> Result<f64> {
        let params = self.params;
        let sp = self.cache.get_or_compute(image, |img| params.compute(img))?;
        Ok(sp.energy)
    }

    fn name(&self) -> &str {
        "Lennard-Jones"
    }
}

impl EvaluatorFactory for LennardJonesParams {
    fn create(&self) -> Box<dyn Evaluator> {
        Box::new(LennardJones::new(self.epsilon, self.sigma, self.cutoff))
    }
}
