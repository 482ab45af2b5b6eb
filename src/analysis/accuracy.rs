//! Surrogate-vs-reference accuracy on a relaxed band.

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::config::ConvergenceCriteria;
use crate::core::domain::Image;
use crate::core::error::{AinebError, AinebResult};
use crate::engine::evaluator::{Evaluator, EvaluatorFactory};
use crate::engine::surrogate::Surrogate;

/// The four accuracy metrics, in the order they are compared and printed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub energy_rmse: f64,
    pub energy_maxresid: f64,
    pub force_rmse: f64,
    pub force_maxresid: f64,
}

/// Pass/fail per metric, same order as `AccuracyReport::values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConvergenceStatus(pub [bool; 4]);

impl ConvergenceStatus {
    pub fn all_passed(&self) -> bool {
        self.0.iter().all(|&p| p)
    }
}

impl AccuracyReport {
    pub const NAMES: [&'static str; 4] = ["energy_rmse", "energy_maxresid", "force_rmse", "force_maxresid"];

    pub fn values(&self) -> [f64; 4] {
        [self.energy_rmse, self.energy_maxresid, self.force_rmse, self.force_maxresid]
    }

    /// A metric passes when it is `<=` its threshold.
    pub fn status(&self, criteria: &ConvergenceCriteria) -> ConvergenceStatus {
        let limits = [
            criteria.energy_rmse,
            criteria.energy_maxresid,
            criteria.force_rmse,
            criteria.force_maxresid,
        ];
        let mut passed = [false; 4];
        for (p, (v, l)) in passed.iter_mut().zip(self.values().iter().zip(&limits)) {
            *p = v <= l;
        }
        ConvergenceStatus(passed)
    }

    /// One-line summary in fixed-width scientific notation.
    pub fn status_line(&self, iteration: usize, status: &ConvergenceStatus) -> String {
        let mut line = format!("Iteration {:>3}:", iteration);
        for ((name, value), passed) in Self::NAMES.iter().zip(self.values()).zip(status.0) {
            line.push_str(&format!("  {} {:.4e} [{}]", name, value, if passed { "ok" } else { "--" }));
        }
        line
    }
}

/// `(rmse, max |residual|)` of `predicted - reference`. Zero for empty input.
pub fn residual_stats(predicted: &[f64], reference: &[f64]) -> (f64, f64) {
    if predicted.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum_sq = 0.0;
    let mut max_abs: f64 = 0.0;
    for (p, r) in predicted.iter().zip(reference) {
        let d = p - r;
        sum_sq += d * d;
        max_abs = max_abs.max(d.abs());
    }
    ((sum_sq / predicted.len() as f64).sqrt(), max_abs)
}

/// Result of validating one band.
#[derive(Debug, Clone)]
pub struct Validation {
    pub report: AccuracyReport,
    /// The validated images carrying their reference labels, in band order.
    pub reference_images: Vec<Image>,
    pub predicted_energies: Vec<f64>,
}

fn flatten(forces: &[nalgebra::Vector3<f64>]) -> impl Iterator<Item = f64> + '_ {
    forces.iter().flat_map(|f| [f.x, f.y, f.z])
}

fn reference_label(evaluator: &mut dyn Evaluator, image: &Image) -> anyhow::Result<Image> {
    let forces = evaluator.forces(image)?;
    let energy = evaluator.energy(image)?;
    Ok(image.unlabeled().with_labels(energy, forces))
}

/// Labels `images` with the reference evaluator, one fresh instance per image,
/// and compares the surrogate against those labels. Raw forces on both sides.
///
/// `image_offset` is added to image indices in error reports.
pub fn validate(
    images: &[Image],
    surrogate: &dyn Surrogate,
    factory: &dyn EvaluatorFactory,
    iteration: usize,
    image_offset: usize,
) -> AinebResult<Validation> {
    let evaluators: Vec<Box<dyn Evaluator>> = images.iter().map(|_| factory.create()).collect();

    let reference_images = images
        .par_iter()
        .zip(evaluators.into_par_iter())
        .enumerate()
        .map(|(idx, (image, mut evaluator))| {
            reference_label(evaluator.as_mut(), image).map_err(|e| AinebError::Evaluator {
                iteration,
                image: idx + image_offset,
                message: format!("{} ({}): {:#}", evaluator.name(), idx + image_offset, e),
            })
        })
        .collect::<AinebResult<Vec<Image>>>()?;

    let mut e_pred = Vec::with_capacity(images.len());
    let mut e_ref = Vec::with_capacity(images.len());
    let mut f_pred = Vec::new();
    let mut f_ref = Vec::new();

    for (idx, labeled) in reference_images.iter().enumerate() {
        let sp = surrogate.predict(labeled).map_err(|e| AinebError::Surrogate {
            iteration,
            message: format!("predicting image {}: {:#}", idx + image_offset, e),
        })?;
        e_pred.push(sp.energy);
        f_pred.extend(flatten(&sp.forces));
        if let (Some(e), Some(f)) = (labeled.energy, labeled.forces.as_ref()) {
            e_ref.push(e);
            f_ref.extend(flatten(f));
        }
    }

    let (energy_rmse, energy_maxresid) = residual_stats(&e_pred, &e_ref);
    let (force_rmse, force_maxresid) = residual_stats(&f_pred, &f_ref);
    let report = AccuracyReport {
        energy_rmse,
        energy_maxresid,
        force_rmse,
        force_maxresid,
    };
    debug!("Validated {} images: {:?}", reference_images.len(), report);

    Ok(Validation {
        report,
        reference_images,
        predicted_energies: e_pred,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_stats_known_values() {
        let predicted = [1.0, 2.0, 3.0, 4.0];
        let reference = [1.0, 1.0, 3.0, 6.0];
        let (rmse, max) = residual_stats(&predicted, &reference);
        // residuals 0, 1, 0, -2
        assert!((rmse - (5.0f64 / 4.0).sqrt()).abs() < 1e-12);
        assert_eq!(max, 2.0);
    }

    #[test]
    fn threshold_is_inclusive() {
        let criteria = ConvergenceCriteria::default();
        let report = AccuracyReport {
            energy_rmse: criteria.energy_rmse,
            energy_maxresid: 0.0,
            force_rmse: criteria.force_rmse,
            force_maxresid: criteria.force_maxresid + 1e-9,
        };
        let status = report.status(&criteria);
        assert_eq!(status, ConvergenceStatus([true, true, true, false]));
        assert!(!status.all_passed());
    }
}
