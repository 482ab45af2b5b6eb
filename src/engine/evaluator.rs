use anyhow::Result;
use nalgebra::Vector3;

use crate::core::domain::Image;

/// Energy and per-atom forces of one geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct SinglePoint {
    /// The potential energy (eV).
    pub energy: f64,
    /// Forces (eV/Å), one per atom.
    pub forces: Vec<Vector3<f64>>,
}

/// A reference (ground truth) physics engine.
///
/// Implementations keep the result of their last calculation and answer
/// `energy` after `forces` on the same geometry without recomputing. That cache
/// is per instance: use one instance per image (see `EvaluatorFactory`).
pub trait Evaluator: Send {
    fn forces(&mut self, image: &Image) -> Result<Vec<Vector3<f64>>>;

    fn energy(&mut self, image: &Image) -> Result<f64>;

    /// Returns the name of the engine (e.g., "GULP 6.1").
    fn name(&self) -> &str;
}

/// Creates fresh, independent evaluator instances.
pub trait EvaluatorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Evaluator>;
}

impl<F> EvaluatorFactory for F
where
    F: Fn() -> Box<dyn Evaluator> + Send + Sync,
{
    fn create(&self) -> Box<dyn Evaluator> {
        self()
    }
}

/// Last-result cache shared by the concrete evaluators.
#[derive(Debug, Default, Clone)]
pub struct ResultCache {
    key: Option<Vec<f64>>,
    result: Option<SinglePoint>,
}

impl ResultCache {
    /// Returns the cached result for this geometry, computing it with `calc` on a miss.
    pub fn get_or_compute<F>(&mut self, image: &Image, calc: F) -> Result<&SinglePoint>
    where
        F: FnOnce(&Image) -> Result<SinglePoint>,
    {
        let key = image.positions_flat();
        let hit = self.key.as_ref() == Some(&key) && self.result.is_some();
        if !hit {
            self.result = None;
            let sp = calc(image)?;
            self.key = Some(key);
            self.result = Some(sp);
        }
        match &self.result {
            Some(sp) => Ok(sp),
            None => anyhow::bail!("evaluator cache is empty"),
        }
    }
}
