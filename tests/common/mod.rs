#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{bail, Result};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use aineb::core::config::{ConvergenceCriteria, NebArgs, RunConfig};
use aineb::core::domain::{Atom, Image, Species, TrainingSet};
use aineb::engine::analytic::{LennardJones, LennardJonesParams};
use aineb::engine::evaluator::{Evaluator, EvaluatorFactory, SinglePoint};
use aineb::engine::operators;
use aineb::engine::surrogate::{Surrogate, SurrogateFactory};
use aineb::solvers::coordinator::RunInputs;

pub const TIMEOUT: Option<Duration> = Some(Duration::from_secs(30));

pub fn lj() -> LennardJonesParams {
    LennardJonesParams {
        epsilon: 1.0,
        sigma: 1.0,
        cutoff: 3.0,
    }
}

/// Two fixed anchor atoms and one adatom hopping across the gap between them.
pub fn hop_image(y: f64) -> Image {
    let mut anchor_a = Atom::new(0, Point3::new(0.0, 0.0, 0.0));
    anchor_a.is_fixed = true;
    let mut anchor_b = Atom::new(0, Point3::new(2.2, 0.0, 0.0));
    anchor_b.is_fixed = true;
    Image::new(vec![anchor_a, anchor_b, Atom::new(0, Point3::new(1.1, y, 0.3))], None)
}

pub fn labeled(image: &Image) -> Image {
    operators::label(image, &lj()).expect("labeling with Lennard-Jones")
}

pub fn endpoints() -> (Image, Image) {
    (labeled(&hop_image(1.0)), labeled(&hop_image(-1.0)))
}

pub fn inputs() -> RunInputs {
    let (initial, final_image) = endpoints();
    let training: Vec<Image> = [1.0, 0.5, -0.5, -1.0].iter().map(|&y| labeled(&hop_image(y))).collect();
    RunInputs {
        initial,
        final_image,
        training_set: TrainingSet::new(training).expect("labeled training set"),
    }
}

pub fn config(output_dir: &Path, n: usize, max_iteration: usize) -> RunConfig {
    RunConfig {
        species: vec![Species {
            symbol: "Ar".into(),
            atomic_number: 18,
            mass: 39.948,
        }],
        initial_file: PathBuf::from("initial.json"),
        final_file: PathBuf::from("final.json"),
        train_file: Some(PathBuf::from("train.json")),
        num_inter_images: n,
        convergence: ConvergenceCriteria {
            max_iteration,
            ..Default::default()
        },
        neb: NebArgs {
            steps: 15,
            ..Default::default()
        },
        reference: Default::default(),
        surrogate: Default::default(),
        bootstrap: None,
        output_dir: output_dir.to_path_buf(),
        collective_timeout_secs: TIMEOUT.map(|t| t.as_secs()),
    }
}

// --- Surrogates ---

/// Lennard-Jones with an optional constant energy offset. With zero bias it
/// reproduces the reference exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftedSurrogate {
    pub params: LennardJonesParams,
    pub energy_bias: f64,
}

impl Surrogate for ShiftedSurrogate {
    fn predict(&self, image: &Image) -> Result<SinglePoint> {
        let mut sp = self.params.compute(image)?;
        sp.energy += self.energy_bias;
        Ok(sp)
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Shifted LJ"
    }
}

#[derive(Debug, Default)]
pub struct ShiftedFactory {
    pub energy_bias: f64,
    pub trained: AtomicUsize,
}

impl ShiftedFactory {
    pub fn exact() -> Self {
        Self::default()
    }

    pub fn biased(energy_bias: f64) -> Self {
        Self {
            energy_bias,
            trained: AtomicUsize::new(0),
        }
    }
}

impl SurrogateFactory for ShiftedFactory {
    fn train(&self, training_set: &TrainingSet) -> Result<Box<dyn Surrogate>> {
        if training_set.is_empty() {
            bail!("nothing to train on");
        }
        self.trained.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ShiftedSurrogate {
            params: lj(),
            energy_bias: self.energy_bias,
        }))
    }

    fn load(&self, path: &Path) -> Result<Box<dyn Surrogate>> {
        let model: ShiftedSurrogate = serde_json::from_slice(&fs::read(path)?)?;
        Ok(Box::new(model))
    }
}

/// Takes `delay` to train, then behaves like `inner`.
pub struct SlowTrainer {
    pub inner: ShiftedFactory,
    pub delay: Duration,
}

impl SurrogateFactory for SlowTrainer {
    fn train(&self, training_set: &TrainingSet) -> Result<Box<dyn Surrogate>> {
        std::thread::sleep(self.delay);
        self.inner.train(training_set)
    }

    fn load(&self, path: &Path) -> Result<Box<dyn Surrogate>> {
        self.inner.load(path)
    }
}

/// Training always fails.
pub struct BrokenTrainer;

impl SurrogateFactory for BrokenTrainer {
    fn train(&self, _training_set: &TrainingSet) -> Result<Box<dyn Surrogate>> {
        bail!("singular design matrix")
    }

    fn load(&self, _path: &Path) -> Result<Box<dyn Surrogate>> {
        bail!("no model was published")
    }
}

// --- Evaluators ---

struct Failing;

impl Evaluator for Failing {
    fn forces(&mut self, _image: &Image) -> Result<Vec<Vector3<f64>>> {
        bail!("SCF did not converge")
    }

    fn energy(&mut self, _image: &Image) -> Result<f64> {
        bail!("SCF did not converge")
    }

    fn name(&self) -> &str {
        "Failing"
    }
}

/// Lennard-Jones instances, except the `fail_on`-th created (1-based) which always fails.
pub struct FailingFactory {
    pub fail_on: usize,
    pub created: AtomicUsize,
}

impl FailingFactory {
    pub fn new(fail_on: usize) -> Self {
        Self {
            fail_on,
            created: AtomicUsize::new(0),
        }
    }
}

impl EvaluatorFactory for FailingFactory {
    fn create(&self) -> Box<dyn Evaluator> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            Box::new(Failing)
        } else {
            let p = lj();
            Box::new(LennardJones::new(p.epsilon, p.sigma, p.cutoff))
        }
    }
}
