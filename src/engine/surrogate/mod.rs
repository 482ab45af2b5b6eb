//! Trainable surrogate models and their distribution to every rank.
//!
//! A trained model never crosses a rank boundary. The coordinator trains it,
//! writes it to a named artifact and broadcasts only the `ModelHandle`; every
//! rank, coordinator included, then loads its own copy from that artifact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::comm::{self, CollectiveChannel};
use crate::core::domain::{Image, TrainingSet};
use crate::core::error::{AinebError, AinebResult, Signal};
use crate::engine::evaluator::SinglePoint;

pub mod pair;

pub use pair::{PairFactory, PairSurrogate};

/// A cheap approximation of the reference evaluator.
pub trait Surrogate: Send {
    fn predict(&self, image: &Image) -> Result<SinglePoint>;

    /// Persists the model so that `SurrogateFactory::load` rebuilds an equivalent one.
    fn save(&self, path: &Path) -> Result<()>;

    fn name(&self) -> &str;
}

/// Trains new models and reloads persisted ones.
pub trait SurrogateFactory: Send + Sync {
    fn train(&self, training_set: &TrainingSet) -> Result<Box<dyn Surrogate>>;

    fn load(&self, path: &Path) -> Result<Box<dyn Surrogate>>;
}

/// The small, serializable stand-in for a trained model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub label: String,
    pub artifact: PathBuf,
}

/// Where trained models are written. One label per run; every retrain
/// overwrites the previous artifact.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    label: String,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self { dir: dir.into(), label: label.into() }
    }

    pub fn handle(&self) -> ModelHandle {
        ModelHandle {
            label: self.label.clone(),
            artifact: self.dir.join(format!("{}.json", self.label)),
        }
    }

    /// Coordinator only: train, persist, and return the handle to broadcast.
    pub fn train_and_publish(
        &self,
        factory: &dyn SurrogateFactory,
        training_set: &TrainingSet,
    ) -> Result<ModelHandle> {
        let model = factory
            .train(training_set)
            .with_context(|| format!("training on {} images", training_set.len()))?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating model directory {}", self.dir.display()))?;

        let handle = self.handle();
        model
            .save(&handle.artifact)
            .with_context(|| format!("saving model to {}", handle.artifact.display()))?;
        log::debug!("Model '{}' written to {}", handle.label, handle.artifact.display());
        Ok(handle)
    }
}

/// Every rank reloads the published model from its handle.
pub fn load(factory: &dyn SurrogateFactory, handle: &ModelHandle) -> Result<Box<dyn Surrogate>> {
    factory
        .load(&handle.artifact)
        .with_context(|| format!("loading model '{}'", handle.label))
}

/// Broadcasts the coordinator's training outcome and has every rank load the
/// model. Fails on all ranks together if training or any load failed.
///
/// `trained` is `Some` on the coordinator, `None` elsewhere.
pub fn distribute<C: CollectiveChannel>(
    channel: &C,
    trained: Option<AinebResult<ModelHandle>>,
    factory: &dyn SurrogateFactory,
    iteration: usize,
) -> AinebResult<Box<dyn Surrogate>> {
    let signal = trained.map(|r| Signal::from_result(r, iteration));
    let handle = channel.broadcast(signal)?.into_result()?;

    let loaded = load(factory, &handle);
    let status = loaded.as_ref().map(|_| ()).map_err(|e| AinebError::Surrogate {
        iteration,
        message: format!("rank {}: {:#}", channel.rank(), e),
    });
    comm::consensus(channel, status, iteration)?;

    loaded.map_err(|e| AinebError::Surrogate { iteration, message: format!("{:#}", e) })
}
