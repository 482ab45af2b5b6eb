use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::Sender;
use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::accuracy::{self, Validation};
use crate::comm::{self, CollectiveChannel, ThreadGroup};
use crate::core::config::{ConvergenceCriteria, ReferenceConfig, RunConfig};
use crate::core::domain::{Image, TrainingSet};
use crate::core::error::{AinebError, AinebResult};
use crate::core::path::{self, Band};
use crate::core::trajectory;
use crate::engine::analytic::LennardJonesParams;
use crate::engine::evaluator::EvaluatorFactory;
use crate::engine::external::gulp::GulpFactory;
use crate::engine::operators;
use crate::engine::surrogate::{ModelHandle, ModelStore, PairFactory, Surrogate, SurrogateFactory};
use crate::solvers::aineb::{self, CoordinatorDuties, LoopSettings, Role};
use crate::solvers::band;
use crate::solvers::{IterationStats, LoopEvent, RunOutcome};

pub const MEP_FILE: &str = "mep.json";
pub const TRAINING_FILE: &str = "train_new.json";
pub const HISTORY_FILE: &str = "history.csv";

/// Everything the coordinator reads before the first iteration.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub initial: Image,
    pub final_image: Image,
    pub training_set: TrainingSet,
}

impl RunInputs {
    /// Reads the endpoints and the training set named in `config`.
    /// Unlabeled endpoints are labeled with the reference evaluator.
    pub fn load(config: &RunConfig, reference: &dyn EvaluatorFactory) -> AinebResult<Self> {
        let label_endpoint = |image: Image, which: &str| -> AinebResult<Image> {
            if image.is_labeled() {
                return Ok(image);
            }
            info!("Labeling {} endpoint with the reference evaluator", which);
            operators::label(&image, reference).map_err(|e| AinebError::Evaluator {
                iteration: 0,
                image: if which == "initial" { 0 } else { config.num_inter_images + 1 },
                message: format!("{:#}", e),
            })
        };

        let initial = label_endpoint(trajectory::read_last(&config.initial_file)?, "initial")?;
        let final_image = label_endpoint(trajectory::read_last(&config.final_file)?, "final")?;
        initial.check_compatible(&final_image)?;

        let training_set = match (&config.train_file, &config.bootstrap) {
            (Some(file), _) => TrainingSet::new(trajectory::read_images(file)?)?,
            (None, Some(bootstrap)) => {
                operators::bootstrap_training_set(&initial, &final_image, bootstrap, reference).map_err(|e| {
                    AinebError::Training {
                        iteration: 0,
                        message: format!("bootstrap: {:#}", e),
                    }
                })?
            }
            (None, None) => {
                return Err(AinebError::Config("either train_file or bootstrap must be given".into()))
            }
        };
        info!("Loaded {} training images", training_set.len());

        Ok(Self {
            initial,
            final_image,
            training_set,
        })
    }
}

/// One `history.csv` row.
#[derive(Debug, Serialize)]
struct HistoryRow {
    run_id: String,
    timestamp: String,
    iteration: usize,
    energy_rmse: f64,
    energy_maxresid: f64,
    force_rmse: f64,
    force_maxresid: f64,
    energy_rmse_ok: bool,
    energy_maxresid_ok: bool,
    force_rmse_ok: bool,
    force_maxresid_ok: bool,
    training_size: usize,
    relax_steps: usize,
    relax_fmax: f64,
}

/// The coordinator's side of a run: owns the training set, the model store
/// and every output file.
pub struct Coordinator<'a> {
    run_id: Uuid,
    initial: Image,
    final_image: Image,
    num_inter_images: usize,
    training_set: TrainingSet,
    criteria: ConvergenceCriteria,
    store: ModelStore,
    surrogate: &'a dyn SurrogateFactory,
    reference: &'a dyn EvaluatorFactory,
    output_dir: PathBuf,
    history: Option<csv::Writer<File>>,
    events: Option<Sender<LoopEvent>>,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        inputs: RunInputs,
        config: &RunConfig,
        surrogate: &'a dyn SurrogateFactory,
        reference: &'a dyn EvaluatorFactory,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            initial: inputs.initial,
            final_image: inputs.final_image,
            num_inter_images: config.num_inter_images,
            training_set: inputs.training_set,
            criteria: config.convergence.clone(),
            store: ModelStore::new(&config.output_dir, config.surrogate.label.clone()),
            surrogate,
            reference,
            output_dir: config.output_dir.clone(),
            history: None,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Sender<LoopEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn training_set(&self) -> &TrainingSet {
        &self.training_set
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn append_history(&mut self, stats: &IterationStats) -> anyhow::Result<()> {
        if self.history.is_none() {
            std::fs::create_dir_all(&self.output_dir)?;
            self.history = Some(csv::Writer::from_path(self.output_dir.join(HISTORY_FILE))?);
        }
        let [e_rmse, e_max, f_rmse, f_max] = stats.status.0;
        let row = HistoryRow {
            run_id: self.run_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            iteration: stats.iteration,
            energy_rmse: stats.report.energy_rmse,
            energy_maxresid: stats.report.energy_maxresid,
            force_rmse: stats.report.force_rmse,
            force_maxresid: stats.report.force_maxresid,
            energy_rmse_ok: e_rmse,
            energy_maxresid_ok: e_max,
            force_rmse_ok: f_rmse,
            force_maxresid_ok: f_max,
            training_size: stats.training_size,
            relax_steps: stats.relax_steps,
            relax_fmax: stats.relax_fmax,
        };
        if let Some(writer) = self.history.as_mut() {
            writer.serialize(row)?;
            writer.flush()?;
        }
        Ok(())
    }
}

impl CoordinatorDuties for Coordinator<'_> {
    fn seed_band(&mut self) -> AinebResult<Band> {
        path::initialize(&self.initial, &self.final_image, self.num_inter_images)
    }

    fn train(&mut self, iteration: usize) -> AinebResult<ModelHandle> {
        info!("Training surrogate on {} images", self.training_set.len());
        self.store
            .train_and_publish(self.surrogate, &self.training_set)
            .map_err(|e| AinebError::Training {
                iteration,
                message: format!("{:#}", e),
            })
    }

    fn validate(&mut self, iteration: usize, band: &Band, model: &dyn Surrogate) -> AinebResult<Validation> {
        accuracy::validate(band.interior(), model, self.reference, iteration, 1)
    }

    fn criteria(&self) -> &ConvergenceCriteria {
        &self.criteria
    }

    fn accept(&mut self, _iteration: usize, band: Band) -> AinebResult<()> {
        let file = self.output_dir.join(MEP_FILE);
        trajectory::write_images(&file, band.images())?;
        info!("Minimum energy path written to {}", file.display());
        self.emit(LoopEvent::Log(format!("MEP written to {}", file.display())));
        Ok(())
    }

    fn reject(&mut self, _iteration: usize, labeled: Vec<Image>) -> AinebResult<()> {
        let added = labeled.len();
        self.training_set.extend_labeled(labeled)?;
        let file = self.output_dir.join(TRAINING_FILE);
        trajectory::write_images(&file, self.training_set.images())?;
        info!("Training set grows by {} to {} images", added, self.training_set.len());
        Ok(())
    }

    fn training_size(&self) -> usize {
        self.training_set.len()
    }

    fn record(&mut self, stats: &IterationStats) {
        if let Err(e) = self.append_history(stats) {
            warn!("Could not append to {}: {:#}", HISTORY_FILE, e);
        }
        self.emit(LoopEvent::IterationFinished(stats.clone()));
    }

    fn iteration_started(&mut self, iteration: usize) {
        self.emit(LoopEvent::IterationStarted(iteration));
    }
}

/// Builds the configured reference evaluator factory.
pub fn reference_factory(config: &RunConfig) -> Box<dyn EvaluatorFactory> {
    match &config.reference {
        ReferenceConfig::Gulp { executable, potentials } => Box::new(GulpFactory {
            executable: executable.clone(),
            potentials: potentials.clone(),
            species: config.species.clone(),
        }),
        ReferenceConfig::LennardJones { epsilon, sigma, cutoff } => Box::new(LennardJonesParams {
            epsilon: *epsilon,
            sigma: *sigma,
            cutoff: *cutoff,
        }),
    }
}

pub fn settings(config: &RunConfig) -> LoopSettings {
    LoopSettings {
        num_inter_images: config.num_inter_images,
        max_iteration: config.convergence.max_iteration,
        neb: config.neb.clone(),
    }
}

/// Runs a whole AI-NEB job on `workers` thread ranks.
///
/// The coordinator reads the inputs, every rank runs the loop, and the first
/// failure in rank order (or the coordinator's outcome) is returned.
pub fn launch(
    config: &RunConfig,
    workers: usize,
    reference: &dyn EvaluatorFactory,
    surrogate: &dyn SurrogateFactory,
    events: Option<Sender<LoopEvent>>,
) -> AinebResult<RunOutcome> {
    config.validate()?;
    band::check_ownership(workers, config.num_inter_images)?;

    let settings = settings(config);
    let deadline = config.collective_timeout_secs.map(Duration::from_secs);

    let results = ThreadGroup::run(workers, deadline, |channel| -> AinebResult<RunOutcome> {
        if !channel.is_coordinator() {
            comm::consensus(&channel, Ok(()), 0)?;
            return aineb::run(&channel, Role::Worker, surrogate, &settings);
        }

        let prepared = RunInputs::load(config, reference).map(|inputs| {
            let coordinator = Coordinator::new(inputs, config, surrogate, reference);
            match &events {
                Some(tx) => coordinator.with_events(tx.clone()),
                None => coordinator,
            }
        });
        let (ready, coordinator) = match prepared {
            Ok(c) => (Ok(()), Some(c)),
            Err(e) => (Err(e), None),
        };
        comm::consensus(&channel, ready, 0)?;
        let mut coordinator =
            coordinator.ok_or_else(|| AinebError::Config("coordinator setup failed".into()))?;

        info!("Run {} on {} ranks", coordinator.run_id(), channel.size());
        aineb::run(&channel, Role::Coordinator(&mut coordinator), surrogate, &settings)
    })?;

    let outcome = results
        .into_iter()
        .collect::<AinebResult<Vec<RunOutcome>>>()
        .and_then(|all| {
            all.into_iter()
                .next()
                .ok_or_else(|| AinebError::Config("no ranks ran".into()))
        });

    if let Some(tx) = &events {
        let _ = match &outcome {
            Ok(o) => tx.send(LoopEvent::Finished(*o)),
            Err(e) => tx.send(LoopEvent::Failed(e.to_string())),
        };
    }
    outcome
}

/// `launch` with the collaborators named in `config`.
pub fn launch_configured(
    config: &RunConfig,
    workers: usize,
    events: Option<Sender<LoopEvent>>,
) -> AinebResult<RunOutcome> {
    let reference = reference_factory(config);
    let surrogate = PairFactory::new(config.species.len(), config.surrogate.clone());
    launch(config, workers, reference.as_ref(), &surrogate, events)
}
