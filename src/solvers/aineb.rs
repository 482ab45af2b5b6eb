//! The active-learning loop run by every rank.
//!
//! Each iteration trains a surrogate on the coordinator, relaxes the band on
//! that surrogate across all ranks, validates the relaxed band against the
//! reference evaluator on the coordinator and broadcasts the verdict.

use log::info;

use crate::analysis::accuracy::{ConvergenceStatus, Validation};
use crate::comm::CollectiveChannel;
use crate::core::config::{ConvergenceCriteria, NebArgs};
use crate::core::domain::Image;
use crate::core::error::{AinebResult, Signal};
use crate::core::path::Band;
use crate::engine::surrogate::{self, ModelHandle, Surrogate, SurrogateFactory};
use crate::solvers::band::{self, BandOptimizer, RelaxSummary};
use crate::solvers::{IterationStats, RunOutcome};

/// Work only the coordinator performs. Everything here runs outside the
/// collectives; the loop broadcasts its outcome.
pub trait CoordinatorDuties {
    /// The band for the first iteration.
    fn seed_band(&mut self) -> AinebResult<Band>;

    /// Trains on the current training set and publishes the model.
    fn train(&mut self, iteration: usize) -> AinebResult<ModelHandle>;

    /// Reference-labels `band`'s interior and scores `model` against it.
    fn validate(&mut self, iteration: usize, band: &Band, model: &dyn Surrogate) -> AinebResult<Validation>;

    fn criteria(&self) -> &ConvergenceCriteria;

    /// Converged: persist the final band (endpoints plus labeled interior).
    fn accept(&mut self, iteration: usize, band: Band) -> AinebResult<()>;

    /// Not converged: add the freshly labeled images to the training set and persist it.
    fn reject(&mut self, iteration: usize, labeled: Vec<Image>) -> AinebResult<()>;

    fn training_size(&self) -> usize;

    fn record(&mut self, _stats: &IterationStats) {}

    fn iteration_started(&mut self, _iteration: usize) {}
}

pub enum Role<'a> {
    Coordinator(&'a mut dyn CoordinatorDuties),
    Worker,
}

/// Loop state carried across iterations on the coordinator.
#[derive(Debug, Default)]
struct IterationState {
    /// Relaxed band of the previous iteration, labels cleared.
    band: Option<Band>,
}

/// Parameters every rank runs the loop with.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub num_inter_images: usize,
    pub max_iteration: usize,
    pub neb: NebArgs,
}

/// Runs the loop until the surrogate is accurate on the relaxed band or the
/// iteration budget is spent. Collective: every rank calls this with the
/// same settings.
pub fn run<C: CollectiveChannel>(
    channel: &C,
    mut role: Role<'_>,
    factory: &dyn SurrogateFactory,
    settings: &LoopSettings,
) -> AinebResult<RunOutcome> {
    band::check_ownership(channel.size(), settings.num_inter_images)?;

    let optimizer = BandOptimizer::new(&settings.neb);
    let mut state = IterationState::default();

    // Iterations count from 1; 0 is input preparation before the loop.
    for iteration in 1..=settings.max_iteration {
        if let Role::Coordinator(duties) = &mut role {
            info!("Iteration # {}", iteration);
            duties.iteration_started(iteration);
        }

        // Training
        let trained = match &mut role {
            Role::Coordinator(duties) => Some(duties.train(iteration)),
            Role::Worker => None,
        };
        let model = surrogate::distribute(channel, trained, factory, iteration)?;

        // Optimizing
        let seed = match &mut role {
            Role::Coordinator(duties) => Some(match state.band.take() {
                Some(previous) => Ok(previous),
                None => duties.seed_band(),
            }),
            Role::Worker => None,
        };
        let (relaxed, summary) = optimizer.optimize(channel, seed, model.as_ref(), iteration == 1, iteration)?;

        // Validating and deciding
        let verdict = match (&mut role, relaxed) {
            (Role::Coordinator(duties), Some(relaxed)) => {
                let outcome = assess(&mut **duties, iteration, relaxed, model.as_ref(), &summary, &mut state);
                Some(Signal::from_result(outcome, iteration))
            }
            _ => None,
        };
        let status: ConvergenceStatus = channel.broadcast(verdict)?.into_result()?;

        if status.all_passed() {
            if channel.is_coordinator() {
                info!("Converged after {} iterations", iteration);
            }
            return Ok(RunOutcome::Converged { iteration });
        }
    }

    if channel.is_coordinator() {
        info!("Not converged after {} iterations", settings.max_iteration);
    }
    Ok(RunOutcome::Exhausted {
        iterations: settings.max_iteration,
    })
}

fn profile(first: f64, interior: &[f64], last: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(interior.len() + 2);
    out.push(first);
    out.extend_from_slice(interior);
    out.push(last);
    out
}

fn predicted_energy(model: &dyn Surrogate, image: &Image) -> f64 {
    model.predict(image).map(|sp| sp.energy).unwrap_or(f64::NAN)
}

/// Coordinator side of validation and decision.
fn assess(
    duties: &mut dyn CoordinatorDuties,
    iteration: usize,
    relaxed: Band,
    model: &dyn Surrogate,
    summary: &RelaxSummary,
    state: &mut IterationState,
) -> AinebResult<ConvergenceStatus> {
    let validation = duties.validate(iteration, &relaxed, model)?;
    let status = validation.report.status(duties.criteria());
    info!("{}", validation.report.status_line(iteration, &status));

    let reference: Vec<f64> = validation
        .reference_images
        .iter()
        .map(|img| img.energy.unwrap_or(f64::NAN))
        .collect();
    let surrogate_profile = profile(
        predicted_energy(model, relaxed.initial()),
        &validation.predicted_energies,
        predicted_energy(model, relaxed.final_image()),
    );
    let reference_profile = profile(
        relaxed.initial().energy.unwrap_or(f64::NAN),
        &reference,
        relaxed.final_image().energy.unwrap_or(f64::NAN),
    );

    if status.all_passed() {
        let mut labeled = relaxed;
        labeled.replace_interior(validation.reference_images)?;
        duties.accept(iteration, labeled)?;
    } else {
        state.band = Some(relaxed);
        duties.reject(iteration, validation.reference_images)?;
    }

    duties.record(&IterationStats {
        iteration,
        report: validation.report,
        status,
        relax_steps: summary.steps,
        relax_fmax: summary.fmax,
        relax_converged: summary.converged,
        training_size: duties.training_size(),
        surrogate_profile,
        reference_profile,
    });
    Ok(status)
}
