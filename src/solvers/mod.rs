use serde::{Deserialize, Serialize};

use crate::analysis::accuracy::{AccuracyReport, ConvergenceStatus};

/// Statistics for one completed train/relax/validate iteration.
/// Used for telemetry and UI visualization.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationStats {
    /// 1-based, as printed in the log.
    pub iteration: usize,
    pub report: AccuracyReport,
    pub status: ConvergenceStatus,
    pub relax_steps: usize,
    pub relax_fmax: f64,
    pub relax_converged: bool,
    /// Training set size after this iteration's decision.
    pub training_size: usize,
    /// Surrogate energy of every band image, endpoints included.
    pub surrogate_profile: Vec<f64>,
    /// Reference energy of every band image, endpoints included.
    pub reference_profile: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// All four accuracy metrics met their thresholds at this (1-based) iteration.
    Converged { iteration: usize },
    /// `max_iteration` iterations ran without converging.
    Exhausted { iterations: usize },
}

/// Events emitted by the coordinator to the main thread.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    /// Diagnostic log message.
    Log(String),

    /// A new (1-based) iteration has begun.
    IterationStarted(usize),

    IterationFinished(IterationStats),

    /// The run ended normally.
    Finished(RunOutcome),

    /// The run aborted with a fatal error.
    Failed(String),
}

pub mod aineb;
pub mod band;
pub mod bfgs;
pub mod coordinator;
pub mod interpolate;
pub mod neb;
