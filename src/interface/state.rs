use std::collections::VecDeque;
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::core::config::RunConfig;
use crate::solvers::{IterationStats, LoopEvent, RunOutcome};

// --- Constants ---
const HISTORY_CAPACITY: usize = 1000;
const LOG_CAPACITY: usize = 200;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Dashboard,
    Parameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Starting,
    Running,
    Converged,
    Exhausted,
    Error,
}

// --- Telemetry ---

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    /// One entry per finished iteration, oldest first.
    pub iterations: VecDeque<IterationStats>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            iterations: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub fn ingest(&mut self, stats: IterationStats) {
        if self.iterations.len() >= HISTORY_CAPACITY {
            self.iterations.pop_front();
        }
        self.iterations.push_back(stats);
    }

    pub fn latest(&self) -> Option<&IterationStats> {
        self.iterations.back()
    }

    /// `(image index, energy)` points of the latest band, for charting.
    /// Non-finite energies (unlabeled endpoints) are skipped.
    pub fn profiles(&self) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
        let points = |energies: &[f64]| -> Vec<(f64, f64)> {
            energies
                .iter()
                .enumerate()
                .filter(|(_, e)| e.is_finite())
                .map(|(i, e)| (i as f64, *e))
                .collect()
        };
        match self.latest() {
            Some(s) => (points(&s.surrogate_profile), points(&s.reference_profile)),
            None => (Vec::new(), Vec::new()),
        }
    }
}

// --- The Master State ---

pub struct AppState {
    // System
    pub should_quit: bool,
    pub mode: AppMode,
    pub config: RunConfig,
    pub workers: usize,

    // Worker
    pub rx: Option<Receiver<LoopEvent>>,
    pub worker_status: WorkerStatus,

    // Run data
    pub current_iteration: usize,
    pub start_time: Instant,
    pub outcome: Option<RunOutcome>,

    // Analytics
    pub telemetry: Telemetry,
    pub logs: VecDeque<String>,
}

impl AppState {
    pub fn new(config: RunConfig, workers: usize) -> Self {
        Self {
            should_quit: false,
            mode: AppMode::Dashboard,
            config,
            workers,
            rx: None,
            worker_status: WorkerStatus::Idle,
            current_iteration: 0,
            start_time: Instant::now(),
            outcome: None,
            telemetry: Telemetry::new(),
            logs: VecDeque::with_capacity(LOG_CAPACITY),
        }
    }

    pub fn set_channel(&mut self, rx: Receiver<LoopEvent>) {
        self.rx = Some(rx);
        self.worker_status = WorkerStatus::Starting;
        self.start_time = Instant::now();
    }

    pub fn tick(&mut self) {
        if let Some(rx) = self.rx.clone() {
            for _ in 0..100 {
                match rx.try_recv() {
                    Ok(evt) => self.handle_event(evt),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if matches!(self.worker_status, WorkerStatus::Starting | WorkerStatus::Running) {
                            self.worker_status = WorkerStatus::Error;
                            self.log("Run thread disconnected.");
                        }
                        self.rx = None;
                        break;
                    }
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Log(msg) => self.log(msg),

            LoopEvent::IterationStarted(iteration) => {
                self.worker_status = WorkerStatus::Running;
                self.current_iteration = iteration;
                self.log(format!("Iteration {} started", iteration));
            }

            LoopEvent::IterationFinished(stats) => {
                self.worker_status = WorkerStatus::Running;
                self.log(stats.report.status_line(stats.iteration, &stats.status));
                self.telemetry.ingest(stats);
            }

            LoopEvent::Finished(outcome) => {
                self.worker_status = match outcome {
                    RunOutcome::Converged { .. } => WorkerStatus::Converged,
                    RunOutcome::Exhausted { .. } => WorkerStatus::Exhausted,
                };
                self.log(match outcome {
                    RunOutcome::Converged { iteration } => format!(">>> Converged at iteration {}", iteration),
                    RunOutcome::Exhausted { iterations } => {
                        format!("Not converged after {} iterations", iterations)
                    }
                });
                self.outcome = Some(outcome);
            }

            LoopEvent::Failed(message) => {
                self.worker_status = WorkerStatus::Error;
                self.log(format!("Run failed: {}", message));
            }
        }
    }

    /// Logs a message to the internal buffer.
    pub fn log(&mut self, msg: impl Into<String>) {
        if self.logs.len() >= LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(msg.into());
    }

    // --- Input Handling ---

    pub fn on_key(&mut self, key: char) {
        match key {
            'q' => self.should_quit = true,
            '1' => self.mode = AppMode::Dashboard,
            '2' => self.mode = AppMode::Parameters,
            _ => {}
        }
    }
}
