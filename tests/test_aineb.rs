use std::fs;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam_channel::unbounded;

use aineb::comm::{CollectiveChannel, LocalChannel, ThreadGroup};
use aineb::core::config::{BootstrapConfig, RunConfig};
use aineb::core::error::{AinebError, AinebResult};
use aineb::core::trajectory;
use aineb::engine::evaluator::EvaluatorFactory;
use aineb::engine::surrogate::SurrogateFactory;
use aineb::solvers::aineb::{self as active, Role};
use aineb::solvers::coordinator::{self, Coordinator, RunInputs, HISTORY_FILE, MEP_FILE, TRAINING_FILE};
use aineb::solvers::{LoopEvent, RunOutcome};

use crate::common::*;

mod common;

type RankResult = (AinebResult<RunOutcome>, Option<usize>);

/// Runs the loop on `workers` thread ranks; the coordinator also reports its
/// final training set size.
fn run_group(
    config: &RunConfig,
    workers: usize,
    surrogate: &dyn SurrogateFactory,
    reference: &dyn EvaluatorFactory,
) -> Vec<RankResult> {
    let settings = coordinator::settings(config);
    let deadline = config.collective_timeout_secs.map(Duration::from_secs);
    ThreadGroup::run(workers, deadline, |channel| {
        if channel.is_coordinator() {
            let mut c = Coordinator::new(inputs(), config, surrogate, reference);
            let outcome = active::run(&channel, Role::Coordinator(&mut c), surrogate, &settings);
            (outcome, Some(c.training_set().len()))
        } else {
            (active::run(&channel, Role::Worker, surrogate, &settings), None)
        }
    })
    .expect("no rank panicked")
}

fn history_rows(config: &RunConfig) -> usize {
    let text = fs::read_to_string(config.output_dir.join(HISTORY_FILE)).expect("history written");
    text.lines().count() - 1
}

#[test]
fn test_exact_surrogate_converges_on_first_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 2, 5);
    let surrogate = ShiftedFactory::exact();

    let results = run_group(&config, 2, &surrogate, &lj());

    for (outcome, _) in &results {
        assert_eq!(outcome.as_ref().ok(), Some(&RunOutcome::Converged { iteration: 1 }));
    }
    // No augmentation on the converging iteration
    assert_eq!(results[0].1, Some(inputs().training_set.len()));
    assert!(!dir.path().join(TRAINING_FILE).exists());
    assert_eq!(surrogate.trained.load(Ordering::SeqCst), 1);

    let mep = trajectory::read_images(&dir.path().join(MEP_FILE)).unwrap();
    assert_eq!(mep.len(), 4);
    let (initial, final_image) = endpoints();
    assert_eq!(mep[0], initial);
    assert_eq!(mep[3], final_image);
    assert!(mep.iter().all(|img| img.is_labeled()));

    assert!(dir.path().join("surrogate.json").exists());
    assert_eq!(history_rows(&config), 1);
}

#[test]
fn test_exact_surrogate_scores_zero_error_on_every_metric() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 3, 5);
    let surrogate = ShiftedFactory::exact();
    let reference = lj();
    let settings = coordinator::settings(&config);
    let (tx, rx) = unbounded();

    let results = ThreadGroup::run(3, TIMEOUT, |channel| {
        if channel.is_coordinator() {
            let mut c = Coordinator::new(inputs(), &config, &surrogate, &reference).with_events(tx.clone());
            active::run(&channel, Role::Coordinator(&mut c), &surrogate, &settings)
        } else {
            active::run(&channel, Role::Worker, &surrogate, &settings)
        }
    })
    .unwrap();
    drop(tx);

    for outcome in results {
        assert_eq!(outcome.unwrap(), RunOutcome::Converged { iteration: 1 });
    }
    let stats: Vec<_> = rx
        .try_iter()
        .filter_map(|e| match e {
            LoopEvent::IterationFinished(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].iteration, 1);
    assert_eq!(stats[0].report.values(), [0.0; 4]);
    assert!(stats[0].status.all_passed());
    assert_eq!(stats[0].reference_profile.len(), 5);
    assert_eq!(trajectory::read_images(&dir.path().join(MEP_FILE)).unwrap().len(), 5);
    assert!(!dir.path().join(TRAINING_FILE).exists());
}

#[test]
fn test_slow_training_does_not_trip_the_gather_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 2, 2);
    config.collective_timeout_secs = Some(1);
    let surrogate = SlowTrainer {
        inner: ShiftedFactory::exact(),
        delay: Duration::from_millis(1500),
    };

    let results = run_group(&config, 2, &surrogate, &lj());

    for (outcome, _) in results {
        assert_eq!(outcome.unwrap(), RunOutcome::Converged { iteration: 1 });
    }
    assert_eq!(surrogate.inner.trained.load(Ordering::SeqCst), 1);
}

#[test]
fn test_worker_count_mismatch_runs_no_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 2, 5);
    let surrogate = ShiftedFactory::exact();

    let results = run_group(&config, 3, &surrogate, &lj());

    assert_eq!(results.len(), 3);
    for (outcome, _) in results {
        assert!(matches!(
            outcome,
            Err(AinebError::ConfigurationMismatch { workers: 3, images: 2 })
        ));
    }
    assert_eq!(surrogate.trained.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join(HISTORY_FILE).exists());

    let launched = coordinator::launch(&config, 3, &lj(), &surrogate, None);
    assert!(matches!(launched, Err(AinebError::ConfigurationMismatch { .. })));
}

#[test]
fn test_inaccurate_surrogate_exhausts_and_grows_training_set() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 2, 3);
    let surrogate = ShiftedFactory::biased(1.0);
    let start = inputs().training_set.len();

    let results = run_group(&config, 2, &surrogate, &lj());

    for (outcome, _) in &results {
        assert_eq!(outcome.as_ref().ok(), Some(&RunOutcome::Exhausted { iterations: 3 }));
    }
    // n new images per non-converged iteration
    assert_eq!(results[0].1, Some(start + 3 * 2));
    assert_eq!(surrogate.trained.load(Ordering::SeqCst), 3);

    let persisted = trajectory::read_images(&dir.path().join(TRAINING_FILE)).unwrap();
    assert_eq!(persisted.len(), start + 6);
    assert!(persisted.iter().all(|img| img.is_labeled()));
    assert!(!dir.path().join(MEP_FILE).exists());
    assert_eq!(history_rows(&config), 3);
}

#[test]
fn test_evaluator_failure_stops_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 4, 5);
    let reference = FailingFactory::new(2);

    let results = run_group(&config, 4, &ShiftedFactory::exact(), &reference);

    assert_eq!(results.len(), 4);
    // No augmentation from a failed validation
    assert_eq!(results[0].1, Some(inputs().training_set.len()));
    for (outcome, _) in results {
        match outcome {
            Err(AinebError::Evaluator { iteration, image, message }) => {
                assert_eq!(iteration, 1);
                assert_eq!(image, 2);
                assert!(message.contains("SCF did not converge"));
            }
            other => panic!("expected an evaluator failure, got {:?}", other),
        }
    }
    assert_eq!(reference.created.load(Ordering::SeqCst), 4);
    assert!(!dir.path().join(MEP_FILE).exists());
    assert!(!dir.path().join(TRAINING_FILE).exists());
    assert!(!dir.path().join(HISTORY_FILE).exists());
}

#[test]
fn test_training_failure_stops_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 2, 5);

    let results = run_group(&config, 2, &BrokenTrainer, &lj());

    for (outcome, _) in results {
        match outcome {
            Err(AinebError::Training { iteration, message }) => {
                assert_eq!(iteration, 1);
                assert!(message.contains("singular design matrix"));
            }
            other => panic!("expected a training failure, got {:?}", other),
        }
    }
}

#[test]
fn test_single_rank_on_local_channel() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 1, 2);
    let surrogate = ShiftedFactory::exact();
    let reference = lj();
    let mut c = Coordinator::new(inputs(), &config, &surrogate, &reference);

    let outcome = active::run(&LocalChannel, Role::Coordinator(&mut c), &surrogate, &coordinator::settings(&config));

    assert_eq!(outcome.unwrap(), RunOutcome::Converged { iteration: 1 });
    assert_eq!(trajectory::read_images(&dir.path().join(MEP_FILE)).unwrap().len(), 3);
}

#[test]
fn test_launch_from_files_reports_events() {
    let dir = tempfile::tempdir().unwrap();
    let (initial, final_image) = endpoints();
    let mut config = config(&dir.path().join("out"), 2, 4);
    config.initial_file = dir.path().join("initial.json");
    config.final_file = dir.path().join("final.json");
    config.train_file = Some(dir.path().join("train.json"));
    trajectory::write_images(&config.initial_file, &[initial]).unwrap();
    trajectory::write_images(&config.final_file, &[final_image]).unwrap();
    trajectory::write_images(config.train_file.as_ref().unwrap(), inputs().training_set.images()).unwrap();

    let (tx, rx) = unbounded();
    let outcome = coordinator::launch(&config, 2, &lj(), &ShiftedFactory::exact(), Some(tx)).unwrap();
    assert_eq!(outcome, RunOutcome::Converged { iteration: 1 });

    let events: Vec<LoopEvent> = rx.try_iter().collect();
    assert!(events.iter().any(|e| matches!(e, LoopEvent::IterationStarted(1))));
    let stats = events
        .iter()
        .find_map(|e| match e {
            LoopEvent::IterationFinished(s) => Some(s.clone()),
            _ => None,
        })
        .expect("iteration statistics");
    assert!(stats.status.all_passed());
    assert_eq!(stats.surrogate_profile.len(), 4);
    assert_eq!(stats.surrogate_profile, stats.reference_profile);
    assert!(matches!(events.last(), Some(LoopEvent::Finished(RunOutcome::Converged { iteration: 1 }))));
}

#[test]
fn test_bootstrap_builds_labeled_training_set() {
    let dir = tempfile::tempdir().unwrap();
    let (initial, final_image) = endpoints();
    let mut config = config(dir.path(), 2, 1);
    config.initial_file = dir.path().join("initial.json");
    config.final_file = dir.path().join("final.json");
    config.train_file = None;
    config.bootstrap = Some(BootstrapConfig {
        copies: 2,
        rattle: 0.05,
        seed: 7,
    });
    // Unlabeled endpoints get labeled on load
    trajectory::write_images(&config.initial_file, &[initial.unlabeled()]).unwrap();
    trajectory::write_images(&config.final_file, &[final_image.unlabeled()]).unwrap();

    let loaded = RunInputs::load(&config, &lj()).unwrap();
    assert_eq!(loaded.initial, initial);
    assert_eq!(loaded.training_set.len(), 6);
    assert!(loaded.training_set.images().iter().all(|img| img.is_labeled()));

    let again = RunInputs::load(&config, &lj()).unwrap();
    assert_eq!(again.training_set, loaded.training_set);
}
