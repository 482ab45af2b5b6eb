use std::time::Duration;

use aineb::comm::{self, CollectiveChannel, LocalChannel, ThreadGroup};
use aineb::core::error::{AinebError, Signal};

use crate::common::*;

mod common;

#[test]
fn test_broadcast_reaches_every_rank_unchanged() {
    let payload = vec![0.1, 1.0 / 3.0, -2.5e-17, 6.02214076e23];

    let received = ThreadGroup::run(4, TIMEOUT, |channel| {
        let value = if channel.is_coordinator() { Some(payload.clone()) } else { None };
        channel.broadcast(value)
    })
    .unwrap();

    for r in received {
        assert_eq!(r.unwrap(), payload);
    }
}

#[test]
fn test_repeated_broadcasts_are_idempotent() {
    let received = ThreadGroup::run(3, TIMEOUT, |channel| {
        let value = channel.is_coordinator().then(|| "seed".to_string());
        let first = channel.broadcast(value.clone())?;
        let second = channel.broadcast(Some(first.clone()).filter(|_| channel.is_coordinator()))?;
        Ok::<_, AinebError>((first, second))
    })
    .unwrap();

    for r in received {
        let (first, second) = r.unwrap();
        assert_eq!(first, "seed");
        assert_eq!(first, second);
    }
}

#[test]
fn test_gather_orders_by_rank() {
    let results = ThreadGroup::run(4, TIMEOUT, |channel| channel.gather(channel.rank() * 10)).unwrap();

    assert_eq!(results[0].as_ref().unwrap(), &Some(vec![0, 10, 20, 30]));
    for r in &results[1..] {
        assert_eq!(r.as_ref().unwrap(), &None);
    }
}

#[test]
fn test_all_gather_is_identical_everywhere() {
    let results = ThreadGroup::run(3, TIMEOUT, |channel| channel.all_gather(channel.rank() as f64 + 0.5)).unwrap();

    for r in results {
        assert_eq!(r.unwrap(), vec![0.5, 1.5, 2.5]);
    }
}

#[test]
fn test_mismatched_collectives_fail_instead_of_hanging() {
    let results = ThreadGroup::run(2, Some(Duration::from_millis(200)), |channel| {
        if channel.is_coordinator() {
            channel.gather(1u8).map(|_| ())
        } else {
            channel.broadcast::<u8>(None).map(|_| ())
        }
    })
    .unwrap();

    for r in results {
        assert!(matches!(r, Err(AinebError::CollectiveProtocol { .. })));
    }
}

#[test]
fn test_departed_rank_is_a_protocol_violation() {
    let results = ThreadGroup::run(3, TIMEOUT, |channel| {
        if channel.rank() == 2 {
            return Ok(());
        }
        channel.barrier()
    })
    .unwrap();

    assert!(matches!(results[0], Err(AinebError::CollectiveProtocol { rank: 0, .. })));
    assert!(results[2].is_ok());
}

#[test]
fn test_consensus_reports_lowest_rank_failure() {
    let results = ThreadGroup::run(3, TIMEOUT, |channel| {
        let local = match channel.rank() {
            1 => Err(AinebError::Surrogate {
                iteration: 4,
                message: "rank 1 broken".into(),
            }),
            2 => Err(AinebError::Surrogate {
                iteration: 4,
                message: "rank 2 broken".into(),
            }),
            _ => Ok(()),
        };
        comm::consensus(&channel, local, 4)
    })
    .unwrap();

    for r in results {
        match r {
            Err(AinebError::Surrogate { iteration: 4, message }) => assert_eq!(message, "rank 1 broken"),
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn test_local_channel_round_trips() {
    let channel = LocalChannel;
    assert!(channel.is_coordinator());
    assert_eq!(channel.size(), 1);
    assert_eq!(channel.broadcast(Some(7)).unwrap(), 7);
    assert_eq!(channel.all_gather("x".to_string()).unwrap(), vec!["x".to_string()]);
    assert!(channel.broadcast::<i32>(None).is_err());

    let signal: Signal<()> = Signal::from_result(Err(AinebError::Config("bad".into())), 0);
    assert!(channel.broadcast(Some(signal)).unwrap().into_result().is_err());
}

#[test]
fn test_failures_keep_their_kind_across_ranks() {
    let failures = || {
        vec![
            AinebError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "train.json missing")),
            AinebError::ConfigurationMismatch { workers: 3, images: 2 },
            AinebError::CollectiveProtocol {
                rank: 2,
                message: "rank 2 left".into(),
            },
            AinebError::Incompatible("atom count 3 vs 4".into()),
            AinebError::Evaluator {
                iteration: 2,
                image: 3,
                message: "SCF did not converge".into(),
            },
        ]
    };
    let expected: Vec<String> = failures().iter().map(|e| e.to_string()).collect();

    let results = ThreadGroup::run(2, TIMEOUT, |channel| {
        let mut seen = Vec::new();
        for err in failures() {
            let signal = channel
                .is_coordinator()
                .then(|| Signal::<()>::from_result(Err(err), 7));
            seen.push(channel.broadcast(signal)?.into_result().unwrap_err());
        }
        Ok::<_, AinebError>(seen)
    })
    .unwrap();

    let received = results.into_iter().nth(1).unwrap().unwrap();
    assert!(matches!(received[0], AinebError::Io(_)));
    assert!(matches!(received[1], AinebError::ConfigurationMismatch { workers: 3, images: 2 }));
    assert!(matches!(received[2], AinebError::CollectiveProtocol { rank: 2, .. }));
    assert!(matches!(received[3], AinebError::Incompatible(_)));
    assert!(matches!(received[4], AinebError::Evaluator { iteration: 2, image: 3, .. }));
    let shown: Vec<String> = received.iter().map(|e| e.to_string()).collect();
    assert_eq!(shown, expected);
}
