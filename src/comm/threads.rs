use std::cell::Cell;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::comm::{CollectiveChannel, Payload, COORDINATOR};
use crate::core::error::{AinebError, AinebResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Op {
    Broadcast,
    Gather,
}

/// One message on the wire. Payloads are serialized bytes; no object is
/// shared between ranks.
#[derive(Debug)]
struct Envelope {
    seq: u64,
    op: Op,
    payload: Vec<u8>,
}

/// Star topology rooted at the coordinator.
enum Links {
    Coordinator {
        to_workers: Vec<Sender<Envelope>>,
        from_workers: Vec<Receiver<Envelope>>,
    },
    Worker {
        to_coordinator: Sender<Envelope>,
        from_coordinator: Receiver<Envelope>,
    },
}

/// The endpoint a single rank uses to talk to the rest of a `ThreadGroup`.
pub struct ThreadChannel {
    rank: usize,
    size: usize,
    links: Links,
    seq: Cell<u64>,
    deadline: Option<Duration>,
}

impl ThreadChannel {
    fn next_seq(&self) -> u64 {
        let s = self.seq.get();
        self.seq.set(s + 1);
        s
    }

    fn violation(&self, message: impl Into<String>) -> AinebError {
        AinebError::CollectiveProtocol {
            rank: self.rank,
            message: message.into(),
        }
    }

    fn send(&self, tx: &Sender<Envelope>, peer: usize, envelope: Envelope) -> AinebResult<()> {
        tx.send(envelope)
            .map_err(|_| self.violation(format!("rank {} has left the group", peer)))
    }

    /// Waits for the matching envelope from `peer`. Disconnects, out-of-order
    /// operations and an expired `deadline` are all protocol violations.
    fn receive(
        &self,
        rx: &Receiver<Envelope>,
        peer: usize,
        seq: u64,
        op: Op,
        deadline: Option<Duration>,
    ) -> AinebResult<Envelope> {
        let received = match deadline {
            Some(limit) => rx.recv_timeout(limit),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let envelope = match received {
            Ok(env) => env,
            Err(RecvTimeoutError::Timeout) => {
                return Err(self.violation(format!(
                    "rank {} did not join {:?} #{} within {:?}",
                    peer, op, seq, deadline.unwrap_or_default()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(self.violation(format!(
                    "rank {} left the group before {:?} #{}",
                    peer, op, seq
                )))
            }
        };

        if envelope.seq != seq || envelope.op != op {
            return Err(self.violation(format!(
                "expected {:?} #{} from rank {}, got {:?} #{}",
                op, seq, peer, envelope.op, envelope.seq
            )));
        }
        Ok(envelope)
    }
}

impl CollectiveChannel for ThreadChannel {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast<T: Payload>(&self, value: Option<T>) -> AinebResult<T> {
        let seq = self.next_seq();
        match &self.links {
            Links::Coordinator { to_workers, .. } => {
                let value = value
                    .ok_or_else(|| self.violation("coordinator supplied no value to broadcast"))?;
                let bytes = serde_json::to_vec(&value)?;
                for (i, tx) in to_workers.iter().enumerate() {
                    let env = Envelope { seq, op: Op::Broadcast, payload: bytes.clone() };
                    self.send(tx, i + 1, env)?;
                }
                Ok(value)
            }
            // Workers may wait on coordinator-only work of any length; a
            // coordinator that gives up drops its senders and wakes them.
            Links::Worker { from_coordinator, .. } => {
                let env = self.receive(from_coordinator, COORDINATOR, seq, Op::Broadcast, None)?;
                Ok(serde_json::from_slice(&env.payload)?)
            }
        }
    }

    fn gather<T: Payload>(&self, value: T) -> AinebResult<Option<Vec<T>>> {
        let seq = self.next_seq();
        match &self.links {
            Links::Coordinator { from_workers, .. } => {
                let mut all = Vec::with_capacity(self.size);
                all.push(value);
                for (i, rx) in from_workers.iter().enumerate() {
                    let env = self.receive(rx, i + 1, seq, Op::Gather, self.deadline)?;
                    all.push(serde_json::from_slice(&env.payload)?);
                }
                Ok(Some(all))
            }
            Links::Worker { to_coordinator, .. } => {
                let payload = serde_json::to_vec(&value)?;
                self.send(to_coordinator, COORDINATOR, Envelope { seq, op: Op::Gather, payload })?;
                Ok(None)
            }
        }
    }
}

/// A fixed-size group of ranks, each running on its own named OS thread.
pub struct ThreadGroup;

impl ThreadGroup {
    /// Wires up `size` endpoints, index == rank. `deadline` bounds how long the
    /// coordinator waits for each worker in a gather; `None` waits indefinitely.
    pub fn channels(size: usize, deadline: Option<Duration>) -> Vec<ThreadChannel> {
        let size = size.max(1);
        let mut to_workers = Vec::with_capacity(size - 1);
        let mut from_workers = Vec::with_capacity(size - 1);
        let mut workers = Vec::with_capacity(size - 1);

        for rank in 1..size {
            let (up_tx, up_rx) = unbounded();
            let (down_tx, down_rx) = unbounded();
            to_workers.push(down_tx);
            from_workers.push(up_rx);
            workers.push(ThreadChannel {
                rank,
                size,
                links: Links::Worker { to_coordinator: up_tx, from_coordinator: down_rx },
                seq: Cell::new(0),
                deadline,
            });
        }

        let mut channels = Vec::with_capacity(size);
        channels.push(ThreadChannel {
            rank: COORDINATOR,
            size,
            links: Links::Coordinator { to_workers, from_workers },
            seq: Cell::new(0),
            deadline,
        });
        channels.extend(workers);
        channels
    }

    /// Runs `f` once per rank and returns the per-rank results in rank order.
    pub fn run<F, R>(size: usize, deadline: Option<Duration>, f: F) -> AinebResult<Vec<R>>
    where
        F: Fn(ThreadChannel) -> R + Sync,
        R: Send,
    {
        let channels = Self::channels(size, deadline);
        let f = &f;

        thread::scope(|s| {
            let mut handles = Vec::with_capacity(channels.len());
            for channel in channels {
                let name = format!("aineb-rank-{}", channel.rank());
                handles.push(thread::Builder::new().name(name).spawn_scoped(s, move || f(channel))?);
            }

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, h)| {
                    h.join().map_err(|_| AinebError::CollectiveProtocol {
                        rank,
                        message: "rank panicked".to_string(),
                    })
                })
                .collect()
        })
    }
}
