//! Collective operations over a fixed group of cooperating ranks.
//!
//! Rank 0 is the coordinator. Every rank must issue the same collective calls
//! in the same order; a rank that skips one is reported as a
//! `CollectiveProtocol` error by the transport instead of hanging the group.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::error::{AinebResult, Signal};

pub mod local;
pub mod threads;

pub use local::LocalChannel;
pub use threads::{ThreadChannel, ThreadGroup};

pub const COORDINATOR: usize = 0;

/// Anything that can cross a rank boundary by value.
pub trait Payload: Serialize + DeserializeOwned {}
impl<T: Serialize + DeserializeOwned> Payload for T {}

pub trait CollectiveChannel {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Every rank ends with the coordinator's `value`. Only the coordinator's
    /// argument is read; it must be `Some`.
    fn broadcast<T: Payload>(&self, value: Option<T>) -> AinebResult<T>;

    /// The coordinator receives all values ordered by rank; other ranks get `None`.
    fn gather<T: Payload>(&self, value: T) -> AinebResult<Option<Vec<T>>>;

    fn barrier(&self) -> AinebResult<()> {
        self.gather(())?;
        self.broadcast(Some(()))
    }

    /// Gather followed by a broadcast of the gathered vector.
    fn all_gather<T: Payload>(&self, value: T) -> AinebResult<Vec<T>> {
        let gathered = self.gather(value)?;
        self.broadcast(gathered)
    }

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }
}

/// Every rank contributes the outcome of its local work; all ranks return the
/// lowest-rank failure, or `Ok` when everyone succeeded.
pub fn consensus<C: CollectiveChannel>(
    channel: &C,
    local: AinebResult<()>,
    iteration: usize,
) -> AinebResult<()> {
    let gathered = channel.gather(Signal::from_result(local, iteration))?;
    let verdict = gathered.map(|all| {
        all.into_iter()
            .find(|s| matches!(s, Signal::Abort(_)))
            .unwrap_or(Signal::Proceed(()))
    });
    channel.broadcast(verdict)?.into_result()
}
