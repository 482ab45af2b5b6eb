use crate::comm::{CollectiveChannel, Payload};
use crate::core::error::{AinebError, AinebResult};

/// Single-rank group. Collectives hand their input straight back.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalChannel;

impl CollectiveChannel for LocalChannel {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast<T: Payload>(&self, value: Option<T>) -> AinebResult<T> {
        value.ok_or_else(|| AinebError::CollectiveProtocol {
            rank: 0,
            message: "coordinator supplied no value to broadcast".to_string(),
        })
    }

    fn gather<T: Payload>(&self, value: T) -> AinebResult<Option<Vec<T>>> {
        Ok(Some(vec![value]))
    }
}
