use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root error type for an AI-NEB run.
#[derive(Error, Debug)]
pub enum AinebError {
    /// Worker count does not equal the number of interior images.
    #[error("configuration mismatch: {workers} workers for {images} interior images")]
    ConfigurationMismatch { workers: usize, images: usize },

    /// Surrogate training (or persisting the trained model) failed.
    #[error("surrogate training failed at iteration {iteration}: {message}")]
    Training { iteration: usize, message: String },

    /// A rank failed to take part in a collective operation.
    #[error("collective protocol violation on rank {rank}: {message}")]
    CollectiveProtocol { rank: usize, message: String },

    /// The reference evaluator failed for one image of the band.
    #[error("reference evaluator failed at iteration {iteration} on image {image}: {message}")]
    Evaluator {
        iteration: usize,
        image: usize,
        message: String,
    },

    /// A rank could not load or query the published surrogate.
    #[error("surrogate model failed at iteration {iteration}: {message}")]
    Surrogate { iteration: usize, message: String },

    #[error("incompatible images: {0}")]
    Incompatible(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AinebResult<T> = Result<T, AinebError>;

/// Which `AinebError` variant a `FailureSignal` stands for, with the
/// structured fields that variant needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    ConfigurationMismatch { workers: usize, images: usize },
    Training,
    Protocol { rank: usize },
    Evaluator { image: usize },
    Surrogate,
    Incompatible,
    Config,
    Io,
    Serialization,
}

/// Wire form of a fatal failure, broadcast ahead of the next collective so
/// that every rank stops with the same error instead of deadlocking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSignal {
    pub kind: FailureKind,
    pub iteration: usize,
    pub message: String,
}

impl FailureSignal {
    /// `iteration` is used only for variants that do not carry their own.
    pub fn from_error(err: &AinebError, iteration: usize) -> Self {
        let (kind, iteration, message) = match err {
            AinebError::ConfigurationMismatch { workers, images } => (
                FailureKind::ConfigurationMismatch {
                    workers: *workers,
                    images: *images,
                },
                iteration,
                String::new(),
            ),
            AinebError::Training { iteration, message } => (FailureKind::Training, *iteration, message.clone()),
            AinebError::CollectiveProtocol { rank, message } => {
                (FailureKind::Protocol { rank: *rank }, iteration, message.clone())
            }
            AinebError::Evaluator {
                iteration,
                image,
                message,
            } => (FailureKind::Evaluator { image: *image }, *iteration, message.clone()),
            AinebError::Surrogate { iteration, message } => (FailureKind::Surrogate, *iteration, message.clone()),
            AinebError::Incompatible(message) => (FailureKind::Incompatible, iteration, message.clone()),
            AinebError::Config(message) => (FailureKind::Config, iteration, message.clone()),
            AinebError::Io(e) => (FailureKind::Io, iteration, e.to_string()),
            AinebError::Serialization(e) => (FailureKind::Serialization, iteration, e.to_string()),
        };
        Self { kind, iteration, message }
    }

    pub fn into_error(self) -> AinebError {
        let Self { kind, iteration, message } = self;
        match kind {
            FailureKind::ConfigurationMismatch { workers, images } => {
                AinebError::ConfigurationMismatch { workers, images }
            }
            FailureKind::Training => AinebError::Training { iteration, message },
            FailureKind::Protocol { rank } => AinebError::CollectiveProtocol { rank, message },
            FailureKind::Evaluator { image } => AinebError::Evaluator {
                iteration,
                image,
                message,
            },
            FailureKind::Surrogate => AinebError::Surrogate { iteration, message },
            FailureKind::Incompatible => AinebError::Incompatible(message),
            FailureKind::Config => AinebError::Config(message),
            FailureKind::Io => AinebError::Io(std::io::Error::new(std::io::ErrorKind::Other, message)),
            FailureKind::Serialization => AinebError::Serialization(serde::de::Error::custom(message)),
        }
    }
}

/// Outcome of coordinator-only (or per-rank) work, as seen by the whole group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal<T> {
    Proceed(T),
    Abort(FailureSignal),
}

impl<T> Signal<T> {
    pub fn from_result(result: AinebResult<T>, iteration: usize) -> Self {
        match result {
            Ok(v) => Signal::Proceed(v),
            Err(e) => Signal::Abort(FailureSignal::from_error(&e, iteration)),
        }
    }

    pub fn into_result(self) -> AinebResult<T> {
        match self {
            Signal::Proceed(v) => Ok(v),
            Signal::Abort(f) => Err(f.into_error()),
        }
    }
}
