//! Active-learning nudged elastic band.
//!
//! A cheap surrogate is trained on reference-labeled geometries, a band of
//! images is relaxed on it across cooperating ranks, and the surrogate is
//! validated against the reference on the relaxed band until it is accurate
//! there.

pub mod analysis;
pub mod comm;
pub mod core;
pub mod engine;
pub mod interface;
pub mod solvers;
