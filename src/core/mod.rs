pub mod config;
pub mod domain;
pub mod error;
pub mod path;
pub mod spatial;
pub mod trajectory;
