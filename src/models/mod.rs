//! Core data models for predsel.
//!
//! - `outcome`: result of one decision attempt and its timing
//! - `sample`: samples, datasets and generation statistics
//! - `config`: TOML configuration
//! - `error`: error taxonomy, scoped by how far each error may propagate

mod config;
mod error;
mod outcome;
mod sample;

pub use config::*;
pub use error::*;
pub use outcome::*;
pub use sample::*;
