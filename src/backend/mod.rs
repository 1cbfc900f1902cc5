//! Backend module - solving strategies, preference expansion and labeling.

mod labeler;
mod preferences;
mod strategy;

pub use labeler::*;
pub use preferences::*;
pub use strategy::*;
