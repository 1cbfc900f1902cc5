//! Engine module - collaborator interfaces and the command bridge adapter.
//! The in-memory scripted engine is built for tests and the `testing` feature.

mod collaborator;
mod command;
#[cfg(any(test, feature = "testing"))]
mod scripted;

pub use collaborator::*;
pub use command::*;
#[cfg(any(test, feature = "testing"))]
pub use scripted::*;
