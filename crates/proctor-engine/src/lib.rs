//! Session runtime: one actor per exam session serializes every mutation of
//! that session, while different sessions proceed in parallel.

mod actor;
mod autosave;
mod command;
mod disqualify;
mod emitter;
mod engine;
pub mod error;
mod hub;
mod ledger;
mod timer;

pub use emitter::Emitter;
pub use engine::{EngineConfig, ProctorEngine, ViolationReceipt};
pub use error::EngineError;

#[cfg(test)]
pub(crate) mod testutil;
