//! Trace-driven simulator for private direct-mapped caches kept coherent with
//! the MSI protocol over a snooping bus, under sequential consistency or total
//! store order.

pub mod error;
pub mod msi;
pub mod report;
pub mod simulation;
pub mod stats;
pub mod trace;

#[cfg(test)]
mod fakes;

pub use error::{Result, SimError};
pub use simulation::Simulation;
