//! Fleetdeck - operations deck for a fleet of AI coding agents

pub mod autosave;
pub mod client;
pub mod commands;
pub mod config;
pub mod deps;
pub mod error;
pub mod events;
pub mod model;
pub mod pacing;
pub mod sparkline;
pub mod store;
pub mod streak;
pub mod swarm;
pub mod telemetry;
pub mod usage;
pub mod view;

#[cfg(test)]
mod testing;
