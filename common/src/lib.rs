// Common library for the batch script poll trigger and its scheduler

pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod executor;
pub mod models;
pub mod schedule;
pub mod scheduler;
pub mod script;
pub mod telemetry;
pub mod trigger;
