// Scheduler module: drives triggers on their poll schedules

pub mod engine;

pub use engine::{Scheduler, TriggerEngine};
