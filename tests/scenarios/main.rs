//! Release scenarios, run end to end against in-memory services

mod concurrency;
mod failure_handling;
mod helpers;
mod history;
mod image_assembly;
mod propagation;
mod publishing;
mod version_resolution;
