//! tipline/crates/tl-core/src/lib.rs
//!
//! The central triage logic and port definitions for Tipline.

pub mod models;
pub mod traits;
pub mod error;
pub mod config;

pub mod signals;
pub mod scoring;
pub mod detector;
pub mod classifier;
pub mod queue;
pub mod reputation;
pub mod store;
pub mod review;
pub mod engine;
pub mod monitor;
pub mod memory;

// Re-exporting for easier access in other crates
pub use models::*;
pub use traits::*;
pub use error::*;
pub use config::EngineConfig;
pub use engine::{EnginePorts, RestoreSummary, TriageEngine};
