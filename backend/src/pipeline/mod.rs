//! The classification pipeline: three tiers behind one orchestrator.

pub mod config;
pub mod features;
pub mod orchestrator;
pub mod scoring;
pub mod synthesis;
pub mod synthetic;

pub use config::PipelineConfig;
pub use orchestrator::{
    ClassifyRequest, PipelineError, PredictionOrchestrator, TierFailure, hint_from_path,
};
