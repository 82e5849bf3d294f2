//! Offline accuracy evaluation over a directory of labelled images.

pub mod dataset;
pub mod metrics;

use std::path::PathBuf;

use rand::Rng;

use crate::model::{AdapterState, DegradedReason};
use crate::pipeline::{ClassifyRequest, PipelineError, PredictionOrchestrator};
pub use dataset::{LabelledSample, load_dataset};
pub use metrics::{ClassSummary, ConfusionMatrix, EvaluationReport, Misclassification};

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No labelled images found under {}", .0.display())]
    EmptyDataset(PathBuf),
    #[error("Model is unavailable: {0}")]
    ModelUnavailable(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Full fallback chain, without path hints.
    Pipeline,
    /// Model tier only; a model that failed to load is an error.
    ModelOnly,
}

/// Classifies every sample and tallies the results.
///
/// Images are classified without their path: the class directory names the
/// label, so a path hint would leak the answer.
pub fn evaluate<R: Rng + ?Sized>(
    orchestrator: &PredictionOrchestrator,
    samples: &[LabelledSample],
    mode: EvaluationMode,
    rng: &mut R,
) -> Result<EvaluationReport, EvaluationError> {
    if mode == EvaluationMode::ModelOnly {
        if let AdapterState::Degraded(DegradedReason::LoadFailed(reason)) =
            orchestrator.model().ensure_loaded()
        {
            return Err(EvaluationError::ModelUnavailable(reason.clone()));
        }
    }

    let mut report = EvaluationReport::default();
    for sample in samples {
        let image = match image::open(&sample.path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                log::warn!("Skipping {}: {}", sample.path.display(), e);
                report.skipped += 1;
                continue;
            }
        };

        let result = match mode {
            EvaluationMode::Pipeline => {
                orchestrator.classify_with_rng(&ClassifyRequest::new(&image), rng)?
            }
            EvaluationMode::ModelOnly => match orchestrator.model().predict(&image) {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("Model failed on {}: {}", sample.path.display(), e);
                    report.skipped += 1;
                    continue;
                }
            },
        };

        log::debug!(
            "{}: {} predicted as {} ({:.3})",
            sample.path.display(),
            sample.label,
            result.predicted_class,
            result.confidence
        );
        report.record(
            &sample.path,
            sample.label,
            result.predicted_class,
            result.confidence,
        );
    }
    Ok(report)
}
