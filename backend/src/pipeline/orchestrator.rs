use std::sync::Arc;

use image::RgbImage;
use rand::Rng;
use shared::{CalibrationMode, PredictionResult, RiceVariety, Tier};

use super::config::PipelineConfig;
use super::features::{FeatureError, FeatureExtractor, ImageFeatureExtractor};
use super::scoring::RiceProfileScorer;
use super::synthesis::{ConfidenceSynthesizer, SynthesisError};
use super::synthetic::SyntheticPredictor;
use crate::model::{InferenceError, ModelAdapter};

/// Why a single tier gave up.
#[derive(Debug, thiserror::Error)]
pub enum TierFailure {
    #[error("model tier: {0}")]
    Model(#[from] InferenceError),
    #[error("feature extraction: {0}")]
    Features(#[from] FeatureError),
    #[error("synthesis: {0}")]
    Synthesis(#[from] SynthesisError),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("All prediction tiers failed: {}", describe(.failures))]
    Exhausted { failures: Vec<(Tier, TierFailure)> },
}

fn describe(failures: &[(Tier, TierFailure)]) -> String {
    failures
        .iter()
        .map(|(tier, failure)| format!("{}: {}", tier, failure))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One image plus the optional hints that accompany it.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRequest<'a> {
    pub image: &'a RgbImage,
    pub expected_label: Option<RiceVariety>,
    pub image_path: Option<&'a str>,
    /// Overrides the configured mode for the heuristic and synthetic tiers.
    pub calibration: Option<CalibrationMode>,
    /// Lets the hint win the heuristic tier's forced-range calibration.
    pub privilege_hint: bool,
}

impl<'a> ClassifyRequest<'a> {
    pub fn new(image: &'a RgbImage) -> Self {
        Self {
            image,
            expected_label: None,
            image_path: None,
            calibration: None,
            privilege_hint: false,
        }
    }

    pub fn expected_label(mut self, label: RiceVariety) -> Self {
        self.expected_label = Some(label);
        self
    }

    pub fn image_path(mut self, path: &'a str) -> Self {
        self.image_path = Some(path);
        self
    }

    pub fn calibration(mut self, mode: CalibrationMode) -> Self {
        self.calibration = Some(mode);
        self
    }

    pub fn privilege_hint(mut self, privileged: bool) -> Self {
        self.privilege_hint = privileged;
        self
    }

    /// The explicit label, else the first variety named in the path.
    pub fn hint(&self) -> Option<RiceVariety> {
        self.expected_label
            .or_else(|| self.image_path.and_then(hint_from_path))
    }
}

/// First variety (in fixed order) whose name appears in `path`, ignoring case.
pub fn hint_from_path(path: &str) -> Option<RiceVariety> {
    let path = path.to_lowercase();
    RiceVariety::ALL
        .iter()
        .copied()
        .find(|variety| path.contains(&variety.to_string().to_lowercase()))
}

/// Runs the model, heuristic and synthetic tiers in order; first success wins.
pub struct PredictionOrchestrator {
    model: Arc<ModelAdapter>,
    extractor: Arc<dyn FeatureExtractor>,
    scorer: RiceProfileScorer,
    synthesizer: ConfidenceSynthesizer,
    synthetic: SyntheticPredictor,
    default_calibration: CalibrationMode,
}

impl PredictionOrchestrator {
    pub fn new(model: Arc<ModelAdapter>, config: &PipelineConfig) -> Self {
        let synthesizer = ConfidenceSynthesizer::new(&config.calibration);
        Self {
            model,
            extractor: Arc::new(ImageFeatureExtractor::new(config.features.clone())),
            scorer: RiceProfileScorer::new(config.scoring.clone()),
            synthetic: SyntheticPredictor::new(config.synthetic.clone(), synthesizer.clone()),
            synthesizer,
            default_calibration: config.calibration.default_mode,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn model(&self) -> &Arc<ModelAdapter> {
        &self.model
    }

    pub fn classify(&self, request: &ClassifyRequest<'_>) -> Result<PredictionResult, PipelineError> {
        self.classify_with_rng(request, &mut rand::rng())
    }

    pub fn classify_with_rng<R: Rng + ?Sized>(
        &self,
        request: &ClassifyRequest<'_>,
        rng: &mut R,
    ) -> Result<PredictionResult, PipelineError> {
        let hint = request.hint();
        let mode = request.calibration.unwrap_or(self.default_calibration);
        let mut failures = Vec::new();

        match self.model.predict(request.image) {
            Ok(result) => return Ok(result),
            Err(e) => {
                log::warn!("Model tier failed, falling back to heuristics: {}", e);
                failures.push((Tier::Model, TierFailure::from(e)));
            }
        }

        let privileged = if request.privilege_hint { hint } else { None };
        match self.heuristic(request.image, mode, privileged, rng) {
            Ok(result) => return Ok(result),
            Err(e) => {
                log::warn!("Heuristic tier failed, falling back to synthetic: {}", e);
                failures.push((Tier::Heuristic, e));
            }
        }

        match self.synthesize(hint, mode, rng) {
            Ok(result) => return Ok(result),
            Err(e) => {
                log::warn!("Synthetic tier failed: {}", e);
                failures.push((Tier::Synthetic, e));
            }
        }

        Err(PipelineError::Exhausted { failures })
    }

    fn heuristic<R: Rng + ?Sized>(
        &self,
        image: &RgbImage,
        mode: CalibrationMode,
        privileged: Option<RiceVariety>,
        rng: &mut R,
    ) -> Result<PredictionResult, TierFailure> {
        let characteristics = self.extractor.extract(image)?;
        let raw = self.scorer.score(&characteristics, rng);
        let distribution = self.synthesizer.synthesize(&raw, mode, privileged, rng)?;
        Ok(PredictionResult::from_distribution(distribution, Tier::Heuristic)
            .with_characteristics(characteristics))
    }

    fn synthesize<R: Rng + ?Sized>(
        &self,
        hint: Option<RiceVariety>,
        mode: CalibrationMode,
        rng: &mut R,
    ) -> Result<PredictionResult, TierFailure> {
        let (primary, distribution) = self.synthetic.predict(hint, rng)?;
        let distribution = match mode {
            CalibrationMode::None => distribution,
            // Only the primary survives; the profile distribution is replaced.
            CalibrationMode::ForcedRange => self.synthesizer.calibrate_label(primary, rng)?,
        };
        Ok(PredictionResult::from_distribution(distribution, Tier::Synthetic))
    }
}
