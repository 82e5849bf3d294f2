//! The model tier: a pretrained classifier behind a lazily loaded adapter.
//!
//! The adapter is built once and shared by `Arc`. The first caller of
//! [`ModelAdapter::ensure_loaded`] loads and warms up the classifier; every
//! other caller, including concurrent ones, sees the same outcome. A failed
//! load is recorded and never retried.

pub mod preprocess;
#[cfg(feature = "torch")]
pub mod torch;

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use image::RgbImage;
use ndarray::Array4;
use shared::{ModelStatus, PredictionResult, RiceVariety, Tier};
use strum::EnumCount;

use crate::pipeline::config::{CalibrationConfig, ModelConfig};
use crate::pipeline::synthesis::{ConfidenceSynthesizer, RawScores, SynthesisError};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model resource not found: {}", .0.display())]
    MissingResource(PathBuf),
    #[error("Model resource {} could not be loaded: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("No inference backend compiled in (enable the `torch` feature)")]
    BackendUnavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model unavailable: {0}")]
    Unavailable(AdapterState),
    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),
    #[error("Inference failed: {0}")]
    Backend(String),
    #[error("Model returned {actual} scores, expected {expected}")]
    OutputShape { expected: usize, actual: usize },
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

/// A loaded network mapping a 1×3×H×W batch to one score per variety.
pub trait Classifier: Send + Sync {
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

/// Builds a [`Classifier`] (and whatever sub-networks it needs) from config.
pub trait ClassifierLoader: Send + Sync {
    fn load(&self, config: &ModelConfig) -> Result<Box<dyn Classifier>, ModelError>;
}

/// Loader used when no inference backend is compiled in.
#[cfg_attr(feature = "torch", allow(dead_code))]
struct UnavailableLoader;

impl ClassifierLoader for UnavailableLoader {
    fn load(&self, _config: &ModelConfig) -> Result<Box<dyn Classifier>, ModelError> {
        Err(ModelError::BackendUnavailable)
    }
}

pub fn default_loader() -> Box<dyn ClassifierLoader> {
    #[cfg(feature = "torch")]
    {
        Box::new(torch::TorchLoader::default())
    }
    #[cfg(not(feature = "torch"))]
    {
        Box::new(UnavailableLoader)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DegradedReason {
    LoadFailed(String),
    WarmupFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterState {
    Unloaded,
    Ready,
    Degraded(DegradedReason),
}

impl AdapterState {
    pub fn label(&self) -> &'static str {
        match self {
            AdapterState::Unloaded => "unloaded",
            AdapterState::Ready => "ready",
            AdapterState::Degraded(DegradedReason::LoadFailed(_)) => "load_failed",
            AdapterState::Degraded(DegradedReason::WarmupFailed(_)) => "warmup_failed",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            AdapterState::Degraded(DegradedReason::LoadFailed(detail))
            | AdapterState::Degraded(DegradedReason::WarmupFailed(detail)) => Some(detail.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{} ({})", self.label(), detail),
            None => f.write_str(self.label()),
        }
    }
}

struct LoadedModel {
    classifier: Option<Box<dyn Classifier>>,
    state: AdapterState,
}

pub struct ModelAdapter {
    config: ModelConfig,
    loader: Box<dyn ClassifierLoader>,
    synthesizer: ConfidenceSynthesizer,
    slot: OnceLock<LoadedModel>,
}

impl ModelAdapter {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_loader(config, default_loader())
    }

    pub fn with_loader(config: ModelConfig, loader: Box<dyn ClassifierLoader>) -> Self {
        Self {
            config,
            loader,
            // The model tier only normalizes, so the target range is unused.
            synthesizer: ConfidenceSynthesizer::new(&CalibrationConfig::default()),
            slot: OnceLock::new(),
        }
    }

    /// Loads and warms up the classifier on first call; returns the state.
    pub fn ensure_loaded(&self) -> &AdapterState {
        &self.loaded().state
    }

    fn loaded(&self) -> &LoadedModel {
        self.slot.get_or_init(|| self.load())
    }

    pub fn state(&self) -> AdapterState {
        self.slot
            .get()
            .map(|loaded| loaded.state.clone())
            .unwrap_or(AdapterState::Unloaded)
    }

    pub fn status(&self) -> ModelStatus {
        let state = self.state();
        ModelStatus {
            state: state.label().to_string(),
            detail: state.detail(),
            model_path: self.config.path.display().to_string(),
        }
    }

    pub fn predict(&self, image: &RgbImage) -> Result<PredictionResult, InferenceError> {
        let loaded = self.loaded();
        let Some(classifier) = &loaded.classifier else {
            return Err(InferenceError::Unavailable(loaded.state.clone()));
        };

        let input = preprocess::to_input_tensor(
            image,
            self.config.input_size,
            self.config.resize_method.into(),
        )?;
        let output = classifier.infer(&input)?;
        let raw = to_raw_scores(&output)?;
        let distribution = self.synthesizer.normalize(&raw)?;
        Ok(PredictionResult::from_distribution(distribution, Tier::Model))
    }

    fn load(&self) -> LoadedModel {
        let classifier = match self.loader.load(&self.config) {
            Ok(classifier) => classifier,
            Err(e) => {
                log::warn!("Model failed to load, running degraded: {}", e);
                return LoadedModel {
                    classifier: None,
                    state: AdapterState::Degraded(DegradedReason::LoadFailed(e.to_string())),
                };
            }
        };
        log::info!("Model loaded from {}", self.config.path.display());

        let state = match self.warm_up(classifier.as_ref()) {
            Ok(()) => {
                log::info!("Model warm-up succeeded, adapter ready");
                AdapterState::Ready
            }
            Err(e) => {
                log::warn!("Model warm-up failed, keeping classifier: {}", e);
                AdapterState::Degraded(DegradedReason::WarmupFailed(e.to_string()))
            }
        };
        LoadedModel {
            classifier: Some(classifier),
            state,
        }
    }

    fn warm_up(&self, classifier: &dyn Classifier) -> Result<(), InferenceError> {
        let side = self.config.input_size as usize;
        let output = classifier.infer(&Array4::zeros((1, 3, side, side)))?;
        to_raw_scores(&output).map(|_| ())
    }
}

fn to_raw_scores(output: &[f32]) -> Result<RawScores, InferenceError> {
    if output.len() != RiceVariety::COUNT {
        return Err(InferenceError::OutputShape {
            expected: RiceVariety::COUNT,
            actual: output.len(),
        });
    }
    let mut raw = [0.0; RiceVariety::COUNT];
    for (score, value) in raw.iter_mut().zip(output) {
        *score = *value as f64;
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier(Vec<f32>);

    impl Classifier for FixedClassifier {
        fn infer(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    /// Fails the all-zero warm-up batch but answers real images.
    struct ZeroShyClassifier;

    impl Classifier for ZeroShyClassifier {
        fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            if input.iter().all(|v| *v == 0.0) {
                Err(InferenceError::Backend("warm-up rejected".into()))
            } else {
                Ok(vec![0.1, 0.1, 0.6, 0.1, 0.1])
            }
        }
    }

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
        output: Vec<f32>,
    }

    impl ClassifierLoader for CountingLoader {
        fn load(&self, _config: &ModelConfig) -> Result<Box<dyn Classifier>, ModelError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FixedClassifier(self.output.clone())))
        }
    }

    struct ZeroShyLoader;

    impl ClassifierLoader for ZeroShyLoader {
        fn load(&self, _config: &ModelConfig) -> Result<Box<dyn Classifier>, ModelError> {
            Ok(Box::new(ZeroShyClassifier))
        }
    }

    fn small_config() -> ModelConfig {
        ModelConfig {
            input_size: 8,
            ..ModelConfig::default()
        }
    }

    fn grain_image() -> RgbImage {
        RgbImage::from_pixel(16, 16, image::Rgb([200, 190, 170]))
    }

    #[test]
    fn test_concurrent_callers_load_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(ModelAdapter::with_loader(
            small_config(),
            Box::new(CountingLoader {
                loads: loads.clone(),
                output: vec![0.2; 5],
            }),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let adapter = adapter.clone();
                std::thread::spawn(move || adapter.ensure_loaded().clone())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), AdapterState::Ready);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_normalizes_model_output() {
        let adapter = ModelAdapter::with_loader(
            small_config(),
            Box::new(CountingLoader {
                loads: Arc::new(AtomicUsize::new(0)),
                output: vec![1.0, 6.0, 1.0, 1.0, 1.0],
            }),
        );
        let result = adapter.predict(&grain_image()).unwrap();
        assert_eq!(result.tier, Tier::Model);
        assert_eq!(result.predicted_class, RiceVariety::Basmati);
        assert!((result.confidence - 0.6).abs() < 1e-6);
        assert!(result.characteristics.is_none());
    }

    #[test]
    fn test_wrong_output_length_is_typed_failure() {
        let adapter = ModelAdapter::with_loader(
            small_config(),
            Box::new(CountingLoader {
                loads: Arc::new(AtomicUsize::new(0)),
                output: vec![0.5, 0.5],
            }),
        );
        assert!(matches!(
            adapter.ensure_loaded(),
            AdapterState::Degraded(DegradedReason::WarmupFailed(_))
        ));
        assert!(matches!(
            adapter.predict(&grain_image()),
            Err(InferenceError::OutputShape {
                expected: 5,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_warmup_failure_keeps_classifier() {
        let adapter = ModelAdapter::with_loader(small_config(), Box::new(ZeroShyLoader));
        assert_eq!(adapter.state(), AdapterState::Unloaded);
        assert_eq!(adapter.ensure_loaded().label(), "warmup_failed");

        let result = adapter.predict(&grain_image()).unwrap();
        assert_eq!(result.predicted_class, RiceVariety::Ipsala);
    }

    #[test]
    fn test_load_failure_degrades_and_reports() {
        let adapter = ModelAdapter::with_loader(small_config(), Box::new(UnavailableLoader));
        assert!(matches!(
            adapter.predict(&grain_image()),
            Err(InferenceError::Unavailable(AdapterState::Degraded(
                DegradedReason::LoadFailed(_)
            )))
        ));

        let status = adapter.status();
        assert_eq!(status.state, "load_failed");
        assert!(status.detail.unwrap().contains("torch"));
        assert_eq!(status.model_path, "models/rice_classifier.pt");
    }
}
