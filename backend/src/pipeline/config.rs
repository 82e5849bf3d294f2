use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use shared::{CalibrationMode, RiceVariety};
use std::path::{Path, PathBuf};
use strum::EnumCount;

pub const CONFIG_ENV_VAR: &str = "GRAINPALETTE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub features: FeatureConfig,
    pub scoring: ScoringConfig,
    pub calibration: CalibrationConfig,
    pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Classifier head (or the whole network when no sub-networks are listed).
    pub path: PathBuf,
    /// Networks run before the head, in order (e.g. a feature-vector backbone).
    pub subnetworks: Vec<PathBuf>,
    pub input_size: u32,
    pub resize_method: ResizeMethod,
    pub apply_softmax: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/rice_classifier.pt"),
            subnetworks: Vec::new(),
            input_size: 224,
            resize_method: ResizeMethod::Triangle,
            apply_softmax: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMethod {
    Nearest,
    #[serde(alias = "bilinear")]
    Triangle,
    #[serde(alias = "bicubic")]
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeMethod> for FilterType {
    fn from(method: ResizeMethod) -> Self {
        match method {
            ResizeMethod::Nearest => FilterType::Nearest,
            ResizeMethod::Triangle => FilterType::Triangle,
            ResizeMethod::CatmullRom => FilterType::CatmullRom,
            ResizeMethod::Gaussian => FilterType::Gaussian,
            ResizeMethod::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub canny_low: f32,
    pub canny_high: f32,
    /// Contours at or below this area are treated as noise for the aspect ratio.
    pub min_contour_area: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            min_contour_area: 50.0,
        }
    }
}

/// Closed interval used by the profile tables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    /// Distance to the nearest bound; zero inside the range.
    pub fn distance(&self, value: f64) -> f64 {
        if self.contains(value) {
            0.0
        } else {
            (value - self.min).abs().min((value - self.max).abs())
        }
    }

    fn check(&self, what: &str) -> Result<(), ConfigError> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min > self.max {
            return Err(ConfigError::Invalid(format!(
                "{} range [{}, {}] is empty or not finite",
                what, self.min, self.max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TexturePreference {
    Smooth,
    Medium,
    Textured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiceProfile {
    pub variety: RiceVariety,
    pub aspect_ratio: ValueRange,
    pub brightness: ValueRange,
    pub texture: TexturePreference,
    pub base_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub profiles: Vec<RiceProfile>,
    pub aspect_bonus: f64,
    /// Bonus lost per unit of aspect-ratio distance outside the range.
    pub aspect_decay: f64,
    pub brightness_bonus: f64,
    /// Bonus lost per brightness level outside the range.
    pub brightness_decay: f64,
    pub texture_bonus: f64,
    pub medium_texture_bonus: f64,
    pub smooth_max_variance: f64,
    pub textured_min_variance: f64,
    pub jitter: f64,
    pub floor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let profile = |variety, aspect: (f64, f64), brightness: (f64, f64), texture| RiceProfile {
            variety,
            aspect_ratio: ValueRange::new(aspect.0, aspect.1),
            brightness: ValueRange::new(brightness.0, brightness.1),
            texture,
            base_weight: 0.2,
        };
        Self {
            profiles: vec![
                profile(
                    RiceVariety::Basmati,
                    (0.2, 0.4),
                    (180.0, 255.0),
                    TexturePreference::Smooth,
                ),
                profile(
                    RiceVariety::Jasmine,
                    (0.3, 0.5),
                    (170.0, 245.0),
                    TexturePreference::Smooth,
                ),
                profile(
                    RiceVariety::Arborio,
                    (0.6, 1.2),
                    (180.0, 255.0),
                    TexturePreference::Smooth,
                ),
                profile(
                    RiceVariety::Ipsala,
                    (0.4, 0.8),
                    (160.0, 230.0),
                    TexturePreference::Medium,
                ),
                profile(
                    RiceVariety::Karacadag,
                    (0.5, 0.9),
                    (120.0, 200.0),
                    TexturePreference::Textured,
                ),
            ],
            aspect_bonus: 0.3,
            aspect_decay: 0.5,
            brightness_bonus: 0.25,
            brightness_decay: 0.01,
            texture_bonus: 0.15,
            medium_texture_bonus: 0.1,
            smooth_max_variance: 1000.0,
            textured_min_variance: 1500.0,
            jitter: 0.05,
            floor: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub default_mode: CalibrationMode,
    pub target_range: ValueRange,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            default_mode: CalibrationMode::ForcedRange,
            target_range: ValueRange::new(0.95, 0.99),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticProfile {
    pub variety: RiceVariety,
    pub confidence: ValueRange,
    #[serde(default)]
    pub similar: Vec<RiceVariety>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub profiles: Vec<SyntheticProfile>,
    /// Share of the non-primary mass given to the primary's similar varieties.
    pub similar_share: f64,
    pub jitter: f64,
    pub floor: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        use RiceVariety::*;
        let profile = |variety, min, max, similar: Vec<RiceVariety>| SyntheticProfile {
            variety,
            confidence: ValueRange::new(min, max),
            similar,
        };
        Self {
            profiles: vec![
                profile(Basmati, 0.78, 0.94, vec![Jasmine]),
                profile(Arborio, 0.72, 0.90, vec![Ipsala]),
                profile(Jasmine, 0.70, 0.88, vec![Basmati]),
                profile(Karacadag, 0.75, 0.91, vec![Ipsala]),
                profile(Ipsala, 0.68, 0.85, vec![Arborio, Karacadag]),
            ],
            similar_share: 0.7,
            jitter: 0.01,
            floor: 0.005,
        }
    }
}

impl SyntheticConfig {
    /// Largest raw value a non-primary variety can reach when `profile`'s
    /// primary is drawn at `confidence`.
    pub fn strongest_rival(&self, profile: &SyntheticProfile, confidence: f64) -> f64 {
        let remaining = 1.0 - confidence;
        let others = RiceVariety::COUNT - 1 - profile.similar.len();
        let (similar_mass, other_mass) = match (profile.similar.is_empty(), others == 0) {
            (true, _) => (0.0, remaining),
            (false, true) => (remaining, 0.0),
            (false, false) => (
                remaining * self.similar_share,
                remaining * (1.0 - self.similar_share),
            ),
        };
        let per_similar = if profile.similar.is_empty() {
            0.0
        } else {
            similar_mass / profile.similar.len() as f64
        };
        let per_other = if others == 0 {
            0.0
        } else {
            other_mass / others as f64
        };
        (per_similar.max(per_other) + self.jitter).max(self.floor)
    }
}

impl PipelineConfig {
    /// Loads the config named by `GRAINPALETTE_CONFIG`, falling back to
    /// `config/pipeline.yaml` next to the workspace, then to built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from(path);
        }
        let config_path = match std::env::var("CARGO_MANIFEST_DIR") {
            Ok(manifest_dir) => PathBuf::from(format!("{}/../config/pipeline.yaml", manifest_dir)),
            Err(_) => PathBuf::from("config/pipeline.yaml"),
        };
        if config_path.exists() {
            Self::load_from(config_path)
        } else {
            log::warn!(
                "No pipeline config at {}, using built-in defaults",
                config_path.display()
            );
            Ok(Self::default())
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&config_str)?;
        log::info!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.input_size == 0 {
            return Err(ConfigError::Invalid("model.input_size must be positive".into()));
        }
        if self.features.canny_low > self.features.canny_high {
            return Err(ConfigError::Invalid(
                "features.canny_low must not exceed features.canny_high".into(),
            ));
        }

        check_covers_all(self.scoring.profiles.iter().map(|p| p.variety), "scoring")?;
        for profile in &self.scoring.profiles {
            profile.aspect_ratio.check("scoring aspect_ratio")?;
            profile.brightness.check("scoring brightness")?;
        }
        if self.scoring.floor <= 0.0 {
            return Err(ConfigError::Invalid("scoring.floor must be positive".into()));
        }
        check_non_negative(self.scoring.jitter, "scoring.jitter")?;

        // A forced-range winner at or below 1/COUNT ties or loses to the tail.
        let uniform = 1.0 / RiceVariety::COUNT as f64;
        self.calibration.target_range.check("calibration target")?;
        let target = self.calibration.target_range;
        if target.min <= uniform || target.max >= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "calibration.target_range must lie strictly inside ({}, 1)",
                uniform
            )));
        }

        check_covers_all(self.synthetic.profiles.iter().map(|p| p.variety), "synthetic")?;
        for profile in &self.synthetic.profiles {
            profile.confidence.check("synthetic confidence")?;
            if profile.confidence.min <= uniform || profile.confidence.max >= 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "synthetic confidence for {} must lie strictly inside ({}, 1)",
                    profile.variety, uniform
                )));
            }
            let rival = self.synthetic.strongest_rival(profile, profile.confidence.min);
            if profile.confidence.min <= rival {
                return Err(ConfigError::Invalid(format!(
                    "synthetic confidence for {} can be outranked by another variety ({:.3})",
                    profile.variety, rival
                )));
            }
            if profile.similar.contains(&profile.variety) {
                return Err(ConfigError::Invalid(format!(
                    "{} lists itself as similar",
                    profile.variety
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.synthetic.similar_share) {
            return Err(ConfigError::Invalid(
                "synthetic.similar_share must be within [0, 1]".into(),
            ));
        }
        check_non_negative(self.synthetic.jitter, "synthetic.jitter")?;
        if self.synthetic.floor <= 0.0 {
            return Err(ConfigError::Invalid("synthetic.floor must be positive".into()));
        }
        Ok(())
    }
}

fn check_covers_all(
    varieties: impl Iterator<Item = RiceVariety>,
    table: &str,
) -> Result<(), ConfigError> {
    let mut seen = [false; RiceVariety::COUNT];
    for variety in varieties {
        if std::mem::replace(&mut seen[variety.index()], true) {
            return Err(ConfigError::Invalid(format!(
                "{} profile for {} is listed twice",
                table, variety
            )));
        }
    }
    if let Some(missing) = seen.iter().position(|s| !s) {
        return Err(ConfigError::Invalid(format!(
            "{} profiles are missing {}",
            table, RiceVariety::ALL[missing]
        )));
    }
    Ok(())
}

fn check_non_negative(value: f64, what: &str) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be non-negative", what)))
    }
}
