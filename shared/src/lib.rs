//! Types shared between the classification backend and its clients.

use derive_more::{Deref, Display};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount as EnumCountMacro, EnumIter, EnumString};

/// Sum-to-one tolerance for a [`Distribution`].
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// The five rice varieties, in their fixed output order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    EnumCountMacro,
    strum_macros::Display,
)]
#[strum(ascii_case_insensitive)]
pub enum RiceVariety {
    Arborio,
    Basmati,
    Ipsala,
    Jasmine,
    Karacadag,
}

impl RiceVariety {
    pub const ALL: [RiceVariety; RiceVariety::COUNT] = [
        RiceVariety::Arborio,
        RiceVariety::Basmati,
        RiceVariety::Ipsala,
        RiceVariety::Jasmine,
        RiceVariety::Karacadag,
    ];

    /// Position of this variety in the model's output vector.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn description(self) -> &'static str {
        match self {
            RiceVariety::Arborio => {
                "Short-grain rice from Italy, perfect for risotto. High in starch content, creating creamy texture."
            }
            RiceVariety::Basmati => {
                "Aromatic long-grain rice from India/Pakistan. Known for its distinctive fragrance and fluffy texture."
            }
            RiceVariety::Ipsala => {
                "Turkish rice variety with medium grains. Popular in Mediterranean cuisine for its texture."
            }
            RiceVariety::Jasmine => {
                "Fragrant long-grain rice from Thailand. Slightly sticky when cooked with a subtle floral aroma."
            }
            RiceVariety::Karacadag => {
                "Ancient Turkish rice variety grown in volcanic soil. Known for its nutritional value and unique taste."
            }
        }
    }
}

/// Which stage of the fallback chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    Model,
    Heuristic,
    Synthetic,
}

/// How the heuristic and synthetic tiers shape their output.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CalibrationMode {
    /// Plain sum-to-one normalization of the raw scores.
    None,
    /// Winner pinned to a high confidence range, remainder spread evenly.
    #[default]
    ForcedRange,
}

#[derive(Debug, Clone, PartialEq, Display)]
pub enum DistributionError {
    #[display(fmt = "probability for {} is not a finite non-negative number: {}", _0, _1)]
    InvalidProbability(RiceVariety, f64),
    #[display(fmt = "probabilities sum to {} instead of 1", _0)]
    BadSum(f64),
    #[display(fmt = "expected {} varieties, got {}", expected, actual)]
    WrongVarieties { expected: usize, actual: usize },
}

impl std::error::Error for DistributionError {}

/// A probability for every variety, non-negative and summing to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Deref)]
#[serde(try_from = "BTreeMap<RiceVariety, f64>")]
pub struct Distribution(BTreeMap<RiceVariety, f64>);

impl Distribution {
    /// Builds a distribution from probabilities laid out in variety order.
    pub fn from_probabilities(
        probabilities: [f64; RiceVariety::COUNT],
    ) -> Result<Self, DistributionError> {
        let mut sum = 0.0;
        for (variety, &p) in RiceVariety::iter().zip(probabilities.iter()) {
            if !p.is_finite() || p < 0.0 {
                return Err(DistributionError::InvalidProbability(variety, p));
            }
            sum += p;
        }
        if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(DistributionError::BadSum(sum));
        }
        Ok(Self(RiceVariety::iter().zip(probabilities).collect()))
    }

    pub fn probability(&self, variety: RiceVariety) -> f64 {
        self.0.get(&variety).copied().unwrap_or(0.0)
    }

    /// Probabilities in variety order.
    pub fn to_array(&self) -> [f64; RiceVariety::COUNT] {
        let mut out = [0.0; RiceVariety::COUNT];
        for (variety, p) in &self.0 {
            out[variety.index()] = *p;
        }
        out
    }

    /// Most probable variety; ties go to the earlier variety.
    pub fn argmax(&self) -> (RiceVariety, f64) {
        let mut best = (RiceVariety::Arborio, f64::NEG_INFINITY);
        for (variety, &p) in &self.0 {
            if p > best.1 {
                best = (*variety, p);
            }
        }
        best
    }
}

impl TryFrom<BTreeMap<RiceVariety, f64>> for Distribution {
    type Error = DistributionError;

    fn try_from(map: BTreeMap<RiceVariety, f64>) -> Result<Self, Self::Error> {
        if map.len() != RiceVariety::COUNT {
            return Err(DistributionError::WrongVarieties {
                expected: RiceVariety::COUNT,
                actual: map.len(),
            });
        }
        let mut probabilities = [0.0; RiceVariety::COUNT];
        for (variety, p) in map {
            probabilities[variety.index()] = p;
        }
        Self::from_probabilities(probabilities)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStats {
    /// Mean HSV value channel, 0..255.
    pub avg_brightness: f64,
    /// Mean HSV saturation, 0..255.
    pub avg_saturation: f64,
    /// Mean hue on the 8-bit 0..180 scale.
    pub avg_hue: f64,
    pub avg_rgb: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureStats {
    pub variance: f64,
    pub edge_density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStats {
    pub grain_count: usize,
    pub avg_aspect_ratio: f64,
    pub avg_grain_area: f64,
}

/// Visual descriptors of a single image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCharacteristics {
    pub color: ColorStats,
    pub texture: TextureStats,
    pub shape: ShapeStats,
}

/// Canonical output of every prediction tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: RiceVariety,
    pub confidence: f64,
    pub all_predictions: Distribution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characteristics: Option<ImageCharacteristics>,
    pub tier: Tier,
}

impl PredictionResult {
    pub fn from_distribution(distribution: Distribution, tier: Tier) -> Self {
        let (predicted_class, confidence) = distribution.argmax();
        Self {
            predicted_class,
            confidence,
            all_predictions: distribution,
            characteristics: None,
            tier,
        }
    }

    pub fn with_characteristics(mut self, characteristics: ImageCharacteristics) -> Self {
        self.characteristics = Some(characteristics);
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClassifyRequestBody {
    /// Base64-encoded image bytes.
    pub image_data: String,
    #[serde(default)]
    pub expected_label: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub calibration: Option<CalibrationMode>,
    #[serde(default)]
    pub privilege_hint: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClassifyResponse {
    pub request_id: String,
    pub image_hash: String,
    pub classified_at: String,
    pub result: PredictionResult,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VarietyInfo {
    pub name: RiceVariety,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelStatus {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub model_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_variety_order_matches_index() {
        for (i, variety) in RiceVariety::iter().enumerate() {
            assert_eq!(variety.index(), i);
            assert_eq!(RiceVariety::from_index(i), Some(variety));
        }
        assert_eq!(RiceVariety::from_index(5), None);
    }

    #[test]
    fn test_variety_parses_case_insensitively() {
        assert_eq!(RiceVariety::from_str("basmati").unwrap(), RiceVariety::Basmati);
        assert_eq!(RiceVariety::from_str("KARACADAG").unwrap(), RiceVariety::Karacadag);
        assert!(RiceVariety::from_str("wild").is_err());
        assert_eq!(RiceVariety::Jasmine.to_string(), "Jasmine");
    }

    #[test]
    fn test_distribution_rejects_bad_input() {
        assert!(matches!(
            Distribution::from_probabilities([0.5, 0.5, 0.5, 0.0, 0.0]),
            Err(DistributionError::BadSum(_))
        ));
        assert!(matches!(
            Distribution::from_probabilities([1.2, -0.2, 0.0, 0.0, 0.0]),
            Err(DistributionError::InvalidProbability(RiceVariety::Basmati, _))
        ));
        assert!(Distribution::from_probabilities([0.2; 5]).is_ok());
    }

    #[test]
    fn test_argmax_prefers_earlier_variety_on_tie() {
        let dist = Distribution::from_probabilities([0.1, 0.4, 0.4, 0.05, 0.05]).unwrap();
        assert_eq!(dist.argmax(), (RiceVariety::Basmati, 0.4));
    }

    #[test]
    fn test_prediction_result_serializes_as_variety_map() {
        let dist = Distribution::from_probabilities([0.6, 0.1, 0.1, 0.1, 0.1]).unwrap();
        let result = PredictionResult::from_distribution(dist, Tier::Synthetic);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["predicted_class"], "Arborio");
        assert_eq!(json["tier"], "synthetic");
        assert_eq!(json["all_predictions"].as_object().unwrap().len(), 5);
        assert!(json.get("characteristics").is_none());

        let back: PredictionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_distribution_deserialize_enforces_invariants() {
        let json = r#"{"Arborio": 0.9, "Basmati": 0.9}"#;
        assert!(serde_json::from_str::<Distribution>(json).is_err());
    }
}
