//! Turns raw per-variety scores into a [`Distribution`].
//!
//! Every tier goes through here, so the sum-to-one and non-negativity
//! guarantees live in one place. Two modes are offered:
//!
//! * [`CalibrationMode::None`] divides by the sum and keeps the ordering of
//!   the input.
//! * [`CalibrationMode::ForcedRange`] pins the winner to a confidence drawn
//!   from the configured range and spreads the rest evenly over the other
//!   varieties. The relative order of the losers is discarded.

use rand::Rng;
use shared::{CalibrationMode, Distribution, DistributionError, RiceVariety};
use strum::EnumCount;

use super::config::{CalibrationConfig, ValueRange};

/// Unnormalized scores laid out in variety order.
pub type RawScores = [f64; RiceVariety::COUNT];

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("Raw scores sum to {sum}, cannot normalize")]
    Degenerate { sum: f64 },
    #[error("Raw score for {variety} is invalid: {value}")]
    InvalidScore { variety: RiceVariety, value: f64 },
    #[error("Synthesized distribution is malformed: {0}")]
    Distribution(#[from] DistributionError),
}

#[derive(Debug, Clone)]
pub struct ConfidenceSynthesizer {
    target_range: ValueRange,
}

impl ConfidenceSynthesizer {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            target_range: config.target_range,
        }
    }

    /// Applies `mode` to `raw`. `privileged` only matters for
    /// [`CalibrationMode::ForcedRange`], where it replaces the arg-max as winner.
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        raw: &RawScores,
        mode: CalibrationMode,
        privileged: Option<RiceVariety>,
        rng: &mut R,
    ) -> Result<Distribution, SynthesisError> {
        match mode {
            CalibrationMode::None => self.normalize(raw),
            CalibrationMode::ForcedRange => {
                check_scores(raw)?;
                let winner = privileged.unwrap_or_else(|| argmax(raw));
                self.calibrate_label(winner, rng)
            }
        }
    }

    pub fn normalize(&self, raw: &RawScores) -> Result<Distribution, SynthesisError> {
        let sum = check_scores(raw)?;
        let mut probabilities = [0.0; RiceVariety::COUNT];
        for (p, score) in probabilities.iter_mut().zip(raw.iter()) {
            *p = score / sum;
        }
        Ok(Distribution::from_probabilities(probabilities)?)
    }

    /// Forced-range distribution for a label chosen without any raw scores.
    pub fn calibrate_label<R: Rng + ?Sized>(
        &self,
        winner: RiceVariety,
        rng: &mut R,
    ) -> Result<Distribution, SynthesisError> {
        let target = rng.random_range(self.target_range.min..=self.target_range.max);
        let rest = (1.0 - target) / (RiceVariety::COUNT - 1) as f64;
        let mut probabilities = [rest; RiceVariety::COUNT];
        probabilities[winner.index()] = target;
        Ok(Distribution::from_probabilities(probabilities)?)
    }
}

/// Index of the largest score; ties go to the earlier variety.
pub fn argmax(raw: &RawScores) -> RiceVariety {
    let mut best = 0;
    for (i, score) in raw.iter().enumerate() {
        if *score > raw[best] {
            best = i;
        }
    }
    RiceVariety::ALL[best]
}

fn check_scores(raw: &RawScores) -> Result<f64, SynthesisError> {
    for (variety, &value) in RiceVariety::ALL.iter().zip(raw.iter()) {
        if !value.is_finite() || value < 0.0 {
            return Err(SynthesisError::InvalidScore {
                variety: *variety,
                value,
            });
        }
    }
    let sum: f64 = raw.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return Err(SynthesisError::Degenerate { sum });
    }
    Ok(sum)
}
