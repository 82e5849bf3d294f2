use rand::Rng;
use rand::seq::IndexedRandom;
use shared::{Distribution, RiceVariety};
use strum::EnumCount;

use super::config::{SyntheticConfig, SyntheticProfile};
use super::synthesis::{ConfidenceSynthesizer, SynthesisError};

/// Last-resort tier: a plausible distribution with no image signal at all.
#[derive(Debug, Clone)]
pub struct SyntheticPredictor {
    config: SyntheticConfig,
    synthesizer: ConfidenceSynthesizer,
}

impl SyntheticPredictor {
    pub fn new(config: SyntheticConfig, synthesizer: ConfidenceSynthesizer) -> Self {
        Self {
            config,
            synthesizer,
        }
    }

    /// Picks the primary variety (the hint when given) and builds its
    /// distribution. Returns the primary alongside so callers can privilege it.
    pub fn predict<R: Rng + ?Sized>(
        &self,
        hint: Option<RiceVariety>,
        rng: &mut R,
    ) -> Result<(RiceVariety, Distribution), SynthesisError> {
        let primary = match hint {
            Some(variety) => variety,
            None => *RiceVariety::ALL
                .choose(rng)
                .unwrap_or(&RiceVariety::Arborio),
        };

        let Some(profile) = self.profile(primary) else {
            // Unreachable with a validated config; a flat vector still normalizes.
            return Ok((primary, self.synthesizer.normalize(&[1.0; RiceVariety::COUNT])?));
        };

        let confidence = rng.random_range(profile.confidence.min..=profile.confidence.max);
        let remaining = 1.0 - confidence;

        let others: Vec<RiceVariety> = RiceVariety::ALL
            .iter()
            .copied()
            .filter(|v| *v != primary && !profile.similar.contains(v))
            .collect();
        let similar_mass = match (profile.similar.is_empty(), others.is_empty()) {
            (true, _) => 0.0,
            (false, true) => remaining,
            (false, false) => remaining * self.config.similar_share,
        };

        let mut raw = [0.0; RiceVariety::COUNT];
        raw[primary.index()] = confidence;
        for variety in &profile.similar {
            raw[variety.index()] = similar_mass / profile.similar.len() as f64;
        }
        for variety in &others {
            raw[variety.index()] = (remaining - similar_mass) / others.len() as f64;
        }

        for variety in RiceVariety::ALL.iter().filter(|v| **v != primary) {
            let entry = &mut raw[variety.index()];
            let jitter = if self.config.jitter > 0.0 {
                rng.random_range(-self.config.jitter..=self.config.jitter)
            } else {
                0.0
            };
            *entry = (*entry + jitter).max(self.config.floor);
        }

        log::debug!("Synthetic primary {} at {:.3}", primary, confidence);
        Ok((primary, self.synthesizer.normalize(&raw)?))
    }

    fn profile(&self, variety: RiceVariety) -> Option<&SyntheticProfile> {
        self.config.profiles.iter().find(|p| p.variety == variety)
    }
}
