use rand::Rng;
use shared::{ImageCharacteristics, RiceVariety};
use strum::EnumCount;

use super::config::{ScoringConfig, TexturePreference, ValueRange};
use super::synthesis::RawScores;

/// Scores each variety against its reference profile.
///
/// The output is unnormalized and never contains a zero: every score is
/// clamped to `floor` after jitter is applied.
#[derive(Debug, Clone)]
pub struct RiceProfileScorer {
    config: ScoringConfig,
}

impl Default for RiceProfileScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl RiceProfileScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn score<R: Rng + ?Sized>(
        &self,
        characteristics: &ImageCharacteristics,
        rng: &mut R,
    ) -> RawScores {
        let cfg = &self.config;
        let aspect = characteristics.shape.avg_aspect_ratio;
        let brightness = characteristics.color.avg_brightness;
        let variance = characteristics.texture.variance;

        let mut scores = [cfg.floor; RiceVariety::COUNT];
        for profile in &cfg.profiles {
            let mut score = profile.base_weight;
            score += range_term(
                aspect,
                &profile.aspect_ratio,
                cfg.aspect_bonus,
                cfg.aspect_decay,
            );
            score += range_term(
                brightness,
                &profile.brightness,
                cfg.brightness_bonus,
                cfg.brightness_decay,
            );
            score += self.texture_term(profile.texture, variance);
            if cfg.jitter > 0.0 {
                score += rng.random_range(-cfg.jitter..=cfg.jitter);
            }
            scores[profile.variety.index()] = score.max(cfg.floor);
        }

        log::debug!("Profile scores: {:?}", scores);
        scores
    }

    fn texture_term(&self, preference: TexturePreference, variance: f64) -> f64 {
        let cfg = &self.config;
        match preference {
            TexturePreference::Smooth if variance < cfg.smooth_max_variance => cfg.texture_bonus,
            TexturePreference::Textured if variance > cfg.textured_min_variance => {
                cfg.texture_bonus
            }
            TexturePreference::Medium => cfg.medium_texture_bonus,
            _ => 0.0,
        }
    }
}

/// Full bonus inside the range, decaying linearly with distance outside it.
fn range_term(value: f64, range: &ValueRange, bonus: f64, decay: f64) -> f64 {
    if range.contains(value) {
        bonus
    } else {
        (bonus - range.distance(value) * decay).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::synthesis::argmax;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use shared::{ColorStats, ShapeStats, TextureStats};

    fn characteristics(aspect: f64, brightness: f64, variance: f64) -> ImageCharacteristics {
        ImageCharacteristics {
            color: ColorStats {
                avg_brightness: brightness,
                avg_saturation: 10.0,
                avg_hue: 20.0,
                avg_rgb: [brightness; 3],
            },
            texture: TextureStats {
                variance,
                edge_density: 0.1,
            },
            shape: ShapeStats {
                grain_count: 12,
                avg_aspect_ratio: aspect,
                avg_grain_area: 400.0,
            },
        }
    }

    fn scorer_without_jitter() -> RiceProfileScorer {
        RiceProfileScorer::new(ScoringConfig {
            jitter: 0.0,
            ..ScoringConfig::default()
        })
    }

    #[test]
    fn test_long_light_grains_favour_basmati_or_jasmine() {
        let mut rng = StdRng::seed_from_u64(3);
        let scores = scorer_without_jitter().score(&characteristics(0.3, 220.0, 500.0), &mut rng);

        // base + aspect + brightness + smooth texture
        assert!((scores[RiceVariety::Basmati.index()] - 0.9).abs() < 1e-9);
        assert!((scores[RiceVariety::Jasmine.index()] - 0.9).abs() < 1e-9);
        assert!((scores[RiceVariety::Arborio.index()] - 0.75).abs() < 1e-9);
        assert!((scores[RiceVariety::Ipsala.index()] - 0.8).abs() < 1e-9);
        assert!((scores[RiceVariety::Karacadag.index()] - 0.45).abs() < 1e-9);
        assert!(matches!(
            argmax(&scores),
            RiceVariety::Basmati | RiceVariety::Jasmine
        ));
    }

    #[test]
    fn test_dark_textured_grains_favour_karacadag() {
        let mut rng = StdRng::seed_from_u64(5);
        let scores = scorer_without_jitter().score(&characteristics(0.7, 150.0, 2500.0), &mut rng);
        assert_eq!(argmax(&scores), RiceVariety::Karacadag);
    }

    #[test]
    fn test_scores_never_drop_below_floor() {
        let config = ScoringConfig {
            jitter: 0.05,
            ..ScoringConfig::default()
        };
        let floor = config.floor;
        let scorer = RiceProfileScorer::new(ScoringConfig {
            profiles: config
                .profiles
                .iter()
                .cloned()
                .map(|mut p| {
                    p.base_weight = 0.0;
                    p
                })
                .collect(),
            ..config
        });
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..200 {
            // Far outside every range, mid variance: only jitter remains.
            let scores = scorer.score(&characteristics(25.0, 0.0, 1200.0), &mut rng);
            for (i, score) in scores.iter().enumerate() {
                assert!(*score >= floor, "variety {} scored {}", i, score);
                assert!(*score > 0.0);
            }
        }
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let exact = scorer_without_jitter().score(
            &characteristics(0.5, 190.0, 800.0),
            &mut StdRng::seed_from_u64(1),
        );
        let jittered = RiceProfileScorer::default();
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            let scores = jittered.score(&characteristics(0.5, 190.0, 800.0), &mut rng);
            for (a, b) in scores.iter().zip(exact.iter()) {
                assert!((a - b).abs() <= 0.05 + 1e-12);
            }
        }
    }

    #[test]
    fn test_range_term_decays_linearly() {
        let range = ValueRange::new(180.0, 255.0);
        assert_eq!(range_term(200.0, &range, 0.25, 0.01), 0.25);
        assert!((range_term(170.0, &range, 0.25, 0.01) - 0.15).abs() < 1e-12);
        assert_eq!(range_term(100.0, &range, 0.25, 0.01), 0.0);
    }
}
