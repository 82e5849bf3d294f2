//! Color, texture and shape descriptors for the heuristic tier.

use image::{GrayImage, RgbImage, imageops};
use imageproc::contours::{BorderType, Contour, find_contours};
use imageproc::edges::canny;
use shared::{ColorStats, ImageCharacteristics, ShapeStats, TextureStats};

use super::config::FeatureConfig;

#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("Image has no pixels")]
    EmptyImage,
    #[error("Feature extraction failed: {0}")]
    Extraction(String),
}

/// Source of [`ImageCharacteristics`] for the heuristic tier.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image: &RgbImage) -> Result<ImageCharacteristics, FeatureError>;
}

#[derive(Debug, Clone, Default)]
pub struct ImageFeatureExtractor {
    config: FeatureConfig,
}

impl ImageFeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }
}

impl FeatureExtractor for ImageFeatureExtractor {
    fn extract(&self, image: &RgbImage) -> Result<ImageCharacteristics, FeatureError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(FeatureError::EmptyImage);
        }

        let color = color_stats(image);
        let gray = imageops::grayscale(image);
        let edges = canny(&gray, self.config.canny_low, self.config.canny_high);

        let edge_pixels = edges.pixels().filter(|p| p.0[0] > 0).count();
        let texture = TextureStats {
            variance: intensity_variance(&gray),
            edge_density: edge_pixels as f64 / pixel_count(image),
        };
        let shape = shape_stats(&edges, self.config.min_contour_area);

        log::debug!(
            "Extracted features: brightness {:.1}, variance {:.1}, {} grains, aspect {:.3}",
            color.avg_brightness,
            texture.variance,
            shape.grain_count,
            shape.avg_aspect_ratio
        );

        Ok(ImageCharacteristics {
            color,
            texture,
            shape,
        })
    }
}

fn pixel_count(image: &RgbImage) -> f64 {
    image.width() as f64 * image.height() as f64
}

fn color_stats(image: &RgbImage) -> ColorStats {
    let n = pixel_count(image);
    let mut rgb = [0.0f64; 3];
    let (mut hue, mut saturation, mut value) = (0.0, 0.0, 0.0);

    for pixel in image.pixels() {
        let [r, g, b] = pixel.0;
        rgb[0] += r as f64;
        rgb[1] += g as f64;
        rgb[2] += b as f64;
        let (h, s, v) = rgb_to_hsv(r, g, b);
        hue += h;
        saturation += s;
        value += v;
    }

    ColorStats {
        avg_brightness: value / n,
        avg_saturation: saturation / n,
        avg_hue: hue / n,
        avg_rgb: [rgb[0] / n, rgb[1] / n, rgb[2] / n],
    }
}

/// 8-bit HSV: hue in 0..180, saturation and value in 0..255.
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }
    (hue / 2.0, saturation, max)
}

fn intensity_variance(gray: &GrayImage) -> f64 {
    let n = gray.width() as f64 * gray.height() as f64;
    let mean = gray.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
    gray.pixels()
        .map(|p| {
            let d = p.0[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

fn shape_stats(edges: &GrayImage, min_area: f64) -> ShapeStats {
    let outer: Vec<Contour<u32>> = find_contours::<u32>(edges)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .collect();

    if outer.is_empty() {
        return ShapeStats {
            grain_count: 0,
            avg_aspect_ratio: 1.0,
            avg_grain_area: 0.0,
        };
    }

    let areas: Vec<f64> = outer.iter().map(contour_area).collect();
    let ratios: Vec<f64> = outer
        .iter()
        .zip(&areas)
        .filter(|(_, area)| **area > min_area)
        .map(|(contour, _)| bounding_aspect_ratio(contour))
        .collect();

    ShapeStats {
        grain_count: outer.len(),
        avg_aspect_ratio: if ratios.is_empty() {
            1.0
        } else {
            ratios.iter().sum::<f64>() / ratios.len() as f64
        },
        avg_grain_area: areas.iter().sum::<f64>() / areas.len() as f64,
    }
}

/// Shoelace area of the traced border.
fn contour_area(contour: &Contour<u32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for i in 0..points.len() {
        let j = (i + 1) % points.len();
        twice_area += points[i].x as f64 * points[j].y as f64;
        twice_area -= points[j].x as f64 * points[i].y as f64;
    }
    twice_area.abs() / 2.0
}

/// Width over height of the inclusive pixel bounding box.
fn bounding_aspect_ratio(contour: &Contour<u32>) -> f64 {
    let (mut x_min, mut y_min) = (u32::MAX, u32::MAX);
    let (mut x_max, mut y_max) = (0u32, 0u32);
    for p in &contour.points {
        x_min = x_min.min(p.x);
        y_min = y_min.min(p.y);
        x_max = x_max.max(p.x);
        y_max = y_max.max(p.y);
    }
    let width = (x_max - x_min + 1) as f64;
    let height = (y_max - y_min + 1) as f64;
    width / height
}
