use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;

use super::InferenceError;

/// Resizes to `side`×`side`, scales to [0, 1] and lays the pixels out as a
/// 1×3×side×side batch.
pub fn to_input_tensor(
    image: &RgbImage,
    side: u32,
    filter: FilterType,
) -> Result<Array4<f32>, InferenceError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(InferenceError::Preprocessing(
            "image has no pixels".to_string(),
        ));
    }
    if side == 0 {
        return Err(InferenceError::Preprocessing(
            "input side must be positive".to_string(),
        ));
    }

    let resized = if image.dimensions() == (side, side) {
        image.clone()
    } else {
        imageops::resize(image, side, side, filter)
    };

    let side = side as usize;
    Ok(Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
    }))
}
