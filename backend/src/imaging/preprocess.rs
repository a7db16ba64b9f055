use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use neumo_shared::ImageMetadata;

use super::ImageError;
use super::config::PreprocessConfig;

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::Decode("empty file".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| ImageError::Decode(e.to_string()))
}

pub fn describe(bytes: &[u8]) -> Result<ImageMetadata, ImageError> {
    let img = decode(bytes)?;
    let (width, height) = img.dimensions();
    let format = image::guess_format(bytes)
        .ok()
        .map(|f| format!("{:?}", f).to_uppercase());

    Ok(ImageMetadata {
        width,
        height,
        format,
        color_type: format!("{:?}", img.color()),
        size_bytes: bytes.len(),
    })
}

/// Decodes `bytes` into a `[1, 3, H, W]` tensor: RGB, resized, center
/// cropped, scaled to `[0, 1]` and standardized per channel.
pub fn normalize(bytes: &[u8], config: &PreprocessConfig) -> Result<Array4<f32>, ImageError> {
    let img = decode(bytes)?;
    Ok(to_tensor(&img, config))
}

pub fn to_tensor(img: &DynamicImage, config: &PreprocessConfig) -> Array4<f32> {
    let resize = config.image.resize;
    let crop = config.image.crop;

    let resized = img.resize_exact(resize.width, resize.height, FilterType::Triangle);
    let x0 = (resize.width - crop.width) / 2;
    let y0 = (resize.height - crop.height) / 2;
    let rgb = resized.crop_imm(x0, y0, crop.width, crop.height).to_rgb8();

    let mean = config.normalization.mean;
    let std = config.normalization.std;
    let mut tensor = Array4::<f32>::zeros((1, 3, crop.height as usize, crop.width as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let scaled = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (scaled - mean[c]) / std[c];
        }
    }
    tensor
}
