//! Image patches as `[batch, h, w, 3]` tensors in `[0, 1]`

use anyhow::{bail, Result};
use burn::prelude::*;
use image::{imageops, RgbImage};
use rand::Rng;
use std::path::Path;

use dcn_core::constants::RGB_CHANNELS;

use crate::context::ExecutionContext;

/// Convert an RGB image to a `[1, h, w, 3]` tensor
pub fn image_to_tensor<B: Backend>(image: &RgbImage, device: &B::Device) -> Tensor<B, 4> {
    let (w, h) = image.dimensions();
    let data: Vec<f32> = image
        .pixels()
        .flat_map(|p| [p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0])
        .collect();

    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([
        1,
        h as usize,
        w as usize,
        RGB_CHANNELS,
    ])
}

/// Convert the first image of a `[batch, h, w, 3]` tensor back to 8-bit RGB
pub fn tensor_to_image<B: Backend>(batch: Tensor<B, 4>) -> Result<RgbImage> {
    let [n, h, w, c] = batch.dims();
    if n == 0 || c != RGB_CHANNELS {
        bail!("expected a non-empty RGB batch, got {:?}", [n, h, w, c]);
    }

    let first = batch.slice([0..1, 0..h, 0..w, 0..c]).clamp(0.0, 1.0);
    let bytes: Vec<u8> = first
        .into_data()
        .iter::<f32>()
        .map(|v| (v * 255.0).round() as u8)
        .collect();

    match RgbImage::from_raw(w as u32, h as u32, bytes) {
        Some(image) => Ok(image),
        None => bail!("pixel buffer does not match {}x{}", w, h),
    }
}

/// Load an image and take the centered `patch_size` square
pub fn load_patch<B: Backend>(
    path: &Path,
    patch_size: usize,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    let image = image::open(path)?.to_rgb8();
    let (w, h) = image.dimensions();
    let p = patch_size as u32;
    if p == 0 || w < p || h < p {
        bail!("image {:?} ({}x{}) is smaller than a {}px patch", path, w, h, p);
    }

    let patch = imageops::crop_imm(&image, (w - p) / 2, (h - p) / 2, p, p).to_image();
    tracing::debug!("Loaded {}px patch from {:?}", p, path);
    Ok(image_to_tensor(&patch, device))
}

/// Smooth random color gradients with mild noise, `[batch, p, p, 3]`
pub fn synthetic_patches<B: Backend>(
    context: &ExecutionContext<B>,
    batch: usize,
    patch_size: usize,
    stream: u64,
) -> Tensor<B, 4> {
    let mut rng = context.rng(stream);
    let p = patch_size.max(1);
    let scale = 1.0 / p as f32;
    let mut data = Vec::with_capacity(batch * p * p * RGB_CHANNELS);

    for _ in 0..batch {
        let params: Vec<[f32; 3]> = (0..RGB_CHANNELS)
            .map(|_| [rng.gen_range(0.2..0.8), rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5)])
            .collect();

        for y in 0..p {
            for x in 0..p {
                for [base, dx, dy] in &params {
                    let value = base + dx * x as f32 * scale + dy * y as f32 * scale
                        + rng.gen_range(-0.02..0.02);
                    data.push(value.clamp(0.0, 1.0));
                }
            }
        }
    }

    Tensor::<B, 1>::from_floats(data.as_slice(), &context.device)
        .reshape([batch, p, p, RGB_CHANNELS])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray;

    #[test]
    fn test_image_roundtrip() {
        let mut image = RgbImage::new(4, 3);
        image.put_pixel(1, 2, image::Rgb([255, 128, 0]));
        let tensor = image_to_tensor::<B>(&image, &Default::default());
        assert_eq!(tensor.dims(), [1, 3, 4, 3]);

        let back = tensor_to_image(tensor).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn test_synthetic_patches_in_range() {
        let context = ExecutionContext::<B>::new(Default::default(), 5);
        let batch = synthetic_patches(&context, 2, 8, 1);
        assert_eq!(batch.dims(), [2, 8, 8, 3]);

        let values: Vec<f32> = batch.into_data().iter::<f32>().collect();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));

        let again: Vec<f32> = synthetic_patches(&context, 2, 8, 1)
            .into_data()
            .iter::<f32>()
            .collect();
        assert_eq!(values, again);
    }

    #[test]
    fn test_missing_file() {
        let result = load_patch::<B>(Path::new("/nonexistent/patch.png"), 16, &Default::default());
        assert!(result.is_err());
    }
}
