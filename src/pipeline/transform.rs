//! Tensor transforms applied to rendered page buffers.
//!
//! A rendered page becomes a `(3, H, W)` float tensor in `[0, 1]`, then
//! flows through the configured steps in a fixed order:
//!
//! 1. optional colour inversion (`1 - x`)
//! 2. bilinear resize to the target geometry (skipped when dimensions
//!    already match)
//! 3. optional mean/std normalisation
//! 4. clamp to `[0, 1]` and quantise back to `u8`
//!
//! All steps run on the device carried by [`DeviceHandle`]. A failure on a
//! GPU device retries once on CPU; only if the CPU pass also fails does the
//! page fail.

use crate::config::{Normalize, Precision};
use crate::device::DeviceHandle;
use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, RgbImage};
use tracing::{debug, warn};

/// The resolved per-page transform parameters, derived from the run config
/// once and shared by every worker.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct TransformSpec {
    pub target_width: u32,
    pub target_height: u32,
    pub invert: bool,
    pub normalize: Option<Normalize>,
    pub precision: Precision,
}

impl TransformSpec {
    fn dtype(&self) -> DType {
        match self.precision {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
        }
    }
}

/// Apply the transform on the handle's device, falling back to CPU when a
/// GPU pass fails. GPU dispatch is serialised through the handle's
/// single-slot lock so concurrent units do not contend for device memory.
pub fn apply(
    image: &DynamicImage,
    spec: &TransformSpec,
    handle: &DeviceHandle,
) -> Result<RgbImage, candle_core::Error> {
    if handle.is_gpu() {
        let result = {
            let _slot = handle.acquire_slot();
            transform_on(image, spec, handle.device())
        };
        match result {
            Ok(out) => Ok(out),
            Err(e) => {
                warn!("GPU transform failed ({e}); retrying on CPU");
                transform_on(image, spec, &Device::Cpu)
            }
        }
    } else {
        transform_on(image, spec, handle.device())
    }
}

fn transform_on(
    image: &DynamicImage,
    spec: &TransformSpec,
    device: &Device,
) -> Result<RgbImage, candle_core::Error> {
    let rgb = image.to_rgb8();
    let (in_w, in_h) = (rgb.width() as usize, rgb.height() as usize);

    // HWC u8 → CHW float in [0, 1].
    let tensor = Tensor::from_vec(rgb.into_raw(), (in_h, in_w, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(spec.dtype())?
        .affine(1.0 / 255.0, 0.0)?;

    let tensor = if spec.invert {
        tensor.affine(-1.0, 1.0)?
    } else {
        tensor
    };

    let (out_h, out_w) = (spec.target_height as usize, spec.target_width as usize);
    let tensor = if (in_h, in_w) == (out_h, out_w) {
        tensor
    } else {
        debug!("Resizing {in_w}x{in_h} → {out_w}x{out_h}");
        let t = resize_dim(&tensor, 1, in_h, out_h, device)?;
        resize_dim(&t, 2, in_w, out_w, device)?
    };

    let tensor = match spec.normalize {
        Some(n) => tensor.affine(1.0 / n.std as f64, -(n.mean as f64) / n.std as f64)?,
        None => tensor,
    };

    // Quantise: clamp first so out-of-range values saturate instead of
    // wrapping, then round via the +0.5 offset before the u8 truncation.
    let bytes = tensor
        .clamp(0f32, 1f32)?
        .affine(255.0, 0.5)?
        .to_dtype(DType::U8)?
        .permute((1, 2, 0))?
        .contiguous()?
        .flatten_all()?
        .to_vec1::<u8>()?;

    RgbImage::from_raw(out_w as u32, out_h as u32, bytes).ok_or_else(|| {
        candle_core::Error::Msg(format!(
            "transformed buffer does not match {out_w}x{out_h} geometry"
        ))
    })
}

/// Bilinear resample along one spatial axis of a CHW tensor.
///
/// Uses half-pixel centre sampling (`src = (dst + 0.5) * scale - 0.5`,
/// clamped at the edges), matching the align_corners=false convention the
/// rest of the ecosystem defaults to. Built from two `index_select` gathers
/// plus a lerp because the tensor backend only ships nearest-neighbour
/// upsampling.
fn resize_dim(
    t: &Tensor,
    dim: usize,
    in_len: usize,
    out_len: usize,
    device: &Device,
) -> Result<Tensor, candle_core::Error> {
    if in_len == out_len {
        return Ok(t.clone());
    }

    let scale = in_len as f32 / out_len as f32;
    let mut lo = Vec::with_capacity(out_len);
    let mut hi = Vec::with_capacity(out_len);
    let mut frac = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src = ((i as f32 + 0.5) * scale - 0.5).max(0.0);
        let low = (src.floor() as usize).min(in_len - 1);
        let high = (low + 1).min(in_len - 1);
        lo.push(low as u32);
        hi.push(high as u32);
        frac.push(src - low as f32);
    }

    let lo = Tensor::from_vec(lo, out_len, device)?;
    let hi = Tensor::from_vec(hi, out_len, device)?;
    let weight_shape = if dim == 1 {
        (1, out_len, 1)
    } else {
        (1, 1, out_len)
    };
    let weight = Tensor::from_vec(frac, weight_shape, device)?.to_dtype(t.dtype())?;

    let left = t.index_select(&lo, dim)?;
    let right = t.index_select(&hi, dim)?;
    let delta = (&right - &left)?.broadcast_mul(&weight)?;
    &left + &delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn uniform_image(w: u32, h: u32, px: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(px)))
    }

    fn spec(w: u32, h: u32) -> TransformSpec {
        TransformSpec {
            target_width: w,
            target_height: h,
            invert: false,
            normalize: None,
            precision: Precision::F32,
        }
    }

    #[test]
    fn output_matches_target_geometry() {
        let handle = DeviceHandle::cpu();
        let img = uniform_image(64, 48, [10, 20, 30]);
        let out = apply(&img, &spec(192, 108), &handle).unwrap();
        assert_eq!((out.width(), out.height()), (192, 108));
    }

    #[test]
    fn matching_geometry_is_passthrough() {
        let handle = DeviceHandle::cpu();
        let img = uniform_image(32, 32, [200, 100, 50]);
        let out = apply(&img, &spec(32, 32), &handle).unwrap();
        assert_eq!(out.get_pixel(7, 13), &Rgb([200, 100, 50]));
    }

    #[test]
    fn resize_preserves_uniform_color() {
        // Bilinear interpolation of a constant field is the same constant.
        let handle = DeviceHandle::cpu();
        let img = uniform_image(20, 10, [90, 90, 90]);
        let out = apply(&img, &spec(40, 30), &handle).unwrap();
        for p in out.pixels() {
            assert_eq!(p, &Rgb([90, 90, 90]));
        }
    }

    #[test]
    fn invert_flips_extremes() {
        let handle = DeviceHandle::cpu();
        let mut s = spec(8, 8);
        s.invert = true;

        let black = apply(&uniform_image(8, 8, [0, 0, 0]), &s, &handle).unwrap();
        assert_eq!(black.get_pixel(0, 0), &Rgb([255, 255, 255]));

        let white = apply(&uniform_image(8, 8, [255, 255, 255]), &s, &handle).unwrap();
        assert_eq!(white.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn normalize_centers_midtones() {
        // (128/255 - 0.5) / 0.5 = 1/255, which quantises back to 1.
        let handle = DeviceHandle::cpu();
        let mut s = spec(4, 4);
        s.normalize = Some(Normalize {
            mean: 0.5,
            std: 0.5,
        });

        let out = apply(&uniform_image(4, 4, [128, 128, 128]), &s, &handle).unwrap();
        assert_eq!(out.get_pixel(1, 1), &Rgb([1, 1, 1]));

        // Values below the mean clamp to zero rather than wrapping.
        let dark = apply(&uniform_image(4, 4, [32, 32, 32]), &s, &handle).unwrap();
        assert_eq!(dark.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn transform_is_deterministic_on_cpu() {
        let handle = DeviceHandle::cpu();
        let mut img = RgbImage::new(16, 16);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8]);
        }
        let img = DynamicImage::ImageRgb8(img);

        let a = apply(&img, &spec(24, 24), &handle).unwrap();
        let b = apply(&img, &spec(24, 24), &handle).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn gpu_parity_within_one_quantisation_step() {
        let auto = DeviceHandle::new(crate::config::DevicePolicy::Auto);
        if !auto.is_gpu() {
            eprintln!("SKIP: no CUDA device resolved; parity needs a GPU");
            return;
        }
        let cpu = DeviceHandle::cpu();

        let mut img = RgbImage::new(16, 16);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8]);
        }
        let img = DynamicImage::ImageRgb8(img);
        let mut s = spec(24, 24);
        s.normalize = Some(Normalize {
            mean: 0.5,
            std: 0.5,
        });

        let gpu_out = apply(&img, &s, &auto).unwrap();
        let cpu_out = apply(&img, &s, &cpu).unwrap();
        for (a, b) in gpu_out.as_raw().iter().zip(cpu_out.as_raw()) {
            assert!(a.abs_diff(*b) <= 1, "gpu {a} vs cpu {b}");
        }
    }

    #[test]
    fn downscale_works_too() {
        let handle = DeviceHandle::cpu();
        let img = uniform_image(100, 100, [60, 70, 80]);
        let out = apply(&img, &spec(25, 25), &handle).unwrap();
        assert_eq!((out.width(), out.height()), (25, 25));
        assert_eq!(out.get_pixel(12, 12), &Rgb([60, 70, 80]));
    }
}
