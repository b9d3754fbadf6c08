use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{ImageBuffer, Luma, LumaA, Rgb, Rgba};
use log::info;
use ndarray::{Array2, Array3, Axis};

/// Load an image as `[height, width, channel]` floats.
///
/// * `.png` – 8/16-bit gray, gray+alpha, RGB or RGBA, scaled to `[0, 1]`
/// * `.npy` – `(h, w)` or `(h, w, c)` f64 / f32 array, values as stored
///
/// Grayscale data comes back with a single channel.
pub fn load_image(path: &Path) -> Result<Array3<f64>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let image = match ext.as_str() {
        "png" => load_png(path),
        "npy" => load_npy(path),
        other => bail!("Unsupported image extension: .{other}"),
    }
    .with_context(|| format!("loading image {}", path.display()))?;
    let (h, w, c) = image.dim();
    info!("loaded {}: {h}x{w}, {c} channels", path.display());
    Ok(image)
}

fn load_png(path: &Path) -> Result<Array3<f64>> {
    let img = image::open(path).context("decoding image")?;
    let channels = usize::from(img.color().channel_count());
    let (width, height, raw) = match channels {
        1 => {
            let buf = img.to_luma16();
            let (w, h) = buf.dimensions();
            (w, h, buf.into_raw())
        }
        2 => {
            let buf = img.to_luma_alpha16();
            let (w, h) = buf.dimensions();
            (w, h, buf.into_raw())
        }
        3 => {
            let buf = img.to_rgb16();
            let (w, h) = buf.dimensions();
            (w, h, buf.into_raw())
        }
        _ => {
            let buf = img.to_rgba16();
            let (w, h) = buf.dimensions();
            (w, h, buf.into_raw())
        }
    };
    let channels = channels.min(4);
    let scaled: Vec<f64> = raw.into_iter().map(|v| f64::from(v) / f64::from(u16::MAX)).collect();
    Ok(Array3::from_shape_vec(
        (height as usize, width as usize, channels),
        scaled,
    )?)
}

fn load_npy(path: &Path) -> Result<Array3<f64>> {
    if let Ok(a) = ndarray_npy::read_npy::<_, Array3<f64>>(path) {
        return Ok(a);
    }
    if let Ok(a) = ndarray_npy::read_npy::<_, Array2<f64>>(path) {
        return Ok(a.insert_axis(Axis(2)));
    }
    if let Ok(a) = ndarray_npy::read_npy::<_, Array3<f32>>(path) {
        return Ok(a.mapv(f64::from));
    }
    let a = ndarray_npy::read_npy::<_, Array2<f32>>(path)
        .context("expected a 2-D or 3-D f64/f32 array")?;
    Ok(a.mapv(f64::from).insert_axis(Axis(2)))
}

/// Save a `[height, width, channel]` image.
///
/// PNG output is 16-bit, clamped to `[0, 1]` with NaN written as 0, and
/// needs 1 to 4 channels. `.npy` keeps the exact values.
pub fn save_image(path: &Path, image: &Array3<f64>) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => save_png(path, image),
        "npy" => ndarray_npy::write_npy(path, image).context("writing .npy"),
        other => bail!("Unsupported image extension: .{other}"),
    }
    .with_context(|| format!("saving image {}", path.display()))?;
    info!("saved {}", path.display());
    Ok(())
}

fn save_png(path: &Path, image: &Array3<f64>) -> Result<()> {
    let (h, w, c) = image.dim();
    let raw: Vec<u16> = image
        .iter()
        .map(|&v| {
            let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
            (v * f64::from(u16::MAX)).round() as u16
        })
        .collect();
    let (w, h) = (u32::try_from(w)?, u32::try_from(h)?);
    let too_small = || anyhow::anyhow!("pixel buffer does not match {w}x{h}x{c}");
    match c {
        1 => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, raw).ok_or_else(too_small)?.save(path)?,
        2 => ImageBuffer::<LumaA<u16>, _>::from_raw(w, h, raw).ok_or_else(too_small)?.save(path)?,
        3 => ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, raw).ok_or_else(too_small)?.save(path)?,
        4 => ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, raw).ok_or_else(too_small)?.save(path)?,
        n => bail!("PNG supports 1 to 4 channels, image has {n}; save as .npy instead"),
    }
    Ok(())
}
