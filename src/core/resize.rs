use crate::core::sequence::map_sequence;
use crate::core::spatial_stats::gaussian_blur_anisotropic;
use crate::types::{CloudError, CloudResult};
use ndarray::{Array2, Array4, ArrayView2, ArrayView4};

/// Frame resampling method.
///
/// `Linear` follows the OpenCV pixel-center convention with edge replication;
/// `Nearest` picks the top-left covered source pixel and is the right choice
/// for binary rasters that must not blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
}

/// Resample a frame to an explicit output size.
///
/// Plain sampling without smoothing; downscaling through
/// [`resize_frame_by`] adds the anti-alias blur.
pub fn resize_frame(
    frame: ArrayView2<f64>,
    new_height: usize,
    new_width: usize,
    method: Interpolation,
) -> CloudResult<Array2<f64>> {
    let (old_height, old_width) = frame.dim();
    if old_height == 0 || old_width == 0 {
        return Err(CloudError::ShapeMismatch(
            "Cannot resample an empty frame".to_string(),
        ));
    }
    if new_height == 0 || new_width == 0 {
        return Err(CloudError::Config(format!(
            "Resample target size {}x{} must be at least 1x1",
            new_height, new_width
        )));
    }

    let scale_rows = old_height as f64 / new_height as f64;
    let scale_cols = old_width as f64 / new_width as f64;

    let mut out = Array2::<f64>::zeros((new_height, new_width));
    match method {
        Interpolation::Nearest => {
            let row_map = nearest_map(new_height, old_height, scale_rows);
            let col_map = nearest_map(new_width, old_width, scale_cols);

            for i in 0..new_height {
                for j in 0..new_width {
                    out[[i, j]] = frame[[row_map[i], col_map[j]]];
                }
            }
        }
        Interpolation::Linear => {
            let row_map = linear_map(new_height, old_height, scale_rows);
            let col_map = linear_map(new_width, old_width, scale_cols);

            for i in 0..new_height {
                let (r0, r1, fr) = row_map[i];
                for j in 0..new_width {
                    let (c0, c1, fc) = col_map[j];
                    out[[i, j]] = (1.0 - fr) * (1.0 - fc) * frame[[r0, c0]]
                        + (1.0 - fr) * fc * frame[[r0, c1]]
                        + fr * (1.0 - fc) * frame[[r1, c0]]
                        + fr * fc * frame[[r1, c1]];
                }
            }
        }
    }

    Ok(out)
}

fn nearest_map(new_len: usize, old_len: usize, scale: f64) -> Vec<usize> {
    (0..new_len)
        .map(|i| ((i as f64 * scale).floor() as usize).min(old_len - 1))
        .collect()
}

fn linear_map(new_len: usize, old_len: usize, scale: f64) -> Vec<(usize, usize, f64)> {
    let last = old_len as isize - 1;
    (0..new_len)
        .map(|i| {
            let src = (i as f64 + 0.5) * scale - 0.5;
            let base = src.floor();
            let frac = src - base;
            let lo = (base as isize).clamp(0, last) as usize;
            let hi = (base as isize + 1).clamp(0, last) as usize;
            (lo, hi, frac)
        })
        .collect()
}

/// Resample a frame by per-axis scale factors.
///
/// The output size is `floor(old * factor)` per axis with a minimum of one
/// pixel. Axes being downscaled are first smoothed with an anti-alias
/// Gaussian of `sigma = ((1/factor) - 1) / 2`, as the source imagery pipeline
/// does.
pub fn resize_frame_by(
    frame: ArrayView2<f64>,
    factor_rows: f64,
    factor_cols: f64,
    method: Interpolation,
) -> CloudResult<Array2<f64>> {
    for (name, factor) in [("row", factor_rows), ("column", factor_cols)] {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(CloudError::Config(format!(
                "Invalid {} scale factor: {}",
                name, factor
            )));
        }
    }

    let (old_height, old_width) = frame.dim();
    let new_height = ((old_height as f64 * factor_rows).floor() as usize).max(1);
    let new_width = ((old_width as f64 * factor_cols).floor() as usize).max(1);

    let sigma_rows = anti_alias_sigma(factor_rows);
    let sigma_cols = anti_alias_sigma(factor_cols);

    if sigma_rows > 0.0 || sigma_cols > 0.0 {
        let smoothed = gaussian_blur_anisotropic(frame, sigma_rows, sigma_cols);
        resize_frame(smoothed.view(), new_height, new_width, method)
    } else {
        resize_frame(frame, new_height, new_width, method)
    }
}

fn anti_alias_sigma(factor: f64) -> f64 {
    if factor < 1.0 {
        ((1.0 / factor) - 1.0) / 2.0
    } else {
        0.0
    }
}

/// Resample every frame and band of a stack to an explicit size.
pub fn resize_stack(
    stack: ArrayView4<f32>,
    new_height: usize,
    new_width: usize,
    method: Interpolation,
) -> CloudResult<Array4<f32>> {
    map_sequence(stack, |_, _, plane| {
        let plane = plane.mapv(f64::from);
        let resized = resize_frame(plane.view(), new_height, new_width, method)?;
        Ok(resized.mapv(|v| v as f32))
    })
}

/// Resample every frame and band of a stack by scale factors.
pub fn resize_stack_by(
    stack: ArrayView4<f32>,
    factor_rows: f64,
    factor_cols: f64,
    method: Interpolation,
) -> CloudResult<Array4<f32>> {
    map_sequence(stack, |_, _, plane| {
        let plane = plane.mapv(f64::from);
        let resized = resize_frame_by(plane.view(), factor_rows, factor_cols, method)?;
        Ok(resized.mapv(|v| v as f32))
    })
}

/// Resample a boolean stack by scale factors.
///
/// Flags resample through a 0/1 raster; any nonzero output counts as set, so
/// a downscaled validity mask stays conservative at data edges.
pub fn resize_mask_stack_by(
    mask: ArrayView4<bool>,
    factor_rows: f64,
    factor_cols: f64,
    method: Interpolation,
) -> CloudResult<Array4<bool>> {
    let resized = map_sequence(mask, |_, _, plane| {
        let plane = plane.mapv(|v| if v { 1.0 } else { 0.0 });
        resize_frame_by(plane.view(), factor_rows, factor_cols, method)
    })?;
    Ok(resized.mapv(|v| v != 0.0))
}
