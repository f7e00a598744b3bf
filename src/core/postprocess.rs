use crate::core::spatial_stats::reflect_index;
use crate::types::{CloudError, CloudResult};
use ndarray::{s, Array2, Array4, ArrayView2, ArrayView4, Zip};

/// Disk-shaped structuring element of the given radius.
///
/// A `(2r+1) x (2r+1)` boolean raster with cells set where
/// `dx^2 + dy^2 <= r^2`.
pub fn disk_kernel(radius: usize) -> Array2<bool> {
    let size = 2 * radius + 1;
    let r = radius as isize;
    let r_sq = r * r;

    Array2::from_shape_fn((size, size), |(i, j)| {
        let dy = i as isize - r;
        let dx = j as isize - r;
        dx * dx + dy * dy <= r_sq
    })
}

/// Correlate a frame with the uniformly weighted disk, reflected borders.
///
/// Every set kernel cell contributes with weight `1/count`, so a constant
/// frame is preserved. Used to smooth probability maps ahead of
/// thresholding; the stored probabilities stay untouched.
pub fn average_disk(frame: ArrayView2<f64>, kernel: ArrayView2<bool>) -> Array2<f64> {
    let (height, width) = frame.dim();
    let (k_height, k_width) = kernel.dim();
    debug_assert!(k_height % 2 == 1 && k_width % 2 == 1);

    let count = kernel.iter().filter(|&&set| set).count();
    if count == 0 {
        return frame.to_owned();
    }
    let weight = 1.0 / count as f64;
    let center_row = (k_height / 2) as isize;
    let center_col = (k_width / 2) as isize;

    let mut out = Array2::<f64>::zeros((height, width));
    for i in 0..height {
        for j in 0..width {
            let mut acc = 0.0;
            for ki in 0..k_height {
                for kj in 0..k_width {
                    if kernel[[ki, kj]] {
                        let ii = reflect_index(i as isize + ki as isize - center_row, height);
                        let jj = reflect_index(j as isize + kj as isize - center_col, width);
                        acc += frame[[ii, jj]];
                    }
                }
            }
            out[[i, j]] = acc * weight;
        }
    }
    out
}

/// Smooth every plane of a probability stack with the disk average.
pub fn average_stack(probas: ArrayView4<f32>, kernel: ArrayView2<bool>) -> Array4<f64> {
    let (num_frames, height, width, channels) = probas.dim();
    let mut out = Array4::<f64>::zeros((num_frames, height, width, channels));

    for t in 0..num_frames {
        for c in 0..channels {
            let plane = probas.slice(s![t, .., .., c]).mapv(f64::from);
            let averaged = average_disk(plane.view(), kernel);
            out.slice_mut(s![t, .., .., c]).assign(&averaged);
        }
    }
    out
}

/// Threshold probabilities into a boolean stack; values equal to the
/// threshold count as set.
pub fn threshold_stack(probas: ArrayView4<f64>, threshold: f64) -> Array4<bool> {
    probas.mapv(|p| p >= threshold)
}

/// Morphological dilation of a boolean frame with a structuring element.
///
/// A pixel is set when any kernel cell covers a set input pixel; outside the
/// frame counts as clear. Dilation never clears a set pixel.
pub fn dilate(mask: ArrayView2<bool>, kernel: ArrayView2<bool>) -> Array2<bool> {
    let (height, width) = mask.dim();
    let (k_height, k_width) = kernel.dim();
    debug_assert!(k_height % 2 == 1 && k_width % 2 == 1);

    let center_row = (k_height / 2) as isize;
    let center_col = (k_width / 2) as isize;

    Array2::from_shape_fn((height, width), |(i, j)| {
        for ki in 0..k_height {
            for kj in 0..k_width {
                if kernel[[ki, kj]] {
                    let ii = i as isize + ki as isize - center_row;
                    let jj = j as isize + kj as isize - center_col;
                    if ii >= 0
                        && jj >= 0
                        && (ii as usize) < height
                        && (jj as usize) < width
                        && mask[[ii as usize, jj as usize]]
                    {
                        return true;
                    }
                }
            }
        }
        false
    })
}

/// Dilate every plane of a boolean stack.
pub fn dilate_stack(masks: ArrayView4<bool>, kernel: ArrayView2<bool>) -> Array4<bool> {
    let (num_frames, height, width, channels) = masks.dim();
    let mut out = Array4::from_elem((num_frames, height, width, channels), false);

    for t in 0..num_frames {
        for c in 0..channels {
            let plane = masks.slice(s![t, .., .., c]);
            let dilated = dilate(plane, kernel);
            out.slice_mut(s![t, .., .., c]).assign(&dilated);
        }
    }
    out
}

/// Logical AND of two boolean stacks of equal shape.
pub fn intersect_stacks(
    left: ArrayView4<bool>,
    right: ArrayView4<bool>,
) -> CloudResult<Array4<bool>> {
    if left.dim() != right.dim() {
        return Err(CloudError::ShapeMismatch(format!(
            "Cannot intersect masks of shapes {:?} and {:?}",
            left.dim(),
            right.dim()
        )));
    }

    let mut out = Array4::from_elem(left.dim(), false);
    Zip::from(&mut out)
        .and(&left)
        .and(&right)
        .for_each(|o, &a, &b| *o = a && b);
    Ok(out)
}

/// Clear mask pixels outside the validity raster.
pub fn apply_validity_flags(
    masks: ArrayView4<bool>,
    valid: ArrayView4<bool>,
) -> CloudResult<Array4<bool>> {
    intersect_stacks(masks, valid)
}

/// Zero probability pixels outside the validity raster.
pub fn apply_validity_probas(
    probas: ArrayView4<f32>,
    valid: ArrayView4<bool>,
) -> CloudResult<Array4<f32>> {
    if probas.dim() != valid.dim() {
        return Err(CloudError::ShapeMismatch(format!(
            "Cannot mask probabilities of shape {:?} with validity of shape {:?}",
            probas.dim(),
            valid.dim()
        )));
    }

    let mut out = Array4::<f32>::zeros(probas.dim());
    Zip::from(&mut out)
        .and(&probas)
        .and(&valid)
        .for_each(|o, &p, &v| *o = if v { p } else { 0.0 });
    Ok(out)
}
