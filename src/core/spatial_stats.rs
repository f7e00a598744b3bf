use crate::types::{CloudError, CloudResult};
use ndarray::{Array1, Array2, ArrayView2, Zip};

/// Luminance stabilizing constant of the reduced SSIM formula
pub const SSIM_C1: f64 = 1e-6;

/// Contrast stabilizing constant of the reduced SSIM formula
pub const SSIM_C2: f64 = 1e-5;

/// Sample a Gaussian kernel for the given standard deviation.
///
/// Kernel size follows the OpenCV convention for an unspecified size:
/// `round(8*sigma + 1)` forced odd. Weights are normalized to sum one, so a
/// constant image is preserved exactly.
pub fn gaussian_kernel(sigma: f64) -> Array1<f64> {
    debug_assert!(sigma > 0.0, "Gaussian sigma must be positive");

    let size = ((8.0 * sigma + 1.0).round() as usize) | 1;
    let center = (size / 2) as f64;
    let scale = -0.5 / (sigma * sigma);

    let mut kernel = Array1::from_shape_fn(size, |i| {
        let d = i as f64 - center;
        (d * d * scale).exp()
    });

    let sum = kernel.sum();
    kernel.mapv_inplace(|w| w / sum);
    kernel
}

/// Reflect an out-of-range index back into `[0, len)`.
///
/// Mirrors across the array edge with the edge sample duplicated
/// (`-1 -> 0`, `-2 -> 1`, `len -> len - 1`), repeating for kernels wider
/// than the array.
pub(crate) fn reflect_index(mut index: isize, len: usize) -> usize {
    let n = len as isize;
    debug_assert!(n > 0);

    loop {
        if index < 0 {
            index = -index - 1;
        } else if index >= n {
            index = 2 * n - index - 1;
        } else {
            return index as usize;
        }
    }
}

/// Separable Gaussian blur with reflected borders.
///
/// Border reflection keeps the kernel mass inside the image, avoiding the
/// darkening a zero-padded blur would show at the edges.
pub fn gaussian_blur(x: ArrayView2<f64>, sigma: f64) -> Array2<f64> {
    gaussian_blur_anisotropic(x, sigma, sigma)
}

/// Separable Gaussian blur with independent sigmas per axis.
///
/// A non-positive sigma skips the pass along that axis; the anti-alias
/// smoothing of the resize step only blurs axes that are being downscaled.
pub fn gaussian_blur_anisotropic(
    x: ArrayView2<f64>,
    sigma_rows: f64,
    sigma_cols: f64,
) -> Array2<f64> {
    let (rows, cols) = x.dim();
    let mut out = x.to_owned();

    if sigma_cols > 0.0 && cols > 0 {
        let kernel = gaussian_kernel(sigma_cols);
        let radius = (kernel.len() / 2) as isize;
        let src = out.clone();

        for i in 0..rows {
            for j in 0..cols {
                let mut acc = 0.0;
                for (k, &w) in kernel.iter().enumerate() {
                    let jj = reflect_index(j as isize + k as isize - radius, cols);
                    acc += w * src[[i, jj]];
                }
                out[[i, j]] = acc;
            }
        }
    }

    if sigma_rows > 0.0 && rows > 0 {
        let kernel = gaussian_kernel(sigma_rows);
        let radius = (kernel.len() / 2) as isize;
        let src = out.clone();

        for j in 0..cols {
            for i in 0..rows {
                let mut acc = 0.0;
                for (k, &w) in kernel.iter().enumerate() {
                    let ii = reflect_index(i as isize + k as isize - radius, rows);
                    acc += w * src[[ii, j]];
                }
                out[[i, j]] = acc;
            }
        }
    }

    out
}

/// Spatial window average of a single frame.
pub fn win_avg(x: ArrayView2<f64>, sigma: f64) -> Array2<f64> {
    gaussian_blur(x, sigma)
}

/// Incomplete spatial window variance of a single frame.
///
/// Returns the windowed average of `x*x`; subtracting the squared windowed
/// mean turns it into the actual variance.
pub fn win_prevar(x: ArrayView2<f64>, sigma: f64) -> Array2<f64> {
    let squared = x.mapv(|v| v * v);
    gaussian_blur(squared.view(), sigma)
}

/// Reduced (pre-computed) SSIM map between two single-band frames.
///
/// `mu1`, `mu2`, `sigma1_sq` and `sigma2_sq` are the windowed means and
/// variances of `x` and `y` over the same Gaussian window of scale `sigma`.
/// Invalid pixels are zeroed in both frames before the cross term is blurred,
/// which removes their contribution from the window sums; excluding them from
/// later statistics is the caller's job, via the same validity mask.
pub fn red_ssim(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    valid: ArrayView2<bool>,
    mu1: ArrayView2<f64>,
    mu2: ArrayView2<f64>,
    sigma1_sq: ArrayView2<f64>,
    sigma2_sq: ArrayView2<f64>,
    sigma: f64,
) -> CloudResult<Array2<f64>> {
    let dim = x.dim();
    for (name, shape) in [
        ("y", y.dim()),
        ("valid", valid.dim()),
        ("mu1", mu1.dim()),
        ("mu2", mu2.dim()),
        ("sigma1_sq", sigma1_sq.dim()),
        ("sigma2_sq", sigma2_sq.dim()),
    ] {
        if shape != dim {
            return Err(CloudError::ShapeMismatch(format!(
                "SSIM input '{}' has shape {:?}, expected {:?}",
                name, shape, dim
            )));
        }
    }

    // Cross term over valid pixels only
    let mut cross = Array2::<f64>::zeros(dim);
    Zip::from(&mut cross)
        .and(&x)
        .and(&y)
        .and(&valid)
        .for_each(|c, &a, &b, &v| {
            *c = if v { a * b } else { 0.0 };
        });

    let sigma12 = gaussian_blur(cross.view(), sigma);

    let mut luminance = Array2::<f64>::zeros(dim);
    Zip::from(&mut luminance)
        .and(&mu1)
        .and(&mu2)
        .for_each(|l, &m1, &m2| *l = m1 * m1 + m2 * m2 + SSIM_C1);

    let mut contrast = Array2::<f64>::zeros(dim);
    Zip::from(&mut contrast)
        .and(&sigma1_sq)
        .and(&sigma2_sq)
        .for_each(|c, &s1, &s2| *c = s1 + s2 + SSIM_C2);

    let mut ssim = Array2::<f64>::zeros(dim);
    Zip::from(&mut ssim)
        .and(&mu1)
        .and(&mu2)
        .and(&sigma12)
        .and(&luminance)
        .and(&contrast)
        .for_each(|s, &m1, &m2, &s12, &lum, &con| {
            let num = (2.0 * m1 * m2 + SSIM_C1) * (2.0 * (s12 - m1 * m2) + SSIM_C2);
            *s = num / (lum * con);
        });

    Ok(ssim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    #[test]
    fn test_kernel_size_follows_sigma() {
        assert_eq!(gaussian_kernel(1.0).len(), 9);
        assert_eq!(gaussian_kernel(0.625).len(), 7);
        assert_eq!(gaussian_kernel(10.0).len(), 81);
    }

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(1.5);
        assert_abs_diff_eq!(kernel.sum(), 1.0, epsilon = 1e-12);

        let n = kernel.len();
        for i in 0..n / 2 {
            assert_abs_diff_eq!(kernel[i], kernel[n - 1 - i], epsilon = 1e-15);
        }
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 5), 0);
        assert_eq!(reflect_index(-2, 5), 1);
        assert_eq!(reflect_index(5, 5), 4);
        assert_eq!(reflect_index(6, 5), 3);
        assert_eq!(reflect_index(0, 5), 0);
        // Kernel wider than the array keeps folding back inside
        assert_eq!(reflect_index(-1, 1), 0);
        assert_eq!(reflect_index(3, 2), 0);
    }

    #[test]
    fn test_blur_preserves_constant_frames() {
        let frame = Array2::from_elem((6, 7), 3.25);
        let blurred = gaussian_blur(frame.view(), 1.3);

        for &value in blurred.iter() {
            assert_abs_diff_eq!(value, 3.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_blur_keeps_mean_of_symmetric_frames() {
        // A centered impulse: reflection keeps total mass inside the frame
        let mut frame = Array2::<f64>::zeros((9, 9));
        frame[[4, 4]] = 1.0;

        let blurred = gaussian_blur(frame.view(), 0.8);
        assert_abs_diff_eq!(blurred.sum(), 1.0, epsilon = 1e-9);
        assert!(blurred[[4, 4]] > blurred[[0, 0]]);
    }

    #[test]
    fn test_prevar_matches_variance_for_constant_frames() {
        let frame = Array2::from_elem((5, 5), 2.0);
        let mu = win_avg(frame.view(), 1.0);
        let prevar = win_prevar(frame.view(), 1.0);

        for (p, m) in prevar.iter().zip(mu.iter()) {
            assert_abs_diff_eq!(p - m * m, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_self_ssim_of_uniform_frame_is_one() {
        let frame = Array2::from_elem((8, 8), 0.4);
        let valid = Array2::from_elem((8, 8), true);
        let mu = win_avg(frame.view(), 1.0);
        let prevar = win_prevar(frame.view(), 1.0);
        let variance = &prevar - &mu.mapv(|m| m * m);

        let ssim = red_ssim(
            frame.view(),
            frame.view(),
            valid.view(),
            mu.view(),
            mu.view(),
            variance.view(),
            variance.view(),
            1.0,
        )
        .unwrap();

        for &value in ssim.iter() {
            assert_abs_diff_eq!(value, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_ssim_rejects_mismatched_shapes() {
        let a = Array2::<f64>::zeros((4, 4));
        let b = Array2::<f64>::zeros((4, 5));
        let valid = Array2::from_elem((4, 4), true);

        let result = red_ssim(
            a.view(),
            b.view(),
            valid.view(),
            a.view(),
            a.view(),
            a.view(),
            a.view(),
            1.0,
        );
        assert!(result.is_err());
    }
}
