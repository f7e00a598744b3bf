use crate::core::ssim_features::SsimStats;
use crate::types::{CloudError, CloudResult};
use ndarray::{Array2, Array3, ArrayView3, ArrayView4, Zip};

/// Number of classifier features contributed per spectral band: raw value,
/// window mean, SSIM max/mean/std, temporal min/mean, difference max/mean.
pub const FEATURES_PER_BAND: usize = 9;

/// Per-pixel temporal minimum and mean over a frame window, each shaped
/// `(height, width, bands)`.
pub struct TemporalStats {
    pub min: Array3<f64>,
    pub mean: Array3<f64>,
}

/// Temporal minimum and mean over the window, target frame included.
///
/// Invalid frames are excluded pixel by pixel; a pixel with no valid frame at
/// all falls back to zero in both statistics.
pub fn temporal_stats(
    bands: ArrayView4<f64>,
    valid: ArrayView3<bool>,
) -> CloudResult<TemporalStats> {
    let (win_len, height, width, num_bands) = bands.dim();
    if valid.dim() != (win_len, height, width) {
        return Err(CloudError::ShapeMismatch(format!(
            "Window validity shape {:?} does not match band shape {:?}",
            valid.dim(),
            bands.dim()
        )));
    }
    if win_len == 0 {
        return Err(CloudError::Processing(
            "Temporal statistics require a non-empty window".to_string(),
        ));
    }

    let mut min = Array3::<f64>::zeros((height, width, num_bands));
    let mut mean = Array3::<f64>::zeros((height, width, num_bands));

    for i in 0..height {
        for j in 0..width {
            for b in 0..num_bands {
                let mut count = 0usize;
                let mut sum = 0.0;
                let mut lowest = f64::INFINITY;

                for t in 0..win_len {
                    if valid[[t, i, j]] {
                        let value = bands[[t, i, j, b]];
                        count += 1;
                        sum += value;
                        if value < lowest {
                            lowest = value;
                        }
                    }
                }

                if count > 0 {
                    min[[i, j, b]] = lowest;
                    mean[[i, j, b]] = sum / count as f64;
                }
            }
        }
    }

    Ok(TemporalStats { min, mean })
}

/// Difference statistics of the target frame against the window.
///
/// `diff_max = target - min` and
/// `diff_mean = target * (1 + 1/(n-1)) - n * mean / (n-1)` with `n` the
/// window length including the target; the latter equals the difference of
/// the target from the mean over the other frames when all entries are
/// valid. A window of length one has nothing to compare against and yields
/// zero in both statistics.
pub fn difference_stats(
    target: ArrayView3<f64>,
    temporal: &TemporalStats,
    window_len: usize,
) -> CloudResult<(Array3<f64>, Array3<f64>)> {
    let dim = target.dim();
    if temporal.min.dim() != dim || temporal.mean.dim() != dim {
        return Err(CloudError::ShapeMismatch(format!(
            "Temporal statistics shape {:?} does not match target shape {:?}",
            temporal.min.dim(),
            dim
        )));
    }

    if window_len <= 1 {
        log::debug!("Single-frame window, difference statistics fall back to zero");
        return Ok((Array3::zeros(dim), Array3::zeros(dim)));
    }

    let t_all = window_len as f64;
    let t_rest = t_all - 1.0;

    let mut diff_max = Array3::<f64>::zeros(dim);
    Zip::from(&mut diff_max)
        .and(&target)
        .and(&temporal.min)
        .for_each(|d, &t, &m| *d = t - m);

    let mut diff_mean = Array3::<f64>::zeros(dim);
    Zip::from(&mut diff_mean)
        .and(&target)
        .and(&temporal.mean)
        .for_each(|d, &t, &m| *d = t * (1.0 + 1.0 / t_rest) - t_all * m / t_rest);

    Ok((diff_max, diff_mean))
}

/// Flatten the per-pixel feature planes into classifier rows.
///
/// One row per pixel in row-major order, `FEATURES_PER_BAND * bands` columns:
/// raw bands, window means, then the SSIM (max, mean, std), temporal
/// (min, mean) and difference (max, mean) statistics interleaved per band.
/// The column layout is part of the classifier contract and must not change.
pub fn assemble_features(
    target_bands: ArrayView3<f64>,
    target_mean: ArrayView3<f64>,
    ssim: &SsimStats,
    temporal: &TemporalStats,
    diff_max: ArrayView3<f64>,
    diff_mean: ArrayView3<f64>,
) -> CloudResult<Array2<f64>> {
    let dim = target_bands.dim();
    for (name, shape) in [
        ("window mean", target_mean.dim()),
        ("SSIM max", ssim.max.dim()),
        ("SSIM mean", ssim.mean.dim()),
        ("SSIM std", ssim.std.dim()),
        ("temporal min", temporal.min.dim()),
        ("temporal mean", temporal.mean.dim()),
        ("difference max", diff_max.dim()),
        ("difference mean", diff_mean.dim()),
    ] {
        if shape != dim {
            return Err(CloudError::ShapeMismatch(format!(
                "Feature plane '{}' has shape {:?}, expected {:?}",
                name, shape, dim
            )));
        }
    }

    let (height, width, num_bands) = dim;
    let mut features = Array2::<f64>::zeros((height * width, FEATURES_PER_BAND * num_bands));

    for i in 0..height {
        for j in 0..width {
            let row = i * width + j;
            for b in 0..num_bands {
                features[[row, b]] = target_bands[[i, j, b]];
                features[[row, num_bands + b]] = target_mean[[i, j, b]];

                let ssim_col = 2 * num_bands + 3 * b;
                features[[row, ssim_col]] = ssim.max[[i, j, b]];
                features[[row, ssim_col + 1]] = ssim.mean[[i, j, b]];
                features[[row, ssim_col + 2]] = ssim.std[[i, j, b]];

                let temp_col = 5 * num_bands + 2 * b;
                features[[row, temp_col]] = temporal.min[[i, j, b]];
                features[[row, temp_col + 1]] = temporal.mean[[i, j, b]];

                let diff_col = 7 * num_bands + 2 * b;
                features[[row, diff_col]] = diff_max[[i, j, b]];
                features[[row, diff_col + 1]] = diff_mean[[i, j, b]];
            }
        }
    }

    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, Array4};

    #[test]
    fn test_temporal_stats_over_valid_frames() {
        let mut bands = Array4::<f64>::zeros((3, 1, 1, 1));
        bands[[0, 0, 0, 0]] = 1.0;
        bands[[1, 0, 0, 0]] = 5.0;
        bands[[2, 0, 0, 0]] = 3.0;
        let valid = Array3::from_elem((3, 1, 1), true);

        let stats = temporal_stats(bands.view(), valid.view()).unwrap();
        assert_abs_diff_eq!(stats.min[[0, 0, 0]], 1.0);
        assert_abs_diff_eq!(stats.mean[[0, 0, 0]], 3.0);
    }

    #[test]
    fn test_temporal_stats_skip_invalid_frames() {
        let mut bands = Array4::<f64>::zeros((3, 1, 1, 1));
        bands[[0, 0, 0, 0]] = 1.0;
        bands[[1, 0, 0, 0]] = 100.0;
        bands[[2, 0, 0, 0]] = 3.0;
        let mut valid = Array3::from_elem((3, 1, 1), true);
        valid[[1, 0, 0]] = false;

        let stats = temporal_stats(bands.view(), valid.view()).unwrap();
        assert_abs_diff_eq!(stats.min[[0, 0, 0]], 1.0);
        assert_abs_diff_eq!(stats.mean[[0, 0, 0]], 2.0);
    }

    #[test]
    fn test_temporal_stats_all_invalid_fall_back_to_zero() {
        let bands = Array4::from_elem((2, 2, 2, 1), 7.0);
        let valid = Array3::from_elem((2, 2, 2), false);

        let stats = temporal_stats(bands.view(), valid.view()).unwrap();
        assert!(stats.min.iter().all(|&v| v == 0.0));
        assert!(stats.mean.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_difference_stats_match_leave_one_out() {
        // Window values 2, 4, 6 with the target at 6: the difference mean
        // equals target minus the mean of the other frames
        let mut bands = Array4::<f64>::zeros((3, 1, 1, 1));
        bands[[0, 0, 0, 0]] = 2.0;
        bands[[1, 0, 0, 0]] = 4.0;
        bands[[2, 0, 0, 0]] = 6.0;
        let valid = Array3::from_elem((3, 1, 1), true);

        let temporal = temporal_stats(bands.view(), valid.view()).unwrap();
        let target = bands.index_axis(ndarray::Axis(0), 2);
        let (diff_max, diff_mean) = difference_stats(target, &temporal, 3).unwrap();

        assert_abs_diff_eq!(diff_max[[0, 0, 0]], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(diff_mean[[0, 0, 0]], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_frame_window_has_zero_differences() {
        let bands = Array4::from_elem((1, 2, 2, 1), 5.0);
        let valid = Array3::from_elem((1, 2, 2), true);

        let temporal = temporal_stats(bands.view(), valid.view()).unwrap();
        let target = bands.index_axis(ndarray::Axis(0), 0);
        let (diff_max, diff_mean) = difference_stats(target, &temporal, 1).unwrap();

        assert!(diff_max.iter().all(|&v| v == 0.0));
        assert!(diff_mean.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_feature_columns_follow_the_fixed_layout() {
        let (height, width, num_bands) = (1, 1, 2);
        let raw = Array3::from_elem((height, width, num_bands), 1.0);
        let mu = Array3::from_elem((height, width, num_bands), 2.0);
        let ssim = SsimStats {
            max: Array3::from_elem((height, width, num_bands), 3.0),
            mean: Array3::from_elem((height, width, num_bands), 4.0),
            std: Array3::from_elem((height, width, num_bands), 5.0),
        };
        let temporal = TemporalStats {
            min: Array3::from_elem((height, width, num_bands), 6.0),
            mean: Array3::from_elem((height, width, num_bands), 7.0),
        };
        let diff_max = Array3::from_elem((height, width, num_bands), 8.0);
        let diff_mean = Array3::from_elem((height, width, num_bands), 9.0);

        let features = assemble_features(
            raw.view(),
            mu.view(),
            &ssim,
            &temporal,
            diff_max.view(),
            diff_mean.view(),
        )
        .unwrap();

        assert_eq!(features.dim(), (1, FEATURES_PER_BAND * num_bands));
        let expected = [
            1.0, 1.0, // raw bands
            2.0, 2.0, // window means
            3.0, 4.0, 5.0, 3.0, 4.0, 5.0, // SSIM interleaved
            6.0, 7.0, 6.0, 7.0, // temporal interleaved
            8.0, 9.0, 8.0, 9.0, // difference interleaved
        ];
        for (col, &value) in expected.iter().enumerate() {
            assert_eq!(features[[0, col]], value, "column {}", col);
        }
    }

    #[test]
    fn test_feature_rows_are_row_major_pixels() {
        let (height, width, num_bands) = (2, 3, 1);
        let raw = Array3::from_shape_fn((height, width, num_bands), |(i, j, _)| {
            (i * 10 + j) as f64
        });
        let zeros = Array3::zeros((height, width, num_bands));
        let ssim = SsimStats {
            max: zeros.clone(),
            mean: zeros.clone(),
            std: zeros.clone(),
        };
        let temporal = TemporalStats {
            min: zeros.clone(),
            mean: zeros.clone(),
        };

        let features = assemble_features(
            raw.view(),
            zeros.view(),
            &ssim,
            &temporal,
            zeros.view(),
            zeros.view(),
        )
        .unwrap();

        for i in 0..height {
            for j in 0..width {
                assert_eq!(features[[i * width + j, 0]], (i * 10 + j) as f64);
            }
        }
    }
}
