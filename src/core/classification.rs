use crate::core::multi_features::{
    assemble_features, difference_stats, temporal_stats, FEATURES_PER_BAND,
};
use crate::core::ssim_features::ssim_stats;
use crate::core::temporal_window::{TemporalWindow, WindowStats};
use crate::types::{CloudError, CloudResult};
use ndarray::{s, Array1, Array2, Array4, ArrayView2, ArrayView3, ArrayView4, Axis};

/// Per-pixel cloud probability model.
///
/// Implementations score a batch of feature rows and return one probability
/// in `[0, 1]` per row, preserving row order. They are opaque to the rest of
/// the pipeline and must be safe to share across threads, since hosts may
/// score several tiles concurrently.
pub trait CloudClassifier: Send + Sync {
    fn score(&self, features: ArrayView2<f64>) -> CloudResult<Array1<f32>>;
}

/// Score every frame independently on its raw band values.
///
/// Frames are processed in chunks of at most `max_proc_frames` to bound the
/// feature matrix size; chunking never changes the result, since each row is
/// scored on its own. Output shape is `(frames, height, width, 1)`.
pub fn mono_probabilities(
    classifier: &dyn CloudClassifier,
    bands: ArrayView4<f64>,
    max_proc_frames: usize,
) -> CloudResult<Array4<f32>> {
    let (num_frames, height, width, num_bands) = bands.dim();
    if num_frames == 0 {
        return Err(CloudError::Processing(
            "Mono classification requires at least one frame".to_string(),
        ));
    }
    if max_proc_frames == 0 {
        return Err(CloudError::Config(
            "Frame chunk size must be at least 1".to_string(),
        ));
    }

    log::info!(
        "Computing mono cloud probabilities for {} frames of {}x{} pixels",
        num_frames,
        height,
        width
    );

    let img_size = height * width;
    let mut probas = Array4::<f32>::zeros((num_frames, height, width, 1));

    let mut start = 0;
    while start < num_frames {
        let stop = (start + max_proc_frames).min(num_frames);
        log::debug!("Scoring mono features for frames {}..{}", start, stop);

        let chunk_rows = (stop - start) * img_size;
        let mut features = Array2::<f64>::zeros((chunk_rows, num_bands));
        for (slot, frame) in (start..stop).enumerate() {
            for i in 0..height {
                for j in 0..width {
                    let row = slot * img_size + i * width + j;
                    for b in 0..num_bands {
                        features[[row, b]] = bands[[frame, i, j, b]];
                    }
                }
            }
        }

        let probs = classifier.score(features.view())?;
        if probs.len() != chunk_rows {
            return Err(CloudError::Classifier(format!(
                "Classifier returned {} probabilities for {} feature rows",
                probs.len(),
                chunk_rows
            )));
        }

        for (slot, frame) in (start..stop).enumerate() {
            for i in 0..height {
                for j in 0..width {
                    probas[[frame, i, j, 0]] = probs[slot * img_size + i * width + j];
                }
            }
        }

        start = stop;
    }

    Ok(probas)
}

/// Score every frame on its multi-temporal feature set.
///
/// Target frames are visited strictly in order, folding the windowed
/// statistics state through consecutive windows so overlapping frames are
/// not recomputed. Per target frame the SSIM, temporal and difference
/// statistics are assembled into `FEATURES_PER_BAND` features per band and
/// scored. Output shape is `(frames, height, width, 1)`.
pub fn multi_probabilities(
    classifier: &dyn CloudClassifier,
    bands: ArrayView4<f64>,
    valid: ArrayView3<bool>,
    max_window: usize,
    sigma: f64,
) -> CloudResult<Array4<f32>> {
    let (num_frames, height, width, num_bands) = bands.dim();
    if num_frames == 0 {
        return Err(CloudError::Processing(
            "Multi-temporal classification requires at least one frame".to_string(),
        ));
    }
    if valid.dim() != (num_frames, height, width) {
        return Err(CloudError::ShapeMismatch(format!(
            "Validity shape {:?} does not match band sequence shape {:?}",
            valid.dim(),
            bands.dim()
        )));
    }

    log::info!(
        "Computing multi-temporal cloud probabilities for {} frames of {}x{} pixels ({} bands, window {})",
        num_frames,
        height,
        width,
        num_bands,
        max_window
    );

    let img_size = height * width;
    let mut probas = Array4::<f32>::zeros((num_frames, height, width, 1));
    let mut stats = WindowStats::new(sigma);

    for target in 0..num_frames {
        let window = TemporalWindow::new(num_frames, target, max_window)?;
        stats.advance(&window, bands, valid)?;

        let win_bands = bands.slice(s![window.range(), .., .., ..]);
        let win_valid = valid.slice(s![window.range(), .., ..]);

        let ssim = ssim_stats(
            win_bands,
            win_valid,
            stats.mean(),
            stats.variance(),
            window.target_rel(),
            sigma,
        )?;
        let temporal = temporal_stats(win_bands, win_valid)?;

        let target_bands = bands.index_axis(Axis(0), target);
        let (diff_max, diff_mean) = difference_stats(target_bands, &temporal, window.len())?;

        let mean_view = stats.mean();
        let target_mean = mean_view.index_axis(Axis(0), window.target_rel());
        let features = assemble_features(
            target_bands,
            target_mean,
            &ssim,
            &temporal,
            diff_max.view(),
            diff_mean.view(),
        )?;
        debug_assert_eq!(features.ncols(), FEATURES_PER_BAND * num_bands);

        let probs = classifier.score(features.view())?;
        if probs.len() != img_size {
            return Err(CloudError::Classifier(format!(
                "Classifier returned {} probabilities for {} feature rows",
                probs.len(),
                img_size
            )));
        }

        for i in 0..height {
            for j in 0..width {
                probas[[target, i, j, 0]] = probs[i * width + j];
            }
        }
    }

    Ok(probas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3, Array4};

    struct ConstantScore(f32);

    impl CloudClassifier for ConstantScore {
        fn score(&self, features: ArrayView2<f64>) -> CloudResult<Array1<f32>> {
            Ok(Array1::from_elem(features.nrows(), self.0))
        }
    }

    struct FirstFeature;

    impl CloudClassifier for FirstFeature {
        fn score(&self, features: ArrayView2<f64>) -> CloudResult<Array1<f32>> {
            Ok(features.column(0).mapv(|v| v as f32))
        }
    }

    struct RowMean;

    impl CloudClassifier for RowMean {
        fn score(&self, features: ArrayView2<f64>) -> CloudResult<Array1<f32>> {
            Ok(Array1::from_iter(
                features
                    .rows()
                    .into_iter()
                    .map(|row| (row.sum() / row.len() as f64) as f32),
            ))
        }
    }

    struct WrongLength;

    impl CloudClassifier for WrongLength {
        fn score(&self, features: ArrayView2<f64>) -> CloudResult<Array1<f32>> {
            Ok(Array1::zeros(features.nrows() + 1))
        }
    }

    struct ExpectWidth(usize);

    impl CloudClassifier for ExpectWidth {
        fn score(&self, features: ArrayView2<f64>) -> CloudResult<Array1<f32>> {
            if features.ncols() != self.0 {
                return Err(CloudError::Classifier(format!(
                    "expected {} feature columns, got {}",
                    self.0,
                    features.ncols()
                )));
            }
            Ok(Array1::from_elem(features.nrows(), 0.5))
        }
    }

    fn synthetic_bands(num_frames: usize) -> Array4<f64> {
        Array4::from_shape_fn((num_frames, 4, 5, 3), |(t, i, j, b)| {
            ((t * 31 + i * 7 + j * 3 + b * 13) % 11) as f64 * 0.1
        })
    }

    #[test]
    fn test_mono_results_do_not_depend_on_chunk_size() {
        let bands = synthetic_bands(7);

        let reference = mono_probabilities(&RowMean, bands.view(), 7).unwrap();
        for chunk in [1, 2, 5, 100] {
            let probas = mono_probabilities(&RowMean, bands.view(), chunk).unwrap();
            assert_eq!(probas, reference, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_mono_probabilities_land_on_their_frame() {
        let bands = Array4::from_shape_fn((4, 2, 2, 1), |(t, _, _, _)| t as f64 * 0.1);

        let probas = mono_probabilities(&FirstFeature, bands.view(), 2).unwrap();
        for t in 0..4 {
            assert!((probas[[t, 0, 0, 0]] - t as f32 * 0.1).abs() < 1e-6);
            assert!((probas[[t, 1, 1, 0]] - t as f32 * 0.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mono_rejects_wrong_probability_count() {
        let bands = synthetic_bands(3);
        assert!(mono_probabilities(&WrongLength, bands.view(), 11).is_err());
    }

    #[test]
    fn test_multi_feature_width_is_nine_per_band() {
        let bands = synthetic_bands(4);
        let valid = Array3::from_elem((4, 4, 5), true);

        let probas = multi_probabilities(
            &ExpectWidth(FEATURES_PER_BAND * 3),
            bands.view(),
            valid.view(),
            3,
            1.0,
        )
        .unwrap();
        assert_eq!(probas.dim(), (4, 4, 5, 1));
        assert!(probas.iter().all(|&p| p == 0.5));
    }

    #[test]
    fn test_multi_classifier_errors_propagate() {
        let bands = synthetic_bands(3);
        let valid = Array3::from_elem((3, 4, 5), true);

        let result =
            multi_probabilities(&ExpectWidth(1), bands.view(), valid.view(), 3, 1.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_constant_multi_scores_fill_every_frame() {
        let bands = synthetic_bands(5);
        let valid = Array3::from_shape_fn((5, 4, 5), |(t, i, j)| (t + i + j) % 4 != 0);

        let probas =
            multi_probabilities(&ConstantScore(0.25), bands.view(), valid.view(), 3, 1.0).unwrap();
        assert!(probas.iter().all(|&p| p == 0.25));
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let bands = Array4::<f64>::zeros((0, 4, 4, 1));
        let valid = Array3::from_elem((0, 4, 4), true);

        assert!(mono_probabilities(&ConstantScore(0.5), bands.view(), 1).is_err());
        assert!(
            multi_probabilities(&ConstantScore(0.5), bands.view(), valid.view(), 3, 1.0).is_err()
        );
    }
}
