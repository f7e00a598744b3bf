use crate::core::spatial_stats::{win_avg, win_prevar};
use crate::types::{CloudError, CloudResult};
use ndarray::{s, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis, Zip};
use std::ops::Range;

/// Contiguous frame window around a target frame.
///
/// The window is centered on the target and shifted back inside the sequence
/// when the target sits near either end, so it always holds
/// `min(max_window, num_frames)` frames and always contains the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalWindow {
    low: usize,
    high: usize,
    target_rel: usize,
}

impl TemporalWindow {
    pub fn new(num_frames: usize, target_idx: usize, max_window: usize) -> CloudResult<Self> {
        if num_frames == 0 {
            return Err(CloudError::Processing(
                "Temporal window requires at least one frame".to_string(),
            ));
        }
        if max_window == 0 {
            return Err(CloudError::Config(
                "Temporal window size must be at least 1".to_string(),
            ));
        }
        if target_idx >= num_frames {
            return Err(CloudError::Processing(format!(
                "Target frame {} out of range for a sequence of {} frames",
                target_idx, num_frames
            )));
        }

        let total = num_frames as isize;
        let reach = max_window as isize;
        let target = target_idx as isize;

        let mut low = target - reach / 2;
        let mut high = target + reach - reach / 2;

        let shift = (-low).max(0) - (high - total).max(0);
        low += shift;
        high += shift;

        let low = low.max(0) as usize;
        let high = (high.min(total)) as usize;

        Ok(Self {
            low,
            high,
            target_rel: target_idx - low,
        })
    }

    /// First frame index of the window (inclusive).
    pub fn low(&self) -> usize {
        self.low
    }

    /// Frame index one past the window (exclusive).
    pub fn high(&self) -> usize {
        self.high
    }

    /// Position of the target frame relative to the window start.
    pub fn target_rel(&self) -> usize {
        self.target_rel
    }

    pub fn len(&self) -> usize {
        self.high - self.low
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.low..self.high
    }
}

/// Windowed per-frame statistics folded along a frame sequence.
///
/// Holds the spatial window mean and variance of every frame in the current
/// temporal window, shaped `(window, height, width, bands)`. When consecutive
/// windows overlap, only the newly exposed trailing frame is computed; the
/// rest of the state shifts in place. Incremental and full computation give
/// the same numbers.
pub struct WindowStats {
    sigma: f64,
    bounds: Option<(usize, usize)>,
    mean: Array4<f64>,
    variance: Array4<f64>,
}

impl WindowStats {
    pub fn new(sigma: f64) -> Self {
        Self {
            sigma,
            bounds: None,
            mean: Array4::zeros((0, 0, 0, 0)),
            variance: Array4::zeros((0, 0, 0, 0)),
        }
    }

    /// Windowed spatial means, `(window, height, width, bands)`.
    pub fn mean(&self) -> ArrayView4<f64> {
        self.mean.view()
    }

    /// Windowed spatial variances, `(window, height, width, bands)`.
    pub fn variance(&self) -> ArrayView4<f64> {
        self.variance.view()
    }

    /// Bring the state up to date for `window` over the full sequence.
    ///
    /// `bands` is the whole band sequence `(frames, height, width, bands)` and
    /// `valid` the per-pixel validity `(frames, height, width)`; the window
    /// bounds index into them. Reuses the state untouched when the bounds are
    /// unchanged, shifts plus computes one frame when the window advanced by
    /// exactly one, and recomputes from scratch otherwise.
    pub fn advance(
        &mut self,
        window: &TemporalWindow,
        bands: ArrayView4<f64>,
        valid: ArrayView3<bool>,
    ) -> CloudResult<()> {
        let (num_frames, height, width, num_bands) = bands.dim();
        if valid.dim() != (num_frames, height, width) {
            return Err(CloudError::ShapeMismatch(format!(
                "Validity shape {:?} does not match band sequence shape {:?}",
                valid.dim(),
                bands.dim()
            )));
        }
        if window.high() > num_frames {
            return Err(CloudError::Processing(format!(
                "Window {}..{} exceeds the {} available frames",
                window.low(),
                window.high(),
                num_frames
            )));
        }

        let state_shape = (window.len(), height, width, num_bands);

        match self.bounds {
            Some((low, high)) if (low, high) == (window.low(), window.high()) => {
                if self.mean.dim() != state_shape {
                    return Err(CloudError::ShapeMismatch(format!(
                        "Window state shape {:?} drifted from frame shape {:?}",
                        self.mean.dim(),
                        state_shape
                    )));
                }
                log::debug!("Window bounds {}..{} unchanged, reusing statistics", low, high);
            }
            Some((low, high)) if window.low() == low + 1 && window.high() == high + 1 => {
                if self.mean.dim() != state_shape {
                    return Err(CloudError::ShapeMismatch(format!(
                        "Window state shape {:?} drifted from frame shape {:?}",
                        self.mean.dim(),
                        state_shape
                    )));
                }
                log::debug!(
                    "Window slid from {}..{} to {}..{}, computing trailing frame",
                    low,
                    high,
                    window.low(),
                    window.high()
                );

                let shifted_mean = self.mean.slice(s![1.., .., .., ..]).to_owned();
                self.mean.slice_mut(s![..-1, .., .., ..]).assign(&shifted_mean);
                let shifted_var = self.variance.slice(s![1.., .., .., ..]).to_owned();
                self.variance
                    .slice_mut(s![..-1, .., .., ..])
                    .assign(&shifted_var);

                let trailing = window.high() - 1;
                let (mu, var) = frame_stats(
                    bands.index_axis(Axis(0), trailing),
                    valid.index_axis(Axis(0), trailing),
                    self.sigma,
                );
                let last = window.len() - 1;
                self.mean.index_axis_mut(Axis(0), last).assign(&mu);
                self.variance.index_axis_mut(Axis(0), last).assign(&var);
            }
            _ => {
                log::debug!(
                    "Window stats full computation for frames {}..{}",
                    window.low(),
                    window.high()
                );

                let mut mean = Array4::<f64>::zeros(state_shape);
                let mut variance = Array4::<f64>::zeros(state_shape);
                for (slot, frame) in window.range().enumerate() {
                    let (mu, var) = frame_stats(
                        bands.index_axis(Axis(0), frame),
                        valid.index_axis(Axis(0), frame),
                        self.sigma,
                    );
                    mean.index_axis_mut(Axis(0), slot).assign(&mu);
                    variance.index_axis_mut(Axis(0), slot).assign(&var);
                }
                self.mean = mean;
                self.variance = variance;
            }
        }

        self.bounds = Some((window.low(), window.high()));
        Ok(())
    }
}

/// Windowed mean and variance of one frame.
///
/// The mean divides the blurred band values by the blurred validity raster,
/// with zero weights replaced by one, so missing pixels do not drag the
/// window average down. The variance is `blur(x*x) - mean^2` without the
/// validity normalization, matching the statistics the classifiers were
/// trained against.
fn frame_stats(
    bands: ArrayView3<f64>,
    valid: ArrayView2<bool>,
    sigma: f64,
) -> (Array3<f64>, Array3<f64>) {
    let (height, width, num_bands) = bands.dim();

    let valid_f = valid.mapv(|v| if v { 1.0 } else { 0.0 });
    let mut weight = win_avg(valid_f.view(), sigma);
    weight.mapv_inplace(|w| if w == 0.0 { 1.0 } else { w });

    let mut mean = Array3::<f64>::zeros((height, width, num_bands));
    let mut variance = Array3::<f64>::zeros((height, width, num_bands));

    for band in 0..num_bands {
        let plane = bands.slice(s![.., .., band]);
        let avg = win_avg(plane, sigma);
        let prevar = win_prevar(plane, sigma);

        let mut mu = Array2::<f64>::zeros((height, width));
        Zip::from(&mut mu)
            .and(&avg)
            .and(&weight)
            .for_each(|m, &a, &w| *m = a / w);

        let mut var = prevar;
        Zip::from(&mut var).and(&mu).for_each(|v, &m| *v -= m * m);

        mean.slice_mut(s![.., .., band]).assign(&mu);
        variance.slice_mut(s![.., .., band]).assign(&var);
    }

    (mean, variance)
}
