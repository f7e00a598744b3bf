use crate::core::spatial_stats::red_ssim;
use crate::types::{CloudError, CloudResult};
use ndarray::{s, Array2, Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};

/// Per-pixel SSIM statistics of a target frame against its window neighbors,
/// each shaped `(height, width, bands)`.
pub struct SsimStats {
    pub max: Array3<f64>,
    pub mean: Array3<f64>,
    pub std: Array3<f64>,
}

impl SsimStats {
    fn zeros(height: usize, width: usize, num_bands: usize) -> Self {
        Self {
            max: Array3::zeros((height, width, num_bands)),
            mean: Array3::zeros((height, width, num_bands)),
            std: Array3::zeros((height, width, num_bands)),
        }
    }
}

/// Score the target frame against every other frame of the window.
///
/// `bands`, `mean` and `variance` are the window band values and their
/// windowed statistics `(window, height, width, bands)`; `valid` is the
/// per-frame validity `(window, height, width)`. Each neighbor is compared
/// under the joint validity of neighbor and target, and the per-neighbor SSIM
/// maps are reduced to max, mean and population standard deviation with
/// invalid neighbor pixels excluded. Pixels with no valid neighbor at all
/// fall back to zero in all three statistics, so degenerate windows stay
/// finite.
pub fn ssim_stats(
    bands: ArrayView4<f64>,
    valid: ArrayView3<bool>,
    mean: ArrayView4<f64>,
    variance: ArrayView4<f64>,
    target_rel: usize,
    sigma: f64,
) -> CloudResult<SsimStats> {
    let (win_len, height, width, num_bands) = bands.dim();
    for (name, shape) in [("mean", mean.dim()), ("variance", variance.dim())] {
        if shape != bands.dim() {
            return Err(CloudError::ShapeMismatch(format!(
                "Window {} shape {:?} does not match band shape {:?}",
                name,
                shape,
                bands.dim()
            )));
        }
    }
    if valid.dim() != (win_len, height, width) {
        return Err(CloudError::ShapeMismatch(format!(
            "Window validity shape {:?} does not match band shape {:?}",
            valid.dim(),
            bands.dim()
        )));
    }
    if target_rel >= win_len {
        return Err(CloudError::Processing(format!(
            "Relative target index {} outside window of length {}",
            target_rel, win_len
        )));
    }

    let neighbors: Vec<usize> = (0..win_len).filter(|&k| k != target_rel).collect();
    if neighbors.is_empty() {
        log::debug!("Window holds only the target frame, SSIM statistics fall back to zero");
        return Ok(SsimStats::zeros(height, width, num_bands));
    }

    // Joint validity of each neighbor with the target frame
    let target_valid = valid.index_axis(Axis(0), target_rel);
    let joint: Vec<Array2<bool>> = neighbors
        .iter()
        .map(|&frame| {
            let neighbor_valid = valid.index_axis(Axis(0), frame);
            let mut both = Array2::from_elem((height, width), false);
            Zip::from(&mut both)
                .and(&neighbor_valid)
                .and(&target_valid)
                .for_each(|j, &n, &t| *j = n && t);
            both
        })
        .collect();

    // ArrayView is invariant over its lifetime, so reborrow the inputs to
    // share the borrow of the locals
    let context = NeighborContext {
        bands: bands.view(),
        mean: mean.view(),
        variance: variance.view(),
        neighbors: &neighbors,
        joint: &joint,
        target_rel,
        sigma,
    };
    let maps = ssim_maps(&context, num_bands)?;

    let mut stats = SsimStats::zeros(height, width, num_bands);
    for band in 0..num_bands {
        for i in 0..height {
            for j in 0..width {
                let mut count = 0usize;
                let mut sum = 0.0;
                let mut sum_sq = 0.0;
                let mut max = f64::NEG_INFINITY;

                for (k, both) in joint.iter().enumerate() {
                    if both[[i, j]] {
                        let value = maps[[band, k, i, j]];
                        count += 1;
                        sum += value;
                        sum_sq += value * value;
                        if value > max {
                            max = value;
                        }
                    }
                }

                if count > 0 {
                    let mean_value = sum / count as f64;
                    stats.max[[i, j, band]] = max;
                    stats.mean[[i, j, band]] = mean_value;
                    let var = (sum_sq / count as f64 - mean_value * mean_value).max(0.0);
                    stats.std[[i, j, band]] = var.sqrt();
                }
            }
        }
    }

    Ok(stats)
}

/// Shared inputs of the per-neighbor SSIM maps.
struct NeighborContext<'a> {
    bands: ArrayView4<'a, f64>,
    mean: ArrayView4<'a, f64>,
    variance: ArrayView4<'a, f64>,
    neighbors: &'a [usize],
    joint: &'a [Array2<bool>],
    target_rel: usize,
    sigma: f64,
}

impl NeighborContext<'_> {
    fn neighbor_map(&self, band: usize, k: usize) -> CloudResult<Array2<f64>> {
        let frame = self.neighbors[k];
        red_ssim(
            self.bands.slice(s![self.target_rel, .., .., band]),
            self.bands.slice(s![frame, .., .., band]),
            self.joint[k].view(),
            self.mean.slice(s![self.target_rel, .., .., band]),
            self.mean.slice(s![frame, .., .., band]),
            self.variance.slice(s![self.target_rel, .., .., band]),
            self.variance.slice(s![frame, .., .., band]),
            self.sigma,
        )
    }
}

#[cfg(feature = "parallel")]
fn ssim_maps(context: &NeighborContext, num_bands: usize) -> CloudResult<Array4<f64>> {
    use rayon::prelude::*;

    let (_, height, width, _) = context.bands.dim();
    let pairs: Vec<(usize, usize)> = (0..num_bands)
        .flat_map(|b| (0..context.neighbors.len()).map(move |k| (b, k)))
        .collect();

    let results: Vec<((usize, usize), Array2<f64>)> = pairs
        .into_par_iter()
        .map(|(band, k)| context.neighbor_map(band, k).map(|map| ((band, k), map)))
        .collect::<CloudResult<Vec<_>>>()?;

    let mut maps = Array4::<f64>::zeros((num_bands, context.neighbors.len(), height, width));
    for ((band, k), map) in results {
        maps.slice_mut(s![band, k, .., ..]).assign(&map);
    }
    Ok(maps)
}

#[cfg(not(feature = "parallel"))]
fn ssim_maps(context: &NeighborContext, num_bands: usize) -> CloudResult<Array4<f64>> {
    let (_, height, width, _) = context.bands.dim();
    let mut maps = Array4::<f64>::zeros((num_bands, context.neighbors.len(), height, width));
    for band in 0..num_bands {
        for k in 0..context.neighbors.len() {
            let map = context.neighbor_map(band, k)?;
            maps.slice_mut(s![band, k, .., ..]).assign(&map);
        }
    }
    Ok(maps)
}
