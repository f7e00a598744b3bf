use crate::core::classification::{mono_probabilities, multi_probabilities, CloudClassifier};
use crate::core::postprocess::{
    apply_validity_flags, apply_validity_probas, average_stack, dilate_stack, disk_kernel,
    intersect_stacks, threshold_stack,
};
use crate::core::resize::{resize_mask_stack_by, resize_stack, resize_stack_by, Interpolation};
use crate::types::{
    BandStack, CloudError, CloudResult, FlagStack, ProbaStack, Resolution, TilePatch,
};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Band positions of the ten-band classifier subset within a full 13-band
/// Sentinel-2 L1C stack (B01, B02, B04, B05, B08, B8A, B09, B10, B11, B12).
pub const REDUCED_BAND_INDICES: [usize; 10] = [0, 1, 3, 4, 7, 8, 9, 10, 11, 12];

/// Which spectral bands feed the classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandSelection {
    /// Use the provided stack unchanged, whatever its width.
    All,
    /// Select the fixed ten-band subset from a full 13-band stack.
    Reduced,
}

/// Cloud masking configuration.
///
/// The defaults reproduce the classic InterSSIM setup: both classifiers
/// contribute, and only the intersection mask is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudMaskConfig {
    /// Feature name of the input band stack
    pub data_feature: String,
    /// Feature name of the validity mask
    pub valid_data_feature: String,
    /// Band subset handed to the classifiers
    pub band_selection: BandSelection,
    /// Ground resolution of the input imagery
    pub src_resolution: Option<Resolution>,
    /// Coarser resolution to run the classifiers at
    pub proc_resolution: Option<Resolution>,
    /// Temporal window size of the multi path (at least 2)
    pub max_window: usize,
    /// Frame chunk size of the mono path
    pub max_proc_frames: usize,
    /// Output feature for mono probabilities
    pub mono_proba_feature: Option<String>,
    /// Output feature for multi-temporal probabilities
    pub multi_proba_feature: Option<String>,
    /// Output feature for the mono cloud mask
    pub mono_mask_feature: Option<String>,
    /// Output feature for the multi-temporal cloud mask
    pub multi_mask_feature: Option<String>,
    /// Output feature for the intersection of both masks
    pub intersection_feature: Option<String>,
    /// Mono probability threshold
    pub mono_threshold: f64,
    /// Multi-temporal probability threshold
    pub multi_threshold: f64,
    /// Disk radius for probability smoothing ahead of thresholding
    pub average_over: Option<usize>,
    /// Disk radius for mask dilation
    pub dilation_size: Option<usize>,
}

impl Default for CloudMaskConfig {
    fn default() -> Self {
        Self {
            data_feature: "BANDS-S2-L1C".to_string(),
            valid_data_feature: "IS_DATA".to_string(),
            band_selection: BandSelection::Reduced,
            src_resolution: None,
            proc_resolution: None,
            max_window: 11,
            max_proc_frames: 11,
            mono_proba_feature: None,
            multi_proba_feature: None,
            mono_mask_feature: None,
            multi_mask_feature: None,
            intersection_feature: Some("CLM_INTERSSIM".to_string()),
            mono_threshold: 0.4,
            multi_threshold: 0.5,
            average_over: Some(1),
            dilation_size: Some(1),
        }
    }
}

impl CloudMaskConfig {
    fn requests_mono(&self) -> bool {
        self.mono_proba_feature.is_some()
            || self.mono_mask_feature.is_some()
            || self.intersection_feature.is_some()
    }

    fn requests_multi(&self) -> bool {
        self.multi_proba_feature.is_some()
            || self.multi_mask_feature.is_some()
            || self.intersection_feature.is_some()
    }

    fn requests_any(&self) -> bool {
        self.requests_mono() || self.requests_multi()
    }
}

/// Cloud mask processor.
///
/// Validates the configuration once at construction and derives the blur
/// scale, resampling factors and morphology kernels from it; `process` then
/// runs the configured classifiers over a tile and writes the requested
/// probability and mask features back into it.
pub struct CloudMaskProcessor {
    config: CloudMaskConfig,
    mono_classifier: Box<dyn CloudClassifier>,
    multi_classifier: Box<dyn CloudClassifier>,
    sigma: f64,
    scale_factors: Option<(f64, f64)>,
    avg_kernel: Option<Array2<bool>>,
    dil_kernel: Option<Array2<bool>>,
}

impl CloudMaskProcessor {
    pub fn new(
        config: CloudMaskConfig,
        mono_classifier: Box<dyn CloudClassifier>,
        multi_classifier: Box<dyn CloudClassifier>,
    ) -> CloudResult<Self> {
        if config.max_window < 2 {
            return Err(CloudError::Config(format!(
                "Temporal window size must be at least 2, got {}",
                config.max_window
            )));
        }
        if config.max_proc_frames == 0 {
            return Err(CloudError::Config(
                "Frame chunk size must be at least 1".to_string(),
            ));
        }
        if !config.requests_any() {
            return Err(CloudError::Config(
                "At least one output feature must be configured".to_string(),
            ));
        }

        // With a source resolution alone, only the blur scale adapts; with a
        // processing resolution on top, the tile is resampled between the two
        let (sigma, scale_factors) = match (config.src_resolution, config.proc_resolution) {
            (Some(src), None) => (100.0 / src.as_meters(), None),
            (Some(src), Some(proc)) => {
                let factor = src.as_meters() / proc.as_meters();
                (100.0 / proc.as_meters(), Some((factor, factor)))
            }
            (None, None) => (1.0, None),
            (None, Some(_)) => {
                return Err(CloudError::Config(
                    "A processing resolution requires a source resolution".to_string(),
                ))
            }
        };

        let avg_kernel = config.average_over.filter(|&r| r > 0).map(disk_kernel);
        let dil_kernel = config.dilation_size.filter(|&r| r > 0).map(disk_kernel);

        Ok(Self {
            config,
            mono_classifier,
            multi_classifier,
            sigma,
            scale_factors,
            avg_kernel,
            dil_kernel,
        })
    }

    pub fn config(&self) -> &CloudMaskConfig {
        &self.config
    }

    /// Compute the configured cloud features and write them into the patch.
    ///
    /// Masks and probabilities are produced at the source resolution
    /// regardless of the processing resolution, and every output is masked
    /// by the validity raster. Stored probabilities are the raw classifier
    /// outputs; the disk averaging only feeds thresholding.
    pub fn process(&self, patch: &mut TilePatch) -> CloudResult<()> {
        log::info!(
            "Computing cloud masks from feature '{}'",
            self.config.data_feature
        );

        let (selected, validity) = self.fetch_inputs(patch)?;
        let (_, height, width, _) = selected.dim();

        // Work at the processing resolution when one is configured
        let (work_bands, work_valid) = match self.scale_factors {
            Some((fr, fc)) => {
                log::debug!("Downscaling by factors ({:.4}, {:.4})", fr, fc);
                (
                    resize_stack_by(selected.view(), fr, fc, Interpolation::Linear)?,
                    resize_mask_stack_by(validity.view(), fr, fc, Interpolation::Linear)?,
                )
            }
            None => (selected, validity.clone()),
        };

        let bands = work_bands.mapv(f64::from);
        let valid_planes = work_valid.index_axis(Axis(3), 0).to_owned();

        let mono_proba = if self.config.requests_mono() {
            let probas = mono_probabilities(
                self.mono_classifier.as_ref(),
                bands.view(),
                self.config.max_proc_frames,
            )?;
            Some(self.restore_resolution(probas, height, width)?)
        } else {
            None
        };

        let multi_proba = if self.config.requests_multi() {
            let probas = multi_probabilities(
                self.multi_classifier.as_ref(),
                bands.view(),
                valid_planes.view(),
                self.config.max_window,
                self.sigma,
            )?;
            Some(self.restore_resolution(probas, height, width)?)
        } else {
            None
        };

        // Threshold ahead of dilation so the intersection sees raw masks
        let need_mono_mask =
            self.config.mono_mask_feature.is_some() || self.config.intersection_feature.is_some();
        let need_multi_mask =
            self.config.multi_mask_feature.is_some() || self.config.intersection_feature.is_some();

        let mono_mask = match (&mono_proba, need_mono_mask) {
            (Some(probas), true) => Some(self.threshold_masks(probas, self.config.mono_threshold)),
            _ => None,
        };
        let multi_mask = match (&multi_proba, need_multi_mask) {
            (Some(probas), true) => {
                Some(self.threshold_masks(probas, self.config.multi_threshold))
            }
            _ => None,
        };

        let intersection = match (&self.config.intersection_feature, &mono_mask, &multi_mask) {
            (Some(_), Some(mono), Some(multi)) => {
                Some(intersect_stacks(mono.view(), multi.view())?)
            }
            (Some(_), _, _) => {
                return Err(CloudError::Processing(
                    "Intersection output requires both mono and multi masks".to_string(),
                ))
            }
            _ => None,
        };

        // Dilate each requested mask independently and absorb invalid pixels
        if let (Some(name), Some(masks)) = (&self.config.mono_mask_feature, &mono_mask) {
            let dilated = self.dilate_if_configured(masks.clone());
            let masked = apply_validity_flags(dilated.view(), validity.view())?;
            patch.insert_mask(name.as_str(), masked)?;
        }
        if let (Some(name), Some(masks)) = (&self.config.multi_mask_feature, &multi_mask) {
            let dilated = self.dilate_if_configured(masks.clone());
            let masked = apply_validity_flags(dilated.view(), validity.view())?;
            patch.insert_mask(name.as_str(), masked)?;
        }
        if let (Some(name), Some(masks)) = (&self.config.intersection_feature, &intersection) {
            let dilated = self.dilate_if_configured(masks.clone());
            let masked = apply_validity_flags(dilated.view(), validity.view())?;
            patch.insert_mask(name.as_str(), masked)?;
        }
        if let (Some(name), Some(probas)) = (&self.config.mono_proba_feature, &mono_proba) {
            let masked = apply_validity_probas(probas.view(), validity.view())?;
            patch.insert_data(name.as_str(), masked)?;
        }
        if let (Some(name), Some(probas)) = (&self.config.multi_proba_feature, &multi_proba) {
            let masked = apply_validity_probas(probas.view(), validity.view())?;
            patch.insert_data(name.as_str(), masked)?;
        }

        log::info!("Cloud mask computation completed successfully");
        Ok(())
    }

    /// Fetch and validate the band stack and validity mask, applying the
    /// band selection.
    fn fetch_inputs(&self, patch: &TilePatch) -> CloudResult<(BandStack, FlagStack)> {
        let bands = patch.data(&self.config.data_feature)?;
        let valid = patch.mask(&self.config.valid_data_feature)?;

        let (num_frames, height, width, num_bands) = bands.dim();
        let (v_frames, v_height, v_width, v_channels) = valid.dim();

        if num_frames == 0 {
            return Err(CloudError::Processing(
                "Cloud masking requires at least one frame".to_string(),
            ));
        }
        if (v_frames, v_height, v_width) != (num_frames, height, width) {
            return Err(CloudError::ShapeMismatch(format!(
                "Validity shape {:?} does not match band stack shape {:?}",
                valid.dim(),
                bands.dim()
            )));
        }
        if v_channels != 1 {
            return Err(CloudError::ShapeMismatch(format!(
                "Validity mask must be single-channel, got {} channels",
                v_channels
            )));
        }

        let selected = match self.config.band_selection {
            BandSelection::All => bands.to_owned(),
            BandSelection::Reduced => {
                if num_bands < 13 {
                    return Err(CloudError::ShapeMismatch(format!(
                        "Reduced band selection requires a 13-band stack, got {} bands",
                        num_bands
                    )));
                }
                bands.select(Axis(3), &REDUCED_BAND_INDICES)
            }
        };

        log::debug!(
            "Input stack: {} frames of {}x{} pixels, {} of {} bands selected",
            num_frames,
            height,
            width,
            selected.dim().3,
            num_bands
        );

        Ok((selected, valid.clone()))
    }

    /// Resample probabilities back to the source resolution when the
    /// classifiers ran at a coarser one.
    fn restore_resolution(
        &self,
        probas: ProbaStack,
        height: usize,
        width: usize,
    ) -> CloudResult<ProbaStack> {
        if self.scale_factors.is_some() {
            resize_stack(probas.view(), height, width, Interpolation::Linear)
        } else {
            Ok(probas)
        }
    }

    /// Threshold probabilities into masks, smoothing first when an averaging
    /// kernel is configured.
    fn threshold_masks(&self, probas: &ProbaStack, threshold: f64) -> FlagStack {
        let smoothed = match &self.avg_kernel {
            Some(kernel) => average_stack(probas.view(), kernel.view()),
            None => probas.mapv(f64::from),
        };
        threshold_stack(smoothed.view(), threshold)
    }

    fn dilate_if_configured(&self, masks: FlagStack) -> FlagStack {
        match &self.dil_kernel {
            Some(kernel) => dilate_stack(masks.view(), kernel.view()),
            None => masks,
        }
    }
}
