//! Core cloud masking modules

pub mod classification;
pub mod cloud_mask;
pub mod multi_features;
pub mod postprocess;
pub mod resize;
pub mod sequence;
pub mod spatial_stats;
pub mod ssim_features;
pub mod temporal_window;

// Re-export main types
pub use classification::{mono_probabilities, multi_probabilities, CloudClassifier};
pub use cloud_mask::{BandSelection, CloudMaskConfig, CloudMaskProcessor, REDUCED_BAND_INDICES};
pub use multi_features::{
    assemble_features, difference_stats, temporal_stats, TemporalStats, FEATURES_PER_BAND,
};
pub use postprocess::{dilate_stack, disk_kernel, intersect_stacks, threshold_stack};
pub use resize::{resize_stack, resize_stack_by, Interpolation};
pub use sequence::map_sequence;
pub use spatial_stats::{gaussian_blur, red_ssim, win_avg, win_prevar};
pub use ssim_features::{ssim_stats, SsimStats};
pub use temporal_window::{TemporalWindow, WindowStats};
