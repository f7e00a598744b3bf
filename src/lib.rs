//! cumulus: Mono & Multi-Temporal Cloud Masking for Sentinel-2 Imagery
//!
//! This library computes per-pixel cloud probabilities and binary cloud masks
//! from multi-band, multi-temporal image stacks. A single-frame (mono)
//! classifier scores each frame on its raw band values, while a multi-temporal
//! classifier scores each frame on SSIM-based similarity statistics against
//! its temporal neighborhood; the intersection of both masks gives the
//! conservative default output.

pub mod core;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{BandStack, CloudError, CloudResult, FlagStack, ProbaStack, Resolution, TilePatch};

pub use crate::core::{
    BandSelection, CloudClassifier, CloudMaskConfig, CloudMaskProcessor, Interpolation,
    TemporalWindow, WindowStats,
};
