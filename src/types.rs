use chrono::{DateTime, Utc};
use ndarray::Array4;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// 4D multi-band image stack (time x rows x cols x bands)
pub type BandStack = Array4<f32>;

/// 4D single-channel boolean stack (time x rows x cols x 1)
pub type FlagStack = Array4<bool>;

/// 4D cloud probability stack (time x rows x cols x 1)
pub type ProbaStack = Array4<f32>;

/// Error types for cloud mask processing
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing feature: {0}")]
    MissingFeature(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Classifier error: {0}")]
    Classifier(String),
}

/// Result type for cloud mask operations
pub type CloudResult<T> = Result<T, CloudError>;

/// Ground sampling distance of an image grid, in meters per pixel.
///
/// Values can be given as plain meter counts or as strings of the form
/// `"60m"`, the format used by OGC-style resolution parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution(f64);

impl Resolution {
    /// Create a resolution from a meter value.
    pub fn meters(value: f64) -> CloudResult<Self> {
        if value.is_finite() && value > 0.0 {
            Ok(Resolution(value))
        } else {
            Err(CloudError::Config(format!(
                "Invalid resolution: {} m",
                value
            )))
        }
    }

    /// Resolution value in meters per pixel.
    pub fn as_meters(&self) -> f64 {
        self.0
    }
}

impl FromStr for Resolution {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pattern = Regex::new(r"^\s*(\d+)\s*m?\s*$")
            .map_err(|e| CloudError::Config(format!("Regex error: {}", e)))?;

        let captures = pattern.captures(s).ok_or_else(|| {
            CloudError::Config(format!("Invalid resolution string: '{}'", s))
        })?;

        let value: f64 = captures[1].parse().map_err(|e| {
            CloudError::Config(format!("Invalid resolution string '{}': {}", s, e))
        })?;

        Resolution::meters(value)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// Spatio-temporal tile container holding named multi-frame image arrays and
/// named multi-frame boolean arrays.
///
/// Data arrays hold 32-bit floats, mask arrays hold booleans, both in
/// (time, rows, cols, channels) order. Every array of a patch must share the
/// same frame count and the same spatial grid; the frame count must also
/// agree with the number of timestamps once timestamps are set.
#[derive(Debug, Clone, Default)]
pub struct TilePatch {
    data: HashMap<String, Array4<f32>>,
    mask: HashMap<String, Array4<bool>>,
    timestamps: Vec<DateTime<Utc>>,
}

impl TilePatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty patch with frame timestamps.
    ///
    /// Timestamps must be strictly ascending; the windowing logic assumes
    /// time-ordered frames without duplicates.
    pub fn with_timestamps(timestamps: Vec<DateTime<Utc>>) -> CloudResult<Self> {
        if timestamps.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(CloudError::Config(
                "Timestamps must be strictly ascending".to_string(),
            ));
        }

        Ok(Self {
            data: HashMap::new(),
            mask: HashMap::new(),
            timestamps,
        })
    }

    /// Number of frames shared by all arrays of this patch, if any are set.
    pub fn num_frames(&self) -> Option<usize> {
        if !self.timestamps.is_empty() {
            return Some(self.timestamps.len());
        }

        self.data
            .values()
            .map(|array| array.shape()[0])
            .next()
            .or_else(|| self.mask.values().map(|array| array.shape()[0]).next())
    }

    /// Frame timestamps, empty when none were provided.
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Spatial grid (rows, cols) shared by all arrays of this patch, if any
    /// are set.
    pub fn spatial_dims(&self) -> Option<(usize, usize)> {
        self.data
            .values()
            .map(|array| (array.shape()[1], array.shape()[2]))
            .next()
            .or_else(|| {
                self.mask
                    .values()
                    .map(|array| (array.shape()[1], array.shape()[2]))
                    .next()
            })
    }

    /// Store a multi-frame data array under `name`.
    pub fn insert_data(
        &mut self,
        name: impl Into<String>,
        array: Array4<f32>,
    ) -> CloudResult<()> {
        let name = name.into();
        self.check_shape(&name, array.shape())?;
        self.data.insert(name, array);
        Ok(())
    }

    /// Store a multi-frame boolean array under `name`.
    pub fn insert_mask(
        &mut self,
        name: impl Into<String>,
        array: Array4<bool>,
    ) -> CloudResult<()> {
        let name = name.into();
        self.check_shape(&name, array.shape())?;
        self.mask.insert(name, array);
        Ok(())
    }

    /// Fetch a data array by feature name.
    pub fn data(&self, name: &str) -> CloudResult<&Array4<f32>> {
        self.data.get(name).ok_or_else(|| {
            CloudError::MissingFeature(format!("data feature '{}'", name))
        })
    }

    /// Fetch a mask array by feature name.
    pub fn mask(&self, name: &str) -> CloudResult<&Array4<bool>> {
        self.mask.get(name).ok_or_else(|| {
            CloudError::MissingFeature(format!("mask feature '{}'", name))
        })
    }

    /// Whether a data feature with the given name exists.
    pub fn contains_data(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    /// Whether a mask feature with the given name exists.
    pub fn contains_mask(&self, name: &str) -> bool {
        self.mask.contains_key(name)
    }

    /// Names of all stored data features.
    pub fn data_names(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|name| name.as_str())
    }

    /// Names of all stored mask features.
    pub fn mask_names(&self) -> impl Iterator<Item = &str> {
        self.mask.keys().map(|name| name.as_str())
    }

    fn check_shape(&self, name: &str, shape: &[usize]) -> CloudResult<()> {
        if let Some(expected) = self.num_frames() {
            if shape[0] != expected {
                return Err(CloudError::ShapeMismatch(format!(
                    "Feature '{}' has {} frames, patch has {}",
                    name, shape[0], expected
                )));
            }
        }
        if let Some((rows, cols)) = self.spatial_dims() {
            if (shape[1], shape[2]) != (rows, cols) {
                return Err(CloudError::ShapeMismatch(format!(
                    "Feature '{}' is {}x{} pixels, patch is {}x{}",
                    name, shape[1], shape[2], rows, cols
                )));
            }
        }
        Ok(())
    }
}
