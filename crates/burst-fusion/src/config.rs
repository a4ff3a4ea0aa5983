//! JSON configuration for the burst pipeline.

use crate::detector::Symbology;
use burst_fusion_align::EstimatorParams;
use burst_fusion_median::UndefinedPixel;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("target_count must be at least 1")]
    InvalidTargetCount,
    #[error("queue_depth must be at least 1")]
    InvalidQueueDepth,
    #[error("output_depth must be at least 1")]
    InvalidOutputDepth,
    #[error("invalid estimator parameter: {0}")]
    InvalidEstimator(&'static str),
}

/// What to do when a frame cannot be aligned with the burst reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip the frame and keep collecting. The burst is aborted once more
    /// than `max_drops` frames have been skipped.
    DropFrame { max_drops: usize },
    /// Discard the reference and everything collected so far.
    AbortBurst,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::DropFrame { max_drops: 10 }
    }
}

/// Which frame to discard when the input queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Reject the incoming frame.
    #[default]
    DropNewest,
    /// Evict the oldest queued frame to make room.
    DropOldest,
}

fn default_symbologies() -> Vec<Symbology> {
    vec![Symbology::Code39, Symbology::Code128]
}

/// Pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Aligned frames collected after the reference before fusing.
    pub target_count: usize,
    pub failure_policy: FailurePolicy,
    /// Fill value for fused pixels without any defined sample.
    pub undefined_pixel: UndefinedPixel,
    /// Capacity of the frame queue between the producer and the worker.
    pub queue_depth: usize,
    pub overflow: OverflowPolicy,
    /// Capacity of the output channel. Outputs nobody reads are discarded.
    pub output_depth: usize,
    pub symbologies: Vec<Symbology>,
    pub estimator: EstimatorParams,
    /// Run warp and fusion rows on the rayon pool (needs the `rayon` feature).
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_count: 5,
            failure_policy: FailurePolicy::default(),
            undefined_pixel: UndefinedPixel::default(),
            queue_depth: 2,
            overflow: OverflowPolicy::default(),
            output_depth: 4,
            symbologies: default_symbologies(),
            estimator: EstimatorParams::default(),
            parallel: false,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_count == 0 {
            return Err(ConfigError::InvalidTargetCount);
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth);
        }
        if self.output_depth == 0 {
            return Err(ConfigError::InvalidOutputDepth);
        }
        let e = &self.estimator;
        if !(e.max_shift_frac.is_finite() && e.max_shift_frac > 0.0) {
            return Err(ConfigError::InvalidEstimator("max_shift_frac must be positive"));
        }
        if !(e.ransac.inlier_threshold.is_finite() && e.ransac.inlier_threshold > 0.0) {
            return Err(ConfigError::InvalidEstimator("ransac.inlier_threshold must be positive"));
        }
        if !(e.identity_tolerance.is_finite() && e.identity_tolerance >= 0.0) {
            return Err(ConfigError::InvalidEstimator("identity_tolerance must be non-negative"));
        }
        if e.matching.patch_radius == 0 {
            return Err(ConfigError::InvalidEstimator("matching.patch_radius must be positive"));
        }
        Ok(())
    }
}
