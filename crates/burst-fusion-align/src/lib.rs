//! Burst alignment: homography estimation and perspective warping.
//!
//! - [`HomographyEstimator`] fits the transform that maps a target frame onto
//!   the burst reference. [`FeatureHomographyEstimator`] is the default:
//!   Harris corners on the reference, NCC block matching into the target,
//!   RANSAC over 4-point fits and a DLT refit on the inliers.
//! - [`WarpEngine`] resamples a frame through a transform into the reference
//!   coordinate system. Samples that fall outside the source's valid extent
//!   are marked undefined in the output mask instead of being filled.
//!
//! Both stages are pure functions of their inputs.

mod estimator;
mod features;
mod matching;
mod ransac;
mod warp;

pub use estimator::{
    EstimationFailure, EstimatorParams, FeatureHomographyEstimator, HomographyEstimator,
};
pub use features::{detect_features, Feature, FeatureParams};
pub use matching::{match_features, Correspondence, MatchParams};
pub use ransac::{fit_homography_ransac, RansacFit, RansacParams};
pub use warp::{source_roi, CpuWarpEngine, WarpEngine, WarpFailure};

pub use burst_fusion_core::Homography;
