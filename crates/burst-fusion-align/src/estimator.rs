use crate::features::{detect_features, FeatureParams};
use crate::matching::{match_features, MatchParams};
use crate::ransac::{fit_homography_ransac, RansacParams};
use burst_fusion_core::{Frame, Homography, LumaImage, PixelFormat};
use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Why a target frame could not be registered against the reference.
///
/// Every variant is recoverable: the caller drops the frame or restarts the
/// burst.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EstimationFailure {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("pixel format mismatch (target {target:?}, reference {reference:?})")]
    FormatMismatch {
        target: PixelFormat,
        reference: PixelFormat,
    },

    #[error("too few features (found {found}, need {needed})")]
    TooFewFeatures { found: usize, needed: usize },

    #[error("too few matches (found {found}, need {needed})")]
    TooFewMatches { found: usize, needed: usize },

    #[error("too few RANSAC inliers (found {found}, need {needed})")]
    InsufficientInliers { found: usize, needed: usize },

    #[error("degenerate geometry: no invertible transform")]
    Degenerate,

    #[error("excessive motion: corner shift of {shift:.1} px")]
    ExcessiveMotion { shift: f64 },
}

/// Computes the transform mapping target-frame pixel coordinates onto
/// reference-frame pixel coordinates.
pub trait HomographyEstimator: Send + Sync {
    fn estimate(&self, target: &Frame, reference: &Frame)
        -> Result<Homography, EstimationFailure>;
}

/// Parameters of [`FeatureHomographyEstimator`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    /// Frames are halved until neither side exceeds this.
    pub max_working_dim: usize,
    pub features: FeatureParams,
    pub matching: MatchParams,
    pub ransac: RansacParams,
    /// Minimum number of features and of accepted matches.
    pub min_matches: usize,
    /// Mean absolute luma difference at or below which the frames are
    /// considered already aligned.
    pub identity_tolerance: f32,
    /// Reject transforms moving a frame corner further than this fraction
    /// of the frame diagonal.
    pub max_shift_frac: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            max_working_dim: 480,
            features: FeatureParams::default(),
            matching: MatchParams::default(),
            ransac: RansacParams::default(),
            min_matches: 8,
            identity_tolerance: 1.0,
            max_shift_frac: 0.25,
        }
    }
}

/// Sparse feature registration on a luma pyramid level.
#[derive(Clone, Debug, Default)]
pub struct FeatureHomographyEstimator {
    pub params: EstimatorParams,
}

impl FeatureHomographyEstimator {
    pub fn new(params: EstimatorParams) -> Self {
        Self { params }
    }
}

/// Halve `img` until it fits `max_dim`. Returns the level and its scale factor.
fn working_level(mut img: LumaImage, max_dim: usize) -> (LumaImage, usize) {
    let mut scale = 1usize;
    let max_dim = max_dim.max(16);
    while img.width.max(img.height) > max_dim && img.width >= 4 && img.height >= 4 {
        img = img.downsample_2x();
        scale *= 2;
    }
    (img, scale)
}

/// Lift a working-level transform to full resolution.
///
/// Working pixel `i` is centered on full-resolution `s * i + (s - 1) / 2`.
fn lift_to_full(h_work: &Homography, scale: usize) -> Homography {
    if scale == 1 {
        return *h_work;
    }
    let s = scale as f64;
    let o = (s - 1.0) / 2.0;
    let up = Homography::new(Matrix3::new(s, 0.0, o, 0.0, s, o, 0.0, 0.0, 1.0));
    let down = Homography::new(Matrix3::new(
        1.0 / s,
        0.0,
        -o / s,
        0.0,
        1.0 / s,
        -o / s,
        0.0,
        0.0,
        1.0,
    ));
    up.compose(h_work).compose(&down)
}

/// Move a transform fitted on a crop at `(x, y)` back to frame coordinates.
fn shift_origin(h_crop: &Homography, x: usize, y: usize) -> Homography {
    if x == 0 && y == 0 {
        return *h_crop;
    }
    let (ox, oy) = (x as f64, y as f64);
    Homography::translation(ox, oy)
        .compose(h_crop)
        .compose(&Homography::translation(-ox, -oy))
}

impl HomographyEstimator for FeatureHomographyEstimator {
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, target, reference),
            fields(width = reference.width(), height = reference.height())
        )
    )]
    fn estimate(
        &self,
        target: &Frame,
        reference: &Frame,
    ) -> Result<Homography, EstimationFailure> {
        let p = &self.params;
        if target.width() != reference.width() || target.height() != reference.height() {
            return Err(EstimationFailure::InvalidInput(format!(
                "target is {}x{}, reference is {}x{}",
                target.width(),
                target.height(),
                reference.width(),
                reference.height()
            )));
        }
        if target.format() != reference.format() {
            return Err(EstimationFailure::FormatMismatch {
                target: target.format(),
                reference: reference.format(),
            });
        }

        // Register on pixels both frames define; the crop origin is added
        // back once the fit is lifted to full resolution.
        let region = reference.extent().intersect(&target.extent()).ok_or_else(|| {
            EstimationFailure::InvalidInput(format!(
                "extents {:?} and {:?} do not overlap",
                target.extent(),
                reference.extent()
            ))
        })?;
        let ref_luma = reference.luma_in(region);
        let tgt_luma = target.luma_in(region);

        if let Some(mad) = tgt_luma.mean_abs_diff(&ref_luma) {
            if mad <= p.identity_tolerance {
                log::debug!("frames differ by {mad:.3} luma at identity, skipping registration");
                return Ok(Homography::identity());
            }
        }

        let (ref_w, scale) = working_level(ref_luma, p.max_working_dim);
        let (tgt_w, _) = working_level(tgt_luma, p.max_working_dim);

        let needed = p.min_matches.max(4);
        let features = detect_features(&ref_w, &p.features);
        if features.len() < needed {
            return Err(EstimationFailure::TooFewFeatures {
                found: features.len(),
                needed,
            });
        }

        let matches = match_features(&ref_w, &tgt_w, &features, &p.matching);
        if matches.len() < needed {
            return Err(EstimationFailure::TooFewMatches {
                found: matches.len(),
                needed,
            });
        }

        let src: Vec<Point2<f64>> = matches.iter().map(|m| m.target).collect();
        let dst: Vec<Point2<f64>> = matches.iter().map(|m| m.reference).collect();
        let fit = fit_homography_ransac(&src, &dst, &p.ransac)?;

        let h = shift_origin(&lift_to_full(&fit.h, scale), region.x, region.y);
        let h = h.normalized().unwrap_or(h);
        if !h.is_well_formed() {
            return Err(EstimationFailure::Degenerate);
        }

        let (w, ht) = (reference.width(), reference.height());
        let shift = h.max_corner_shift(w, ht);
        let diag = ((w * w + ht * ht) as f64).sqrt();
        if shift > p.max_shift_frac * diag {
            return Err(EstimationFailure::ExcessiveMotion { shift });
        }

        log::debug!(
            "registered {}/{} matches (scale 1/{}, rms {:.3}, corner shift {:.2})",
            fit.n_inliers,
            matches.len(),
            scale,
            fit.rms_error,
            shift
        );
        Ok(h)
    }
}
