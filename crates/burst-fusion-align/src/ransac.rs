//! RANSAC over minimal 4-point homography fits.

use crate::estimator::EstimationFailure;
use burst_fusion_core::{estimate_homography, homography_from_4pt, Homography};
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// RANSAC configuration for homography fitting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Maximum number of minimal-sample hypotheses.
    pub max_iters: usize,
    /// Inlier threshold (transfer error in working pixels).
    pub inlier_threshold: f64,
    /// Minimum number of inliers for a valid model.
    pub min_inliers: usize,
    /// Minimum inlier fraction of all correspondences.
    pub min_inlier_ratio: f64,
    /// Random seed. A fixed seed keeps estimation deterministic.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iters: 500,
            inlier_threshold: 1.5,
            min_inliers: 8,
            min_inlier_ratio: 0.3,
            seed: 0x5eed,
        }
    }
}

/// Result of RANSAC homography fitting.
#[derive(Clone, Debug)]
pub struct RansacFit {
    /// Fitted transform, `dst ~ H * src`.
    pub h: Homography,
    /// `true` for inliers.
    pub inlier_mask: Vec<bool>,
    pub n_inliers: usize,
    /// RMS transfer error over the inliers.
    pub rms_error: f64,
}

#[inline]
fn transfer_error(h: &Homography, src: Point2<f64>, dst: Point2<f64>) -> f64 {
    let p = h.apply(src);
    let e = ((p.x - dst.x).powi(2) + (p.y - dst.y).powi(2)).sqrt();
    if e.is_finite() {
        e
    } else {
        f64::INFINITY
    }
}

fn score(h: &Homography, src: &[Point2<f64>], dst: &[Point2<f64>], thr: f64) -> (Vec<bool>, usize) {
    let mask: Vec<bool> = src
        .iter()
        .zip(dst)
        .map(|(s, d)| transfer_error(h, *s, *d) < thr)
        .collect();
    let n = mask.iter().filter(|&&m| m).count();
    (mask, n)
}

/// Fit `dst ~ H * src` robustly.
pub fn fit_homography_ransac(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    params: &RansacParams,
) -> Result<RansacFit, EstimationFailure> {
    let n = src.len().min(dst.len());
    if n < 4 {
        return Err(EstimationFailure::TooFewMatches { found: n, needed: 4 });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Homography, Vec<bool>, usize)> = None;

    for _ in 0..params.max_iters {
        let idx = rand::seq::index::sample(&mut rng, n, 4);
        let s4 = [src[idx.index(0)], src[idx.index(1)], src[idx.index(2)], src[idx.index(3)]];
        let d4 = [dst[idx.index(0)], dst[idx.index(1)], dst[idx.index(2)], dst[idx.index(3)]];

        let Some(h) = homography_from_4pt(&s4, &d4) else {
            continue;
        };

        let (mask, count) = score(&h, &src[..n], &dst[..n], params.inlier_threshold);
        if best.as_ref().is_none_or(|b| count > b.2) {
            let done = count * 10 > n * 9;
            best = Some((h, mask, count));
            // Early exit once >90% of the matches agree.
            if done {
                break;
            }
        }
    }

    let Some((best_h, best_mask, best_count)) = best else {
        return Err(EstimationFailure::Degenerate);
    };

    let needed = params
        .min_inliers
        .max((params.min_inlier_ratio * n as f64).ceil() as usize)
        .max(4);
    if best_count < needed {
        return Err(EstimationFailure::InsufficientInliers {
            found: best_count,
            needed,
        });
    }

    // Refit using all inliers, keep it only if it does not lose support.
    let in_src: Vec<Point2<f64>> = (0..n).filter(|&i| best_mask[i]).map(|i| src[i]).collect();
    let in_dst: Vec<Point2<f64>> = (0..n).filter(|&i| best_mask[i]).map(|i| dst[i]).collect();
    let (h, mask, count) = match estimate_homography(&in_src, &in_dst) {
        Some(refit) => {
            let (m, c) = score(&refit, &src[..n], &dst[..n], params.inlier_threshold);
            if c >= best_count {
                (refit, m, c)
            } else {
                (best_h, best_mask, best_count)
            }
        }
        None => (best_h, best_mask, best_count),
    };

    let sq: f64 = (0..n)
        .filter(|&i| mask[i])
        .map(|i| transfer_error(&h, src[i], dst[i]).powi(2))
        .sum();
    let rms_error = (sq / count as f64).sqrt();

    Ok(RansacFit {
        h,
        inlier_mask: mask,
        n_inliers: count,
        rms_error,
    })
}
