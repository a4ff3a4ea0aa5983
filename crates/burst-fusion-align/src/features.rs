//! Harris corners with grid non-maximum suppression.
//!
//! Response `R = det(M) - k * trace(M)^2` of the box-windowed structure
//! tensor `M`. Candidates must beat `rel_threshold * max(R)`, be a strict
//! 3x3 local maximum, and survive one-per-cell suppression so that
//! correspondences spread over the whole frame.

use burst_fusion_core::LumaImage;
use serde::{Deserialize, Serialize};

/// Corner detector configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    /// Harris sensitivity. Typical range: 0.04..0.06.
    pub harris_k: f32,
    /// Half size of the structure-tensor window (1 -> 3x3).
    pub block_radius: usize,
    /// Response threshold relative to the strongest response in the frame.
    pub rel_threshold: f32,
    /// Side of the suppression cell, in working pixels.
    pub nms_cell: usize,
    /// Keep at most this many features, strongest first.
    pub max_features: usize,
    /// Distance from the border below which corners are discarded.
    pub border: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            harris_k: 0.04,
            block_radius: 1,
            rel_threshold: 0.01,
            nms_cell: 8,
            max_features: 300,
            border: 6,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Feature {
    pub x: usize,
    pub y: usize,
    pub response: f32,
}

fn harris_response(img: &LumaImage, k: f32, block_radius: usize) -> Vec<f32> {
    let (w, h) = (img.width, img.height);
    let mut ixx = vec![0f32; w * h];
    let mut iyy = vec![0f32; w * h];
    let mut ixy = vec![0f32; w * h];

    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let p = |dx: isize, dy: isize| {
                img.get((x as isize + dx) as usize, (y as isize + dy) as usize)
            };
            let gx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            let gy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            let i = y * w + x;
            ixx[i] = gx * gx;
            iyy[i] = gy * gy;
            ixy[i] = gx * gy;
        }
    }

    let r = block_radius;
    let mut out = vec![0f32; w * h];
    for y in r..h.saturating_sub(r) {
        for x in r..w.saturating_sub(r) {
            let (mut a, mut b, mut c) = (0f32, 0f32, 0f32);
            for yy in y - r..=y + r {
                let row = yy * w;
                for xx in x - r..=x + r {
                    a += ixx[row + xx];
                    b += iyy[row + xx];
                    c += ixy[row + xx];
                }
            }
            let det = a * b - c * c;
            let tr = a + b;
            out[y * w + x] = det - k * tr * tr;
        }
    }
    out
}

/// Detect well-spread Harris corners, strongest first.
pub fn detect_features(img: &LumaImage, params: &FeatureParams) -> Vec<Feature> {
    let (w, h) = (img.width, img.height);
    let border = params.border.max(params.block_radius + 2);
    if w <= 2 * border || h <= 2 * border {
        return Vec::new();
    }

    let resp = harris_response(img, params.harris_k, params.block_radius);
    let max_r = resp.iter().copied().fold(0f32, f32::max);
    if max_r <= 0.0 {
        return Vec::new();
    }
    let thr = params.rel_threshold * max_r;

    let cell = params.nms_cell.max(1);
    let cells_x = w.div_ceil(cell);
    let cells_y = h.div_ceil(cell);
    let mut best: Vec<Option<Feature>> = vec![None; cells_x * cells_y];

    for y in border..h - border {
        for x in border..w - border {
            let r = resp[y * w + x];
            if r <= thr {
                continue;
            }
            // Ties go to the first pixel in raster order.
            let idx = y * w + x;
            let is_peak = (y - 1..=y + 1).all(|yy| {
                (x - 1..=x + 1).all(|xx| {
                    let n = yy * w + xx;
                    n == idx || (n < idx && resp[n] < r) || (n > idx && resp[n] <= r)
                })
            });
            if !is_peak {
                continue;
            }
            let slot = &mut best[(y / cell) * cells_x + x / cell];
            if slot.is_none_or(|f| r > f.response) {
                *slot = Some(Feature { x, y, response: r });
            }
        }
    }

    let mut out: Vec<Feature> = best.into_iter().flatten().collect();
    out.sort_by(|a, b| b.response.total_cmp(&a.response));
    out.truncate(params.max_features);
    out
}
