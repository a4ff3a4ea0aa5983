//! Zero-mean NCC block matching of reference features into a target frame.

use crate::features::Feature;
use burst_fusion_core::LumaImage;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Block matcher configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Half size of the correlation patch (4 -> 9x9).
    pub patch_radius: usize,
    /// Largest displacement searched, in working pixels.
    pub search_radius: usize,
    /// Minimum correlation to accept a match.
    pub min_ncc: f32,
    /// Reference patches flatter than this standard deviation are skipped.
    pub min_patch_std: f32,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            patch_radius: 4,
            search_radius: 12,
            min_ncc: 0.8,
            min_patch_std: 2.0,
        }
    }
}

/// One target-to-reference point pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correspondence {
    pub target: Point2<f64>,
    pub reference: Point2<f64>,
    pub score: f32,
}

struct Patch {
    values: Vec<f32>,
    norm: f32,
}

fn centered_patch(img: &LumaImage, cx: usize, cy: usize, r: usize) -> Patch {
    let mut values = Vec::with_capacity((2 * r + 1) * (2 * r + 1));
    for y in cy - r..=cy + r {
        let row = y * img.width;
        values.extend_from_slice(&img.data[row + cx - r..=row + cx + r]);
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let mut ss = 0f32;
    for v in &mut values {
        *v -= mean;
        ss += *v * *v;
    }
    Patch {
        values,
        norm: ss.sqrt(),
    }
}

fn ncc_at(img: &LumaImage, reference: &Patch, cx: usize, cy: usize, r: usize) -> f32 {
    let n = ((2 * r + 1) * (2 * r + 1)) as f32;
    let (mut sum, mut sum_sq, mut cross) = (0f32, 0f32, 0f32);
    let mut k = 0;
    for y in cy - r..=cy + r {
        let row = y * img.width;
        for x in cx - r..=cx + r {
            let t = img.data[row + x];
            sum += t;
            sum_sq += t * t;
            cross += t * reference.values[k];
            k += 1;
        }
    }
    // sum(ref_centered) == 0, so the target mean drops out of the cross term.
    let var = (sum_sq - sum * sum / n).max(0.0);
    let denom = var.sqrt() * reference.norm;
    if denom <= f32::EPSILON {
        return 0.0;
    }
    cross / denom
}

/// Vertex offset of the parabola through `(-1, l)`, `(0, c)`, `(1, r)`.
#[inline]
fn parabolic_offset(l: f32, c: f32, r: f32) -> f64 {
    let d = l - 2.0 * c + r;
    if d.abs() < 1e-6 {
        return 0.0;
    }
    (0.5 * (l - r) / d).clamp(-0.5, 0.5) as f64
}

/// For each reference feature, find the best NCC position in `target` within
/// the search window, refined to sub-pixel precision.
///
/// Both images must have the same size.
pub fn match_features(
    reference: &LumaImage,
    target: &LumaImage,
    features: &[Feature],
    params: &MatchParams,
) -> Vec<Correspondence> {
    let r = params.patch_radius;
    let (w, h) = (target.width, target.height);
    if reference.width != w || reference.height != h || w <= 2 * r + 2 || h <= 2 * r + 2 {
        return Vec::new();
    }
    let min_std_norm = params.min_patch_std * ((2 * r + 1) as f32);
    let sr = params.search_radius as isize;
    let lo = (r + 1) as isize;
    let hi_x = (w - r - 2) as isize;
    let hi_y = (h - r - 2) as isize;

    let mut out = Vec::new();
    for f in features {
        if (f.x as isize) < lo || (f.y as isize) < lo || f.x as isize > hi_x || f.y as isize > hi_y
        {
            continue;
        }
        let patch = centered_patch(reference, f.x, f.y, r);
        if patch.norm < min_std_norm {
            continue;
        }

        let side = (2 * sr + 1) as usize;
        let mut scores = vec![f32::NEG_INFINITY; side * side];
        let mut best = (f32::NEG_INFINITY, 0isize, 0isize);
        for dy in -sr..=sr {
            let ty = f.y as isize + dy;
            if ty < lo || ty > hi_y {
                continue;
            }
            for dx in -sr..=sr {
                let tx = f.x as isize + dx;
                if tx < lo || tx > hi_x {
                    continue;
                }
                let s = ncc_at(target, &patch, tx as usize, ty as usize, r);
                scores[((dy + sr) as usize) * side + (dx + sr) as usize] = s;
                if s > best.0 {
                    best = (s, dx, dy);
                }
            }
        }

        let (score, dx, dy) = best;
        if score < params.min_ncc {
            continue;
        }

        let at = |ox: isize, oy: isize| -> Option<f32> {
            let (ix, iy) = (dx + ox + sr, dy + oy + sr);
            if ix < 0 || iy < 0 || ix >= side as isize || iy >= side as isize {
                return None;
            }
            let v = scores[iy as usize * side + ix as usize];
            v.is_finite().then_some(v)
        };
        let sub_x = match (at(-1, 0), at(1, 0)) {
            (Some(l), Some(rr)) => parabolic_offset(l, score, rr),
            _ => 0.0,
        };
        let sub_y = match (at(0, -1), at(0, 1)) {
            (Some(u), Some(d)) => parabolic_offset(u, score, d),
            _ => 0.0,
        };

        out.push(Correspondence {
            target: Point2::new(
                (f.x as isize + dx) as f64 + sub_x,
                (f.y as isize + dy) as f64 + sub_y,
            ),
            reference: Point2::new(f.x as f64, f.y as f64),
            score,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured(w: usize, h: usize, shift_x: isize, shift_y: isize) -> LumaImage {
        let data = (0..w * h)
            .map(|i| {
                let x = (i % w) as isize - shift_x;
                let y = (i / w) as isize - shift_y;
                let v = (x * 37 + y * 91 + (x * y) % 13) as i64;
                (v.rem_euclid(251)) as f32
            })
            .collect();
        LumaImage {
            width: w,
            height: h,
            data,
        }
    }

    #[test]
    fn recovers_integer_shift() {
        let reference = textured(64, 64, 0, 0);
        let target = textured(64, 64, 3, -2);
        let feats = [
            Feature {
                x: 30,
                y: 30,
                response: 1.0,
            },
            Feature {
                x: 20,
                y: 40,
                response: 1.0,
            },
        ];
        let m = match_features(&reference, &target, &feats, &MatchParams::default());
        assert_eq!(m.len(), 2);
        for c in m {
            // Sub-pixel refinement never moves more than half a pixel.
            assert_eq!((c.target.x - c.reference.x).round(), 3.0, "{c:?}");
            assert_eq!((c.target.y - c.reference.y).round(), -2.0, "{c:?}");
            assert!(c.score > 0.99);
        }
    }

    #[test]
    fn flat_reference_patch_is_skipped() {
        let flat = LumaImage {
            width: 40,
            height: 40,
            data: vec![50.0; 1600],
        };
        let feats = [Feature {
            x: 20,
            y: 20,
            response: 1.0,
        }];
        assert!(match_features(&flat, &flat, &feats, &MatchParams::default()).is_empty());
    }
}
