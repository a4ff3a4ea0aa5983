//! Perspective resampling of a frame into another frame's pixel grid.

use burst_fusion_core::{Frame, FrameError, Homography, Rect};
use nalgebra::Point2;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Slack, in pixels, when deciding whether a mapped point lies on the source.
const EXTENT_TOL: f64 = 1e-6;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum WarpFailure {
    #[error("transform is singular")]
    SingularTransform,

    #[error("transform has non-finite entries")]
    NonFiniteTransform,

    #[error("output extent is empty")]
    EmptyExtent,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Resamples an image through a perspective transform.
///
/// `src_from_out` maps output pixel coordinates into the source image.
/// The output buffer is `extent.width x extent.height`; output pixel `(i, j)`
/// stands for coordinate `(extent.x + i, extent.y + j)`. Output pixels whose
/// sample is not fully supported by defined source pixels are left zeroed
/// and cleared in the output mask.
pub trait WarpEngine: Send + Sync {
    fn warp(
        &self,
        image: &Frame,
        src_from_out: &Homography,
        extent: Rect,
    ) -> Result<Frame, WarpFailure>;
}

/// Bilinear CPU warp.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuWarpEngine {
    /// Process rows on the rayon pool. Ignored without the `rayon` feature.
    pub parallel: bool,
}

impl CpuWarpEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parallel() -> Self {
        Self { parallel: true }
    }
}

/// Conservative bounding box of the source pixels read when warping
/// `out_extent`, clipped to `src_extent`.
///
/// Falls back to the whole `src_extent` when the mapped region crosses the
/// line at infinity. `None` means no output pixel can land on the source.
pub fn source_roi(src_from_out: &Homography, out_extent: Rect, src_extent: Rect) -> Option<Rect> {
    if out_extent.is_empty() || src_extent.is_empty() {
        return None;
    }
    let x0 = out_extent.x as f64;
    let y0 = out_extent.y as f64;
    let x1 = (out_extent.right() - 1) as f64;
    let y1 = (out_extent.bottom() - 1) as f64;

    let h = &src_from_out.h;
    let mut sign = 0f64;
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (x, y) in [(x0, y0), (x1, y0), (x1, y1), (x0, y1)] {
        let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
        if !w.is_finite() || w == 0.0 || (sign != 0.0 && w.signum() != sign) {
            return Some(src_extent);
        }
        sign = w.signum();
        let q = src_from_out.apply(Point2::new(x, y));
        min_x = min_x.min(q.x);
        min_y = min_y.min(q.y);
        max_x = max_x.max(q.x);
        max_y = max_y.max(q.y);
    }

    // One pixel of margin for the bilinear footprint.
    let lo_x = (min_x.floor() - 1.0).max(src_extent.x as f64);
    let lo_y = (min_y.floor() - 1.0).max(src_extent.y as f64);
    let hi_x = (max_x.ceil() + 2.0).min(src_extent.right() as f64);
    let hi_y = (max_y.ceil() + 2.0).min(src_extent.bottom() as f64);
    if !(hi_x > lo_x && hi_y > lo_y) {
        return None;
    }
    let (lx, ly) = (lo_x as usize, lo_y as usize);
    Some(Rect::new(lx, ly, hi_x as usize - lx, hi_y as usize - ly))
}

/// Bilinear sample at `q`. Returns `false` when `q` is off the valid extent
/// or a contributing tap is masked out.
#[inline]
fn sample_pixel(image: &Frame, roi: Rect, q: Point2<f64>, out: &mut [u8]) -> bool {
    if !roi.contains_point(q.x, q.y, EXTENT_TOL) {
        return false;
    }
    let x = q.x.clamp(roi.x as f64, (roi.right() - 1) as f64);
    let y = q.y.clamp(roi.y as f64, (roi.bottom() - 1) as f64);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let x1 = (x0 + 1).min(roi.right() - 1);
    let y1 = (y0 + 1).min(roi.bottom() - 1);

    let taps = [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x1, y0, fx * (1.0 - fy)),
        (x0, y1, (1.0 - fx) * fy),
        (x1, y1, fx * fy),
    ];

    let width = image.width();
    let mask = image.mask();
    let mut acc = [0f64; 4];
    for (tx, ty, wt) in taps {
        if wt <= 0.0 {
            continue;
        }
        if mask.is_some_and(|m| m[ty * width + tx] == 0) {
            return false;
        }
        for (a, &v) in acc.iter_mut().zip(image.pixel(tx, ty)) {
            *a += wt * v as f64;
        }
    }
    for (o, a) in out.iter_mut().zip(acc) {
        *o = a.round().clamp(0.0, 255.0) as u8;
    }
    true
}

/// Fill output row `j`. Returns the number of undefined pixels.
fn warp_row(
    image: &Frame,
    src_from_out: &Homography,
    extent: Rect,
    roi: Option<Rect>,
    j: usize,
    row: &mut [u8],
    mask_row: &mut [u8],
) -> usize {
    let Some(roi) = roi else {
        return mask_row.len();
    };
    let ch = image.channels();
    let y = (extent.y + j) as f64;
    let mut undefined = 0;
    for (i, (px, m)) in row.chunks_exact_mut(ch).zip(mask_row.iter_mut()).enumerate() {
        let q = src_from_out.apply(Point2::new((extent.x + i) as f64, y));
        if sample_pixel(image, roi, q, px) {
            *m = 255;
        } else {
            undefined += 1;
        }
    }
    undefined
}

impl CpuWarpEngine {
    #[cfg(feature = "rayon")]
    fn run_rows(
        &self,
        image: &Frame,
        src_from_out: &Homography,
        extent: Rect,
        roi: Option<Rect>,
        data: &mut [u8],
        mask: &mut [u8],
    ) -> usize {
        let row_bytes = extent.width * image.channels();
        if self.parallel {
            return data
                .par_chunks_mut(row_bytes)
                .zip(mask.par_chunks_mut(extent.width))
                .enumerate()
                .map(|(j, (row, m))| warp_row(image, src_from_out, extent, roi, j, row, m))
                .sum();
        }
        data.chunks_mut(row_bytes)
            .zip(mask.chunks_mut(extent.width))
            .enumerate()
            .map(|(j, (row, m))| warp_row(image, src_from_out, extent, roi, j, row, m))
            .sum()
    }

    #[cfg(not(feature = "rayon"))]
    fn run_rows(
        &self,
        image: &Frame,
        src_from_out: &Homography,
        extent: Rect,
        roi: Option<Rect>,
        data: &mut [u8],
        mask: &mut [u8],
    ) -> usize {
        let row_bytes = extent.width * image.channels();
        data.chunks_mut(row_bytes)
            .zip(mask.chunks_mut(extent.width))
            .enumerate()
            .map(|(j, (row, m))| warp_row(image, src_from_out, extent, roi, j, row, m))
            .sum()
    }
}

impl WarpEngine for CpuWarpEngine {
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, image, src_from_out),
            fields(width = extent.width, height = extent.height)
        )
    )]
    fn warp(
        &self,
        image: &Frame,
        src_from_out: &Homography,
        extent: Rect,
    ) -> Result<Frame, WarpFailure> {
        if extent.is_empty() {
            return Err(WarpFailure::EmptyExtent);
        }
        if src_from_out.h.iter().any(|v| !v.is_finite()) {
            return Err(WarpFailure::NonFiniteTransform);
        }
        if !src_from_out.is_well_formed() {
            return Err(WarpFailure::SingularTransform);
        }

        let roi = source_roi(src_from_out, extent, image.extent());
        let mut data = vec![0u8; extent.area() * image.channels()];
        let mut mask = vec![0u8; extent.area()];
        let undefined = self.run_rows(image, src_from_out, extent, roi, &mut data, &mut mask);

        log::trace!(
            "warped {}x{} (roi {:?}, {} undefined)",
            extent.width,
            extent.height,
            roi,
            undefined
        );

        let out = Frame::new(extent.width, extent.height, image.format(), data)?;
        if undefined == 0 {
            Ok(out)
        } else {
            Ok(out.with_mask(mask)?)
        }
    }
}
