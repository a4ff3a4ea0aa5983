use crate::fused::{FusedImage, UndefinedPixel};
use burst_fusion_core::{Frame, FrameError, PixelFormat, Rect};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FusionError {
    #[error("no aligned frames to fuse")]
    NoFrames,

    #[error("frame {index} is {got_width}x{got_height}, expected {width}x{height}")]
    DimensionMismatch {
        index: usize,
        width: usize,
        height: usize,
        got_width: usize,
        got_height: usize,
    },

    #[error("frame {index} has pixel format {got:?}, expected {expected:?}")]
    FormatMismatch {
        index: usize,
        expected: PixelFormat,
        got: PixelFormat,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Reduces a reference frame and its aligned burst to one image.
///
/// `reference` is read over its extent. Every frame in `accumulated` must be
/// `extent.width x extent.height` with the reference's pixel format, so that
/// pixel `(i, j)` of an aligned frame corresponds to reference pixel
/// `(extent.x + i, extent.y + j)`.
pub trait MedianFusion: Send + Sync {
    fn fuse(&self, reference: &Frame, accumulated: &[Frame]) -> Result<FusedImage, FusionError>;
}

/// Median of `values` (reordered in place). Even counts average the two
/// central values, rounding half up.
pub fn median_u8(values: &mut [u8]) -> Option<u8> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    values.sort_unstable();
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        let a = values[n / 2 - 1] as u16;
        let b = values[n / 2] as u16;
        Some(((a + b + 1) / 2) as u8)
    }
}

/// Channel-wise median on the CPU.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuMedianFusion {
    pub undefined: UndefinedPixel,
    /// Process rows on the rayon pool. Ignored without the `rayon` feature.
    pub parallel: bool,
}

impl CpuMedianFusion {
    pub fn new(undefined: UndefinedPixel) -> Self {
        Self {
            undefined,
            parallel: false,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn check_inputs(reference: &Frame, accumulated: &[Frame]) -> Result<Rect, FusionError> {
        if accumulated.is_empty() {
            return Err(FusionError::NoFrames);
        }
        let e = reference.extent();
        for (index, f) in accumulated.iter().enumerate() {
            if f.width() != e.width || f.height() != e.height {
                return Err(FusionError::DimensionMismatch {
                    index,
                    width: e.width,
                    height: e.height,
                    got_width: f.width(),
                    got_height: f.height(),
                });
            }
            if f.format() != reference.format() {
                return Err(FusionError::FormatMismatch {
                    index,
                    expected: reference.format(),
                    got: f.format(),
                });
            }
        }
        Ok(e)
    }

    #[cfg(feature = "rayon")]
    fn run_rows(&self, rows: Rows<'_>, data: &mut [u8], mask: &mut [u8]) -> usize {
        let row_bytes = rows.extent.width * rows.reference.channels();
        if self.parallel {
            return data
                .par_chunks_mut(row_bytes)
                .zip(mask.par_chunks_mut(rows.extent.width))
                .enumerate()
                .map(|(j, (row, m))| rows.fuse_row(j, row, m))
                .sum();
        }
        data.chunks_mut(row_bytes)
            .zip(mask.chunks_mut(rows.extent.width))
            .enumerate()
            .map(|(j, (row, m))| rows.fuse_row(j, row, m))
            .sum()
    }

    #[cfg(not(feature = "rayon"))]
    fn run_rows(&self, rows: Rows<'_>, data: &mut [u8], mask: &mut [u8]) -> usize {
        let row_bytes = rows.extent.width * rows.reference.channels();
        data.chunks_mut(row_bytes)
            .zip(mask.chunks_mut(rows.extent.width))
            .enumerate()
            .map(|(j, (row, m))| rows.fuse_row(j, row, m))
            .sum()
    }
}

/// Shared read-only inputs of the per-row kernel.
#[derive(Clone, Copy)]
struct Rows<'a> {
    reference: &'a Frame,
    extent: Rect,
    accumulated: &'a [Frame],
    undefined: &'a [u8],
}

impl Rows<'_> {
    /// Fuse output row `j`. Returns the number of defined pixels.
    fn fuse_row(&self, j: usize, row: &mut [u8], mask_row: &mut [u8]) -> usize {
        let ch = self.reference.channels();
        let mut present: Vec<&[u8]> = Vec::with_capacity(self.accumulated.len() + 1);
        let mut scratch: Vec<u8> = Vec::with_capacity(self.accumulated.len() + 1);
        let mut defined = 0;
        let ry = self.extent.y + j;

        for (i, (out, m)) in row.chunks_exact_mut(ch).zip(mask_row.iter_mut()).enumerate() {
            present.clear();
            let rx = self.extent.x + i;
            if self.reference.is_defined(rx, ry) {
                present.push(self.reference.pixel(rx, ry));
            }
            for f in self.accumulated {
                if f.is_defined(i, j) {
                    present.push(f.pixel(i, j));
                }
            }

            if present.is_empty() {
                out.copy_from_slice(self.undefined);
                continue;
            }
            *m = 255;
            defined += 1;
            for (c, o) in out.iter_mut().enumerate() {
                scratch.clear();
                scratch.extend(present.iter().map(|p| p[c]));
                if let Some(v) = median_u8(&mut scratch) {
                    *o = v;
                }
            }
        }
        defined
    }
}

impl MedianFusion for CpuMedianFusion {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(frames = accumulated.len() + 1))
    )]
    fn fuse(&self, reference: &Frame, accumulated: &[Frame]) -> Result<FusedImage, FusionError> {
        let extent = Self::check_inputs(reference, accumulated)?;
        let ch = reference.channels();
        let rows = Rows {
            reference,
            extent,
            accumulated,
            undefined: self.undefined.for_format(reference.format()),
        };

        let mut data = vec![0u8; extent.area() * ch];
        let mut mask = vec![0u8; extent.area()];
        let defined = self.run_rows(rows, &mut data, &mut mask);

        log::debug!(
            "fused {} frames over {}x{} ({}/{} pixels defined)",
            accumulated.len() + 1,
            extent.width,
            extent.height,
            defined,
            extent.area()
        );

        let frame = Frame::new(extent.width, extent.height, reference.format(), data)?;
        let frame = if defined == extent.area() {
            frame
        } else {
            frame.with_mask(mask)?
        };
        Ok(FusedImage::new(frame, defined))
    }
}
