//! Immutable, reference-counted pixel buffers.

use crate::luma::LumaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Interleaved 8-bit pixel layouts understood by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
    /// Camera-native byte order (blue, green, red, alpha).
    Bgra8,
}

impl PixelFormat {
    /// Number of interleaved channels per pixel.
    #[inline]
    pub const fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }

    /// Rec.601 luma of one pixel, in `0.0..=255.0`.
    #[inline]
    pub fn luma(self, px: &[u8]) -> f32 {
        match self {
            PixelFormat::Gray8 => px[0] as f32,
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
                0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
            }
            PixelFormat::Bgra8 => 0.299 * px[2] as f32 + 0.587 * px[1] as f32 + 0.114 * px[0] as f32,
        }
    }
}

/// Axis-aligned integer rectangle in pixel units.
///
/// `x..x + width` and `y..y + height` are the covered pixel indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole `width x height` buffer.
    pub const fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive right edge.
    #[inline]
    pub const fn right(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[inline]
    pub const fn bottom(&self) -> usize {
        self.y + self.height
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub const fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    /// Whether a continuous pixel-center coordinate lies inside the span of
    /// covered pixel centers, with `tol` pixels of slack on every side.
    #[inline]
    pub fn contains_point(&self, x: f64, y: f64, tol: f64) -> bool {
        if self.is_empty() || !x.is_finite() || !y.is_finite() {
            return false;
        }
        let x0 = self.x as f64 - tol;
        let y0 = self.y as f64 - tol;
        let x1 = (self.right() - 1) as f64 + tol;
        let y1 = (self.bottom() - 1) as f64 + tol;
        x >= x0 && x <= x1 && y >= y0 && y <= y1
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        (r > x && b > y).then(|| Rect::new(x, y, r - x, b - y))
    }
}

/// Errors produced while building a [`Frame`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid frame dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },

    #[error("invalid pixel buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer { expected: usize, got: usize },

    #[error("row stride {stride} is shorter than a {row_bytes}-byte row")]
    InvalidStride { stride: usize, row_bytes: usize },

    #[error("invalid validity mask length (expected {expected} entries, got {got})")]
    InvalidMask { expected: usize, got: usize },

    #[error("extent {extent:?} does not fit a {width}x{height} frame")]
    ExtentOutOfBounds {
        extent: Rect,
        width: usize,
        height: usize,
    },
}

#[derive(Clone)]
struct FrameBuffer {
    width: usize,
    height: usize,
    format: PixelFormat,
    extent: Rect,
    data: Vec<u8>,
    /// One entry per pixel, `0` marks an undefined sample.
    mask: Option<Vec<u8>>,
}

/// Immutable 2D pixel buffer shared between pipeline stages.
///
/// Cloning a `Frame` is cheap: it bumps a reference count. The pixel data is
/// released when the last clone is dropped.
#[derive(Clone)]
pub struct Frame {
    buf: Arc<FrameBuffer>,
}

impl Frame {
    /// Wrap an interleaved, tightly packed pixel buffer.
    pub fn new(
        width: usize,
        height: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions { width, height });
        }
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(format.channels()))
            .ok_or(FrameError::InvalidDimensions { width, height })?;
        if data.len() != expected {
            return Err(FrameError::InvalidBuffer {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            buf: Arc::new(FrameBuffer {
                width,
                height,
                format,
                extent: Rect::full(width, height),
                data,
                mask: None,
            }),
        })
    }

    /// Copy a buffer whose rows are `stride` bytes apart, as camera drivers
    /// deliver them. Padding past `width` pixels on each row is skipped and
    /// the last row may end without it.
    pub fn from_strided(
        width: usize,
        height: usize,
        format: PixelFormat,
        stride: usize,
        data: &[u8],
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions { width, height });
        }
        let row_bytes = width
            .checked_mul(format.channels())
            .ok_or(FrameError::InvalidDimensions { width, height })?;
        if stride < row_bytes {
            return Err(FrameError::InvalidStride { stride, row_bytes });
        }
        let expected = stride
            .checked_mul(height - 1)
            .and_then(|n| n.checked_add(row_bytes))
            .ok_or(FrameError::InvalidDimensions { width, height })?;
        if data.len() < expected {
            return Err(FrameError::InvalidBuffer {
                expected,
                got: data.len(),
            });
        }
        let mut packed = Vec::with_capacity(row_bytes * height);
        for row in data.chunks(stride).take(height) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        Self::new(width, height, format, packed)
    }

    /// A frame where every pixel has the value `pixel`.
    pub fn filled(
        width: usize,
        height: usize,
        format: PixelFormat,
        pixel: &[u8],
    ) -> Result<Self, FrameError> {
        let ch = format.channels();
        if pixel.len() != ch {
            return Err(FrameError::InvalidBuffer {
                expected: ch,
                got: pixel.len(),
            });
        }
        let data = pixel.repeat(width.saturating_mul(height));
        Self::new(width, height, format, data)
    }

    /// Build a frame by evaluating `f(x, y, pixel)` for every pixel.
    pub fn from_fn(
        width: usize,
        height: usize,
        format: PixelFormat,
        mut f: impl FnMut(usize, usize, &mut [u8]),
    ) -> Result<Self, FrameError> {
        let ch = format.channels();
        let mut data = vec![0u8; width.saturating_mul(height).saturating_mul(ch)];
        for (i, px) in data.chunks_exact_mut(ch).enumerate() {
            f(i % width, i / width, px);
        }
        Self::new(width, height, format, data)
    }

    /// Restrict the valid sampling region.
    pub fn with_extent(mut self, extent: Rect) -> Result<Self, FrameError> {
        if extent.is_empty() || extent.right() > self.width() || extent.bottom() > self.height() {
            return Err(FrameError::ExtentOutOfBounds {
                extent,
                width: self.width(),
                height: self.height(),
            });
        }
        Arc::make_mut(&mut self.buf).extent = extent;
        Ok(self)
    }

    /// Attach a per-pixel validity mask (`0` = undefined).
    pub fn with_mask(mut self, mask: Vec<u8>) -> Result<Self, FrameError> {
        let expected = self.width() * self.height();
        if mask.len() != expected {
            return Err(FrameError::InvalidMask {
                expected,
                got: mask.len(),
            });
        }
        Arc::make_mut(&mut self.buf).mask = Some(mask);
        Ok(self)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.buf.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.buf.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.buf.format
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.buf.format.channels()
    }

    /// Valid sampling region. Defaults to the whole buffer.
    #[inline]
    pub fn extent(&self) -> Rect {
        self.buf.extent
    }

    /// Bytes per row.
    #[inline]
    pub fn stride(&self) -> usize {
        self.buf.width * self.channels()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buf.data
    }

    #[inline]
    pub fn mask(&self) -> Option<&[u8]> {
        self.buf.mask.as_deref()
    }

    /// Channel values of pixel `(x, y)`.
    ///
    /// # Panics
    /// Panics if `(x, y)` lies outside the buffer.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &[u8] {
        let ch = self.channels();
        let i = (y * self.buf.width + x) * ch;
        &self.buf.data[i..i + ch]
    }

    /// Whether pixel `(x, y)` holds a defined sample: inside the extent and
    /// not masked out.
    #[inline]
    pub fn is_defined(&self, x: usize, y: usize) -> bool {
        if !self.buf.extent.contains(x, y) {
            return false;
        }
        match &self.buf.mask {
            Some(m) => m[y * self.buf.width + x] != 0,
            None => true,
        }
    }

    /// Number of defined pixels.
    pub fn defined_count(&self) -> usize {
        let e = self.buf.extent;
        match &self.buf.mask {
            None => e.area(),
            Some(m) => (e.y..e.bottom())
                .map(|y| {
                    let row = &m[y * self.buf.width + e.x..y * self.buf.width + e.right()];
                    row.iter().filter(|&&v| v != 0).count()
                })
                .sum(),
        }
    }

    /// Whether both handles point at the same buffer.
    #[inline]
    pub fn ptr_eq(a: &Frame, b: &Frame) -> bool {
        Arc::ptr_eq(&a.buf, &b.buf)
    }

    /// Luma plane of the whole buffer.
    pub fn to_luma(&self) -> LumaImage {
        self.luma_in(Rect::full(self.width(), self.height()))
    }

    /// Luma plane of `region`, clipped to the buffer. Pixel `(0, 0)` of the
    /// result is pixel `(region.x, region.y)` of the frame.
    pub fn luma_in(&self, region: Rect) -> LumaImage {
        let r = region
            .intersect(&Rect::full(self.width(), self.height()))
            .unwrap_or(Rect::new(0, 0, 0, 0));
        let fmt = self.format();
        let ch = self.channels();
        let stride = self.stride();
        let mut data = Vec::with_capacity(r.area());
        for y in r.y..r.bottom() {
            let row = &self.data()[y * stride + r.x * ch..y * stride + r.right() * ch];
            data.extend(row.chunks_exact(ch).map(|px| fmt.luma(px)));
        }
        LumaImage {
            width: r.width,
            height: r.height,
            data,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.buf.width)
            .field("height", &self.buf.height)
            .field("format", &self.buf.format)
            .field("extent", &self.buf.extent)
            .field("masked", &self.buf.mask.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_buffers() {
        assert_eq!(
            Frame::new(0, 4, PixelFormat::Gray8, vec![]).unwrap_err(),
            FrameError::InvalidDimensions {
                width: 0,
                height: 4
            }
        );
        assert_eq!(
            Frame::new(2, 2, PixelFormat::Rgba8, vec![0; 15]).unwrap_err(),
            FrameError::InvalidBuffer {
                expected: 16,
                got: 15
            }
        );
        let f = Frame::filled(4, 4, PixelFormat::Gray8, &[1]).unwrap();
        assert!(matches!(
            f.clone().with_mask(vec![1; 3]),
            Err(FrameError::InvalidMask { .. })
        ));
        assert!(matches!(
            f.with_extent(Rect::new(2, 2, 3, 1)),
            Err(FrameError::ExtentOutOfBounds { .. })
        ));
    }

    #[test]
    fn strided_rows_drop_their_padding() {
        // 2x3 BGRA, 8-byte rows padded to 12 bytes, last row unpadded.
        let mut data = Vec::new();
        for y in 0..3u8 {
            for x in 0..2u8 {
                data.extend_from_slice(&[x, y, 10 * y + x, 255]);
            }
            if y < 2 {
                data.extend_from_slice(&[0xEE; 4]);
            }
        }
        assert_eq!(data.len(), 32);
        assert_eq!(
            Frame::from_strided(2, 3, PixelFormat::Bgra8, 16, &data).unwrap_err(),
            FrameError::InvalidBuffer {
                expected: 40,
                got: 32
            }
        );

        let f = Frame::from_strided(2, 3, PixelFormat::Bgra8, 12, &data).unwrap();
        assert_eq!(f.stride(), 8);
        assert_eq!(f.data().len(), 24);
        assert_eq!(f.pixel(1, 2), &[1, 2, 21, 255]);
        assert!(!f.data().contains(&0xEE));

        assert_eq!(
            Frame::from_strided(2, 3, PixelFormat::Bgra8, 6, &data).unwrap_err(),
            FrameError::InvalidStride {
                stride: 6,
                row_bytes: 8
            }
        );
    }

    #[test]
    fn extent_and_mask_define_samples() {
        let mut mask = vec![255u8; 16];
        mask[5] = 0; // (1, 1)
        let f = Frame::filled(4, 4, PixelFormat::Gray8, &[9])
            .unwrap()
            .with_extent(Rect::new(1, 0, 3, 4))
            .unwrap()
            .with_mask(mask)
            .unwrap();

        assert!(!f.is_defined(0, 0));
        assert!(!f.is_defined(1, 1));
        assert!(f.is_defined(2, 1));
        assert_eq!(f.defined_count(), 11);
    }

    #[test]
    fn clones_share_the_buffer() {
        let a = Frame::filled(3, 2, PixelFormat::Rgb8, &[1, 2, 3]).unwrap();
        let b = a.clone();
        assert!(Frame::ptr_eq(&a, &b));
        assert_eq!(b.pixel(2, 1), &[1, 2, 3]);
        assert_eq!(b.stride(), 9);
    }

    #[test]
    fn luma_in_crops_to_the_region() {
        let f = Frame::from_fn(5, 4, PixelFormat::Gray8, |x, y, px| {
            px[0] = (10 * y + x) as u8;
        })
        .unwrap();
        let crop = f.luma_in(Rect::new(1, 2, 3, 2));
        assert_eq!((crop.width, crop.height), (3, 2));
        assert_eq!(crop.data, vec![21.0, 22.0, 23.0, 31.0, 32.0, 33.0]);

        // Clipped at the buffer edge.
        let edge = f.luma_in(Rect::new(3, 3, 10, 10));
        assert_eq!((edge.width, edge.height), (2, 1));
        assert_eq!(f.to_luma().data.len(), 20);
    }

    #[test]
    fn bgra_luma_uses_red_from_third_byte() {
        let rgba = PixelFormat::Rgba8.luma(&[200, 10, 20, 255]);
        let bgra = PixelFormat::Bgra8.luma(&[20, 10, 200, 255]);
        assert!((rgba - bgra).abs() < 1e-4);
    }

    #[test]
    fn rect_point_containment_uses_pixel_centres() {
        let r = Rect::full(4, 3);
        assert!(r.contains_point(0.0, 0.0, 0.0));
        assert!(r.contains_point(3.0, 2.0, 0.0));
        assert!(!r.contains_point(3.2, 2.0, 0.0));
        assert!(r.contains_point(3.2, 2.0, 0.25));
        assert!(!r.contains_point(f64::NAN, 1.0, 1.0));
        assert_eq!(
            r.intersect(&Rect::new(2, 1, 5, 5)),
            Some(Rect::new(2, 1, 2, 2))
        );
        assert_eq!(r.intersect(&Rect::new(4, 0, 1, 1)), None);
    }
}
