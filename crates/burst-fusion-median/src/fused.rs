use burst_fusion_core::{Frame, PixelFormat};
use serde::{Deserialize, Serialize};

/// Fill value for pixels that received no defined sample.
///
/// Channels are taken in the frame's byte order; extra entries are ignored.
/// The all-zero default makes such pixels transparent black in RGBA/BGRA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UndefinedPixel(pub [u8; 4]);

impl UndefinedPixel {
    /// The first `format.channels()` bytes.
    pub fn for_format(&self, format: PixelFormat) -> &[u8] {
        &self.0[..format.channels()]
    }
}

/// Result of fusing one burst.
///
/// Same dimensions as the reference extent. Pixels without any defined
/// sample hold the [`UndefinedPixel`] value and are cleared in the mask.
#[derive(Clone, Debug)]
pub struct FusedImage {
    frame: Frame,
    defined_pixels: usize,
}

impl FusedImage {
    pub(crate) fn new(frame: Frame, defined_pixels: usize) -> Self {
        Self {
            frame,
            defined_pixels,
        }
    }

    #[inline]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.frame.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.frame.format()
    }

    /// Number of pixels with at least one defined sample.
    #[inline]
    pub fn defined_pixels(&self) -> usize {
        self.defined_pixels
    }

    /// Fraction of pixels with at least one defined sample, in `0.0..=1.0`.
    pub fn defined_ratio(&self) -> f64 {
        let total = self.width() * self.height();
        if total == 0 {
            0.0
        } else {
            self.defined_pixels as f64 / total as f64
        }
    }

    #[cfg(feature = "image")]
    pub fn to_dynamic_image(&self) -> Option<image::DynamicImage> {
        self.frame.to_dynamic_image()
    }
}
