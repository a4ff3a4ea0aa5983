//! Conversions from and to `image` crate buffers.

use crate::{Frame, FrameError, PixelFormat};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};

impl Frame {
    pub fn from_gray_image(img: &GrayImage) -> Result<Self, FrameError> {
        Self::new(
            img.width() as usize,
            img.height() as usize,
            PixelFormat::Gray8,
            img.as_raw().clone(),
        )
    }

    pub fn from_rgb_image(img: &RgbImage) -> Result<Self, FrameError> {
        Self::new(
            img.width() as usize,
            img.height() as usize,
            PixelFormat::Rgb8,
            img.as_raw().clone(),
        )
    }

    pub fn from_rgba_image(img: &RgbaImage) -> Result<Self, FrameError> {
        Self::new(
            img.width() as usize,
            img.height() as usize,
            PixelFormat::Rgba8,
            img.as_raw().clone(),
        )
    }

    /// Pick the closest frame layout for a decoded image.
    pub fn from_dynamic_image(img: &DynamicImage) -> Result<Self, FrameError> {
        match img {
            DynamicImage::ImageLuma8(g) => Self::from_gray_image(g),
            DynamicImage::ImageRgb8(c) => Self::from_rgb_image(c),
            other => Self::from_rgba_image(&other.to_rgba8()),
        }
    }

    /// Copy the pixels into an `image::DynamicImage`. `Bgra8` is swizzled to RGBA.
    pub fn to_dynamic_image(&self) -> Option<DynamicImage> {
        let w = u32::try_from(self.width()).ok()?;
        let h = u32::try_from(self.height()).ok()?;
        let data = self.data().to_vec();
        Some(match self.format() {
            PixelFormat::Gray8 => {
                DynamicImage::ImageLuma8(ImageBuffer::<Luma<u8>, _>::from_raw(w, h, data)?)
            }
            PixelFormat::Rgb8 => {
                DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, data)?)
            }
            PixelFormat::Rgba8 => {
                DynamicImage::ImageRgba8(ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, data)?)
            }
            PixelFormat::Bgra8 => {
                let mut rgba = data;
                for px in rgba.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                DynamicImage::ImageRgba8(ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, rgba)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_is_swizzled_on_export() {
        let f = Frame::filled(2, 1, PixelFormat::Bgra8, &[1, 2, 3, 4]).unwrap();
        let img = f.to_dynamic_image().unwrap().to_rgba8();
        assert_eq!(img.get_pixel(1, 0).0, [3, 2, 1, 4]);
    }

    #[test]
    fn gray_round_trip_keeps_layout() {
        let g = GrayImage::from_fn(3, 2, |x, y| Luma([(x + 10 * y) as u8]));
        let f = Frame::from_gray_image(&g).unwrap();
        assert_eq!(f.format(), PixelFormat::Gray8);
        assert_eq!(f.pixel(2, 1), &[12]);
    }
}
