//! Core types shared by the `burst-fusion-*` crates.
//!
//! This crate is intentionally small: immutable reference-counted frames with
//! an explicit valid-sampling extent, perspective transforms, and the sampling
//! primitives every later stage relies on. It does *not* know about bursts,
//! estimators or detectors.
//!
//! ## Coordinates
//! Pixel `(x, y)` has its center at integer coordinates `(x, y)`. Homographies
//! act on these pixel-center coordinates, so the identity transform maps every
//! pixel center onto itself.

#[cfg(feature = "image")]
mod convert;
mod frame;
mod homography;
mod logger;
mod luma;
mod metadata;

pub use frame::{Frame, FrameError, PixelFormat, Rect};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use luma::{sample_bilinear, LumaImage, LumaView};
pub use metadata::{CameraIntrinsics, CaptureMetadata};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
