//! Temporal median fusion of an aligned burst.
//!
//! For every output pixel and channel, [`CpuMedianFusion`] collects the
//! defined samples of the reference frame and every aligned frame and emits
//! their median. Samples marked undefined by the warp (outside the source
//! extent or masked) are absent data, not zeros. Pixels without a single
//! defined sample receive the configured [`UndefinedPixel`] and are cleared
//! in the fused mask.
//!
//! With an even number of samples the two central values are averaged and
//! rounded half up: `(a + b + 1) / 2`.

mod fused;
mod median;

pub use fused::{FusedImage, UndefinedPixel};
pub use median::{median_u8, CpuMedianFusion, FusionError, MedianFusion};
