//! High-level facade crate for the `burst-fusion-*` workspace.
//!
//! This crate provides:
//! - re-exports of the alignment, fusion and core crates
//! - the [`BurstAccumulator`] state machine that collects an aligned burst
//!   around a reference frame, fuses it and hands the result to a
//!   [`SymbolDetector`]
//! - [`BurstPipeline`], a bounded-queue worker that runs the accumulator off
//!   the capture thread
//!
//! ## Quickstart
//!
//! ```no_run
//! use burst_fusion::{
//!     BurstAccumulator, BurstPipeline, CaptureMetadata, Frame, PipelineConfig, PixelFormat,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = PipelineConfig::default();
//! let accumulator = BurstAccumulator::new(&cfg)?;
//! let pipeline = BurstPipeline::spawn(accumulator, &cfg)?;
//!
//! for seq in 0..6 {
//!     let frame = Frame::filled(640, 480, PixelFormat::Bgra8, &[40, 40, 40, 255])?;
//!     pipeline.submit(frame, CaptureMetadata::new(seq))?;
//! }
//! let output = pipeline.outputs().recv()?;
//! println!("fused {}x{}", output.fused.width(), output.fused.height());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `burst_fusion::core`: frames, extents, homographies, capture metadata.
//! - `burst_fusion::align`: feature based homography estimation and warping.
//! - `burst_fusion::median`: per-pixel temporal median fusion.
//! - [`BurstAccumulator`] / [`BurstPipeline`]: burst lifecycle.
//! - [`SymbolDetector`]: contract for the decoder that consumes fused images.

pub use burst_fusion_align as align;
pub use burst_fusion_core as core;
pub use burst_fusion_median as median;

mod accumulator;
mod config;
mod detector;
mod pipeline;

pub use accumulator::{
    AbortReason, AlignFailure, BurstAccumulator, BurstOutput, BurstPhase, BurstSnapshot,
    BurstState, BurstStats, FrameEvent,
};
pub use config::{ConfigError, FailurePolicy, OverflowPolicy, PipelineConfig};
pub use detector::{DetectionResult, DetectorError, NoopDetector, SymbolDetector, Symbology};
pub use pipeline::{
    BurstPipeline, OutputCallback, PipelineCounters, PipelineError, PipelineStats, Submitted,
};

pub use burst_fusion_core::{CameraIntrinsics, CaptureMetadata, Frame, Homography, PixelFormat, Rect};
pub use burst_fusion_median::{FusedImage, UndefinedPixel};
