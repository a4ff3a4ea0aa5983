//! Burst lifecycle: reference selection, alignment, fusion and detection.
//!
//! ```text
//! Idle --frame--> Collecting(0) --aligned--> Collecting(k) --k == N--> Ready
//!   ^                  |  failure (abort / budget spent)               |
//!   +------------------+-------------------- fuse + detect ------------+
//! ```
//!
//! [`BurstAccumulator::on_frame`] drives one transition per frame. `Ready`
//! is never observable from outside: fusion and detection run in the same
//! call that aligned the last frame, and the state is back to `Idle` before
//! it returns.

use crate::config::{ConfigError, FailurePolicy, PipelineConfig};
use crate::detector::{
    detect_guarded, DetectionResult, DetectorError, NoopDetector, SymbolDetector, Symbology,
};
use burst_fusion_align::{
    CpuWarpEngine, EstimationFailure, FeatureHomographyEstimator, HomographyEstimator,
    WarpEngine, WarpFailure,
};
use burst_fusion_core::{CaptureMetadata, Frame};
use burst_fusion_median::{CpuMedianFusion, FusedImage, FusionError, MedianFusion};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "collected", rename_all = "snake_case")]
pub enum BurstPhase {
    Idle,
    /// Reference set, `k` aligned frames collected.
    Collecting(usize),
    /// All aligned frames collected, fusion pending.
    Ready,
}

/// Why a frame could not join the burst.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AlignFailure {
    #[error(transparent)]
    Estimation(#[from] EstimationFailure),
    #[error(transparent)]
    Warp(#[from] WarpFailure),
}

/// Why an open burst was discarded.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AbortReason {
    #[error("alignment failed: {0}")]
    Align(AlignFailure),
    #[error("{drops} frames dropped, drop budget exhausted")]
    DropBudgetExhausted { drops: usize },
    #[error("fusion failed: {0}")]
    Fusion(FusionError),
}

/// State of the open burst. Single owner, mutated only by
/// [`BurstAccumulator::on_frame`].
///
/// `reference` is set exactly while a burst is open and
/// `accumulated.len() <= target_count` always holds.
#[derive(Debug)]
pub struct BurstState {
    reference: Option<Frame>,
    reference_sequence: u64,
    accumulated: Vec<Frame>,
    target_count: usize,
    seen: usize,
    dropped: usize,
}

/// Copyable view of [`BurstState`] for observers on other threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstSnapshot {
    pub phase: BurstPhase,
    pub accumulated: usize,
    pub target_count: usize,
}

impl BurstState {
    pub fn new(target_count: usize) -> Self {
        Self {
            reference: None,
            reference_sequence: 0,
            accumulated: Vec::with_capacity(target_count),
            target_count,
            seen: 0,
            dropped: 0,
        }
    }

    pub fn phase(&self) -> BurstPhase {
        match self.reference {
            None => BurstPhase::Idle,
            Some(_) if self.accumulated.len() >= self.target_count => BurstPhase::Ready,
            Some(_) => BurstPhase::Collecting(self.accumulated.len()),
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.reference.is_some()
    }

    pub fn reference(&self) -> Option<&Frame> {
        self.reference.as_ref()
    }

    pub fn accumulated(&self) -> &[Frame] {
        &self.accumulated
    }

    #[inline]
    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn snapshot(&self) -> BurstSnapshot {
        BurstSnapshot {
            phase: self.phase(),
            accumulated: self.accumulated.len(),
            target_count: self.target_count,
        }
    }

    fn open(&mut self, reference: Frame, sequence: u64) {
        self.clear();
        self.reference = Some(reference);
        self.reference_sequence = sequence;
        self.seen = 1;
    }

    /// Back to `Idle`, releasing every frame held by the burst.
    fn clear(&mut self) {
        self.reference = None;
        self.accumulated.clear();
        self.seen = 0;
        self.dropped = 0;
    }
}

/// Per-burst counters reported with each fused image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BurstStats {
    pub reference_sequence: u64,
    /// Sequence number of the frame that completed the burst.
    pub trigger_sequence: u64,
    /// Frames offered to this burst, reference included.
    pub frames_seen: usize,
    pub frames_aligned: usize,
    pub frames_dropped: usize,
    /// Fraction of fused pixels with at least one defined sample.
    pub defined_ratio: f64,
}

/// Everything produced by one completed burst.
#[derive(Clone, Debug)]
pub struct BurstOutput {
    pub fused: FusedImage,
    pub payloads: Result<DetectionResult, DetectorError>,
    pub stats: BurstStats,
    /// Capture metadata of the frame that completed the burst.
    pub metadata: CaptureMetadata,
}

/// Result of feeding one frame to the accumulator.
#[derive(Debug)]
pub enum FrameEvent {
    /// The frame became the reference of a new burst.
    Opened,
    /// The frame was aligned and appended; `collected` frames so far.
    Aligned { collected: usize },
    /// The frame was skipped; the burst stays open.
    Dropped { error: AlignFailure },
    /// The burst was discarded and the accumulator is idle.
    Aborted { reason: AbortReason },
    /// The burst completed.
    Fused(Box<BurstOutput>),
}

/// Drives [`BurstState`] with pluggable estimation, warp, fusion and
/// detection stages.
pub struct BurstAccumulator {
    state: BurstState,
    policy: FailurePolicy,
    symbologies: Vec<Symbology>,
    estimator: Box<dyn HomographyEstimator>,
    warp: Box<dyn WarpEngine>,
    fusion: Box<dyn MedianFusion>,
    detector: Box<dyn SymbolDetector>,
}

impl BurstAccumulator {
    /// Accumulator with the CPU stages configured from `config` and a
    /// [`NoopDetector`].
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: BurstState::new(config.target_count),
            policy: config.failure_policy,
            symbologies: config.symbologies.clone(),
            estimator: Box::new(FeatureHomographyEstimator::new(config.estimator.clone())),
            warp: Box::new(CpuWarpEngine {
                parallel: config.parallel,
            }),
            fusion: Box::new(
                CpuMedianFusion::new(config.undefined_pixel).with_parallel(config.parallel),
            ),
            detector: Box::new(NoopDetector),
        })
    }

    pub fn with_estimator(mut self, estimator: impl HomographyEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    pub fn with_warp_engine(mut self, warp: impl WarpEngine + 'static) -> Self {
        self.warp = Box::new(warp);
        self
    }

    pub fn with_fusion(mut self, fusion: impl MedianFusion + 'static) -> Self {
        self.fusion = Box::new(fusion);
        self
    }

    pub fn with_detector(mut self, detector: impl SymbolDetector + 'static) -> Self {
        self.detector = Box::new(detector);
        self
    }

    pub fn state(&self) -> &BurstState {
        &self.state
    }

    pub fn phase(&self) -> BurstPhase {
        self.state.phase()
    }

    /// Discard the open burst, if any.
    pub fn reset(&mut self) {
        if self.state.is_open() {
            log::debug!("burst discarded by reset");
        }
        self.state.clear();
    }

    /// Advance the state machine by one frame.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(sequence = metadata.sequence))
    )]
    pub fn on_frame(&mut self, frame: Frame, metadata: CaptureMetadata) -> FrameEvent {
        let Some(reference) = self.state.reference.clone() else {
            log::info!(
                "burst opened on frame {} ({}x{} {:?})",
                metadata.sequence,
                frame.width(),
                frame.height(),
                frame.format()
            );
            self.state.open(frame, metadata.sequence);
            return FrameEvent::Opened;
        };

        self.state.seen += 1;
        match self.align(&frame, &reference) {
            Err(error) => self.on_align_failure(error, metadata.sequence),
            Ok(warped) => {
                self.state.accumulated.push(warped);
                let collected = self.state.accumulated.len();
                log::debug!(
                    "frame {} aligned ({collected}/{})",
                    metadata.sequence,
                    self.state.target_count
                );
                if collected < self.state.target_count {
                    FrameEvent::Aligned { collected }
                } else {
                    self.fuse(reference, metadata)
                }
            }
        }
    }

    fn align(&self, frame: &Frame, reference: &Frame) -> Result<Frame, AlignFailure> {
        let ref_from_target = self.estimator.estimate(frame, reference)?;
        let src_from_out = ref_from_target
            .inverse()
            .ok_or(WarpFailure::SingularTransform)?;
        Ok(self.warp.warp(frame, &src_from_out, reference.extent())?)
    }

    fn on_align_failure(&mut self, error: AlignFailure, sequence: u64) -> FrameEvent {
        match self.policy {
            FailurePolicy::DropFrame { max_drops } => {
                self.state.dropped += 1;
                let drops = self.state.dropped;
                if drops > max_drops {
                    log::warn!("burst aborted: {drops} frames dropped (last: {error})");
                    self.state.clear();
                    FrameEvent::Aborted {
                        reason: AbortReason::DropBudgetExhausted { drops },
                    }
                } else {
                    log::debug!("frame {sequence} dropped: {error}");
                    FrameEvent::Dropped { error }
                }
            }
            FailurePolicy::AbortBurst => {
                log::warn!("burst aborted on frame {sequence}: {error}");
                self.state.clear();
                FrameEvent::Aborted {
                    reason: AbortReason::Align(error),
                }
            }
        }
    }

    fn fuse(&mut self, reference: Frame, metadata: CaptureMetadata) -> FrameEvent {
        let accumulated = std::mem::take(&mut self.state.accumulated);
        let mut stats = BurstStats {
            reference_sequence: self.state.reference_sequence,
            trigger_sequence: metadata.sequence,
            frames_seen: self.state.seen,
            frames_aligned: accumulated.len(),
            frames_dropped: self.state.dropped,
            defined_ratio: 0.0,
        };

        let fused = self.fusion.fuse(&reference, &accumulated);
        drop(accumulated);
        drop(reference);
        self.state.clear();

        let fused = match fused {
            Ok(fused) => fused,
            Err(e) => {
                log::warn!("burst aborted: fusion failed: {e}");
                return FrameEvent::Aborted {
                    reason: AbortReason::Fusion(e),
                };
            }
        };
        stats.defined_ratio = fused.defined_ratio();

        let payloads = detect_guarded(
            self.detector.as_mut(),
            &fused,
            metadata.intrinsics.as_ref(),
            &self.symbologies,
        );
        match &payloads {
            Ok(found) => log::info!(
                "burst fused: {} frames, {:.1}% defined, {} payloads",
                stats.frames_aligned + 1,
                stats.defined_ratio * 100.0,
                found.len()
            ),
            Err(e) => log::warn!("burst fused but {e}"),
        }

        FrameEvent::Fused(Box::new(BurstOutput {
            fused,
            payloads,
            stats,
            metadata,
        }))
    }
}
