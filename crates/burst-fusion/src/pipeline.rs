//! Worker thread that owns the burst state.
//!
//! The frame source calls [`BurstPipeline::submit`] from its own delivery
//! thread. Submission never blocks: frames go into a bounded queue and the
//! configured [`OverflowPolicy`] decides what to discard when it is full.
//! A single worker pops frames in arrival order and feeds them to its
//! [`BurstAccumulator`], so `on_frame` is never re-entered.

use crate::accumulator::{AbortReason, BurstAccumulator, BurstOutput, BurstSnapshot, FrameEvent};
use crate::config::{ConfigError, OverflowPolicy, PipelineConfig};
use crate::detector::panic_message;
use burst_fusion_core::{CaptureMetadata, Frame};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn burst worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("burst worker is not running")]
    Closed,
}

/// Callback invoked on the worker thread for every completed burst.
pub type OutputCallback = Box<dyn FnMut(&BurstOutput) + Send>;

/// Live counters, updated by the producer and the worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_submitted: AtomicU64,
    frames_processed: AtomicU64,
    queue_overflows: AtomicU64,
    frames_dropped: AtomicU64,
    bursts_completed: AtomicU64,
    bursts_aborted: AtomicU64,
    detector_failures: AtomicU64,
    callback_panics: AtomicU64,
    outputs_discarded: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCounters {
    pub frames_submitted: u64,
    pub frames_processed: u64,
    /// Frames discarded by the overflow policy.
    pub queue_overflows: u64,
    /// Frames that failed alignment.
    pub frames_dropped: u64,
    pub bursts_completed: u64,
    pub bursts_aborted: u64,
    /// Detector errors, panics included.
    pub detector_failures: u64,
    /// Output callbacks that panicked. The worker keeps running.
    pub callback_panics: u64,
    /// Outputs discarded because the output channel was full.
    pub outputs_discarded: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineCounters {
        PipelineCounters {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bursts_completed: self.bursts_completed.load(Ordering::Relaxed),
            bursts_aborted: self.bursts_aborted.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            outputs_discarded: self.outputs_discarded.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What happened to a submitted frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submitted {
    Queued,
    /// The queue was full and this frame was discarded.
    DroppedNewest,
    /// The frame was queued after evicting `evicted` older frames.
    Evicted { evicted: usize },
}

type Job = (Frame, CaptureMetadata);

/// Clears the running flag when the worker exits, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Worker {
    accumulator: BurstAccumulator,
    jobs: Receiver<Job>,
    outputs: Sender<BurstOutput>,
    callback: Option<OutputCallback>,
    stats: Arc<PipelineStats>,
    snapshot: Arc<Mutex<BurstSnapshot>>,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self, running: Arc<AtomicBool>) {
        let _guard = RunningGuard(running);
        log::info!("burst worker started");

        while let Ok((frame, metadata)) = self.jobs.recv() {
            if self.cancel.load(Ordering::Acquire) {
                break;
            }
            let event = self.accumulator.on_frame(frame, metadata);
            PipelineStats::bump(&self.stats.frames_processed);
            self.handle(event);
            *self.snapshot.lock() = self.accumulator.state().snapshot();
        }

        // Queued frames are drained by `BurstPipeline::stop`.
        self.accumulator.reset();
        *self.snapshot.lock() = self.accumulator.state().snapshot();
        log::info!("burst worker stopped");
    }

    fn handle(&mut self, event: FrameEvent) {
        match event {
            FrameEvent::Opened | FrameEvent::Aligned { .. } => {}
            FrameEvent::Dropped { .. } => PipelineStats::bump(&self.stats.frames_dropped),
            FrameEvent::Aborted { reason } => {
                if !matches!(reason, AbortReason::Fusion(_)) {
                    PipelineStats::bump(&self.stats.frames_dropped);
                }
                PipelineStats::bump(&self.stats.bursts_aborted);
            }
            FrameEvent::Fused(output) => {
                PipelineStats::bump(&self.stats.bursts_completed);
                if output.payloads.is_err() {
                    PipelineStats::bump(&self.stats.detector_failures);
                }
                if let Some(cb) = self.callback.as_mut() {
                    let called = panic::catch_unwind(AssertUnwindSafe(|| cb(&output)));
                    if let Err(payload) = called {
                        PipelineStats::bump(&self.stats.callback_panics);
                        log::error!("output callback panicked: {}", panic_message(&*payload));
                    }
                }
                match self.outputs.try_send(*output) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(_)) => {
                        PipelineStats::bump(&self.stats.outputs_discarded);
                        log::debug!("output channel full, burst output discarded");
                    }
                }
            }
        }
    }
}

/// Bounded-queue front end for a [`BurstAccumulator`] running on its own
/// thread.
///
/// Dropping the pipeline stops the worker after it drains the queue; use
/// [`BurstPipeline::abandon`] to discard queued frames instead.
pub struct BurstPipeline {
    jobs: Option<Sender<Job>>,
    /// Receiver side of the job queue, used to evict the oldest frame.
    evict: Receiver<Job>,
    outputs: Receiver<BurstOutput>,
    overflow: OverflowPolicy,
    stats: Arc<PipelineStats>,
    snapshot: Arc<Mutex<BurstSnapshot>>,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl BurstPipeline {
    /// Start a worker for `accumulator` using the queue settings of `config`.
    pub fn spawn(
        accumulator: BurstAccumulator,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Self::start(accumulator, config, None)
    }

    /// Like [`BurstPipeline::spawn`], also calling `callback` on the worker
    /// thread for every completed burst.
    pub fn spawn_with_callback(
        accumulator: BurstAccumulator,
        config: &PipelineConfig,
        callback: impl FnMut(&BurstOutput) + Send + 'static,
    ) -> Result<Self, PipelineError> {
        Self::start(accumulator, config, Some(Box::new(callback)))
    }

    fn start(
        accumulator: BurstAccumulator,
        config: &PipelineConfig,
        callback: Option<OutputCallback>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(config.queue_depth);
        let (out_tx, out_rx) = crossbeam_channel::bounded::<BurstOutput>(config.output_depth);
        let stats = Arc::new(PipelineStats::default());
        let snapshot = Arc::new(Mutex::new(accumulator.state().snapshot()));
        let running = Arc::new(AtomicBool::new(true));
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            accumulator,
            jobs: job_rx.clone(),
            outputs: out_tx,
            callback,
            stats: Arc::clone(&stats),
            snapshot: Arc::clone(&snapshot),
            cancel: Arc::clone(&cancel),
        };
        let running_worker = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("burst-worker".to_string())
            .spawn(move || worker.run(running_worker))?;

        Ok(Self {
            jobs: Some(job_tx),
            evict: job_rx,
            outputs: out_rx,
            overflow: config.overflow,
            stats,
            snapshot,
            running,
            cancel,
            worker: Some(handle),
        })
    }

    /// Enqueue a frame without blocking.
    pub fn submit(
        &self,
        frame: Frame,
        metadata: CaptureMetadata,
    ) -> Result<Submitted, PipelineError> {
        let Some(jobs) = self.jobs.as_ref() else {
            return Err(PipelineError::Closed);
        };
        if !self.running.load(Ordering::Acquire) {
            return Err(PipelineError::Closed);
        }
        PipelineStats::bump(&self.stats.frames_submitted);

        let mut job = (frame, metadata);
        let mut evicted = 0;
        let attempts = jobs.capacity().unwrap_or(1) + 1;
        for _ in 0..attempts {
            match jobs.try_send(job) {
                Ok(()) if evicted == 0 => return Ok(Submitted::Queued),
                Ok(()) => return Ok(Submitted::Evicted { evicted }),
                Err(TrySendError::Disconnected(_)) => return Err(PipelineError::Closed),
                Err(TrySendError::Full(back)) => {
                    job = back;
                    if self.overflow == OverflowPolicy::DropNewest {
                        break;
                    }
                    // The worker may have taken the oldest frame already.
                    if self.evict.try_recv().is_ok() {
                        evicted += 1;
                        self.record_overflow();
                    }
                }
            }
        }
        self.record_overflow();
        Ok(Submitted::DroppedNewest)
    }

    fn record_overflow(&self) {
        PipelineStats::bump(&self.stats.queue_overflows);
        let total = self.stats.queue_overflows.load(Ordering::Relaxed);
        log::debug!("frame queue full, dropped a frame ({total} so far)");
    }

    /// Completed bursts, in order. Bounded by `output_depth`.
    pub fn outputs(&self) -> &Receiver<BurstOutput> {
        &self.outputs
    }

    pub fn stats(&self) -> PipelineCounters {
        self.stats.snapshot()
    }

    /// State of the burst as of the last processed frame.
    pub fn snapshot(&self) -> BurstSnapshot {
        *self.snapshot.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting frames, let the worker finish the queued ones, and
    /// wait for it.
    pub fn shutdown(mut self) -> PipelineCounters {
        self.stop();
        self.stats.snapshot()
    }

    /// Stop the worker without processing the queued frames.
    pub fn abandon(mut self) -> PipelineCounters {
        self.cancel.store(true, Ordering::Release);
        self.stop();
        self.stats.snapshot()
    }

    fn stop(&mut self) {
        // Dropping the last sender disconnects the queue once it is drained.
        self.jobs = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::warn!("burst worker panicked");
            }
        }
        // Abandoned frames left in the queue.
        while self.evict.try_recv().is_ok() {}
    }
}

impl Drop for BurstPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
