use burst_fusion::align::{EstimationFailure, HomographyEstimator};
use burst_fusion::{
    AbortReason, AlignFailure, BurstAccumulator, BurstPhase, CameraIntrinsics, CaptureMetadata,
    DetectionResult, DetectorError, FailurePolicy, Frame, FrameEvent, FusedImage, Homography,
    PipelineConfig, PixelFormat, Symbology,
};
use std::sync::{Arc, Mutex};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn hash(x: i32, y: i32) -> u8 {
    let mut h = (x as u32).wrapping_mul(0x9E37_79B1) ^ (y as u32).wrapping_mul(0x85EB_CA77);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^= h >> 12;
    (h & 0xff) as u8
}

/// BGRA scene of 4x4 blocks, content moved by `(dx, dy)`.
fn scene(dx: i32, dy: i32) -> Frame {
    Frame::from_fn(160, 120, PixelFormat::Bgra8, |x, y, px| {
        let bx = (x as i32 - dx).div_euclid(4);
        let by = (y as i32 - dy).div_euclid(4);
        px.copy_from_slice(&[hash(bx, by), hash(by, bx), hash(bx + 7, by), 255]);
    })
    .expect("valid frame")
}

/// Treats every frame as already registered.
struct StaticCamera;

impl HomographyEstimator for StaticCamera {
    fn estimate(&self, _: &Frame, _: &Frame) -> Result<Homography, EstimationFailure> {
        Ok(Homography::identity())
    }
}

fn mad(a: &Frame, b: &Frame) -> f64 {
    let sum: f64 = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&p, &q)| (p as f64 - q as f64).abs())
        .sum();
    sum / a.data().len() as f64
}

#[test]
fn identical_burst_fuses_to_the_input_and_reaches_the_detector() {
    init_logging();
    let calls: Arc<Mutex<Vec<(Option<CameraIntrinsics>, Vec<Symbology>)>>> = Arc::default();
    let seen = Arc::clone(&calls);
    let detector = move |img: &FusedImage,
                         intrinsics: Option<&CameraIntrinsics>,
                         symbologies: &[Symbology]|
          -> Result<DetectionResult, DetectorError> {
        assert_eq!(img.frame().pixel(10, 10), &[40, 80, 120, 255]);
        seen.lock()
            .unwrap()
            .push((intrinsics.copied(), symbologies.to_vec()));
        Ok(DetectionResult::new(vec!["BURST-01".to_string()]))
    };

    let cfg = PipelineConfig::default();
    assert_eq!(cfg.target_count, 5);
    let mut acc = BurstAccumulator::new(&cfg).unwrap().with_detector(detector);
    let intrinsics = CameraIntrinsics {
        fx: 1400.0,
        fy: 1400.0,
        cx: 320.0,
        cy: 240.0,
    };

    let mut outputs = Vec::new();
    for seq in 0..6u64 {
        let frame = Frame::filled(64, 48, PixelFormat::Bgra8, &[40, 80, 120, 255]).unwrap();
        let meta = CaptureMetadata::new(seq).with_intrinsics(intrinsics);
        if let FrameEvent::Fused(out) = acc.on_frame(frame, meta) {
            outputs.push(out);
        }
    }

    assert_eq!(outputs.len(), 1);
    let out = &outputs[0];
    assert_eq!(out.stats.reference_sequence, 0);
    assert_eq!(out.stats.trigger_sequence, 5);
    assert_eq!(out.stats.frames_aligned, 5);
    assert_eq!(out.stats.defined_ratio, 1.0);
    assert_eq!(out.payloads, Ok(DetectionResult::new(vec!["BURST-01".into()])));
    assert!(out
        .fused
        .frame()
        .data()
        .chunks_exact(4)
        .all(|px| px == [40, 80, 120, 255]));
    assert_eq!(acc.phase(), BurstPhase::Idle);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Some(intrinsics));
    assert_eq!(calls[0].1, vec![Symbology::Code39, Symbology::Code128]);
}

#[test]
fn shifted_frames_are_registered_before_fusion() {
    init_logging();
    let cfg = PipelineConfig {
        target_count: 3,
        ..PipelineConfig::default()
    };
    let mut acc = BurstAccumulator::new(&cfg).unwrap();
    let reference = scene(0, 0);
    let shifts = [(-3, 2), (2, -1), (1, 3)];

    assert!(matches!(
        acc.on_frame(reference.clone(), CaptureMetadata::new(0)),
        FrameEvent::Opened
    ));
    let mut fused = None;
    for (i, &(dx, dy)) in shifts.iter().enumerate() {
        match acc.on_frame(scene(dx, dy), CaptureMetadata::new(i as u64 + 1)) {
            FrameEvent::Aligned { collected } => assert_eq!(collected, i + 1),
            FrameEvent::Fused(out) => fused = Some(out),
            other => panic!("frame {} not aligned: {other:?}", i + 1),
        }
    }

    let out = fused.expect("burst fused");
    assert_eq!(out.stats.frames_aligned, 3);
    assert_eq!(out.fused.width(), 160);
    assert_eq!(out.fused.height(), 120);
    // The reference covers every pixel.
    assert_eq!(out.fused.defined_ratio(), 1.0);

    let unaligned = mad(&scene(-3, 2), &reference);
    let after = mad(out.fused.frame(), &reference);
    assert!(after < 0.25 * unaligned, "unaligned {unaligned}, fused {after}");
}

#[test]
fn mismatched_frame_is_dropped_and_the_burst_completes() {
    init_logging();
    let cfg = PipelineConfig {
        target_count: 2,
        failure_policy: FailurePolicy::DropFrame { max_drops: 1 },
        ..PipelineConfig::default()
    };
    let mut acc = BurstAccumulator::new(&cfg).unwrap();
    let flat = |w, h| Frame::filled(w, h, PixelFormat::Gray8, &[77]).unwrap();

    assert!(matches!(acc.on_frame(flat(32, 24), CaptureMetadata::new(0)), FrameEvent::Opened));
    match acc.on_frame(flat(16, 12), CaptureMetadata::new(1)) {
        FrameEvent::Dropped {
            error: AlignFailure::Estimation(EstimationFailure::InvalidInput(_)),
        } => {}
        other => panic!("expected a dropped frame, got {other:?}"),
    }
    assert_eq!(acc.phase(), BurstPhase::Collecting(0));
    assert!(matches!(
        acc.on_frame(flat(32, 24), CaptureMetadata::new(2)),
        FrameEvent::Aligned { collected: 1 }
    ));
    match acc.on_frame(flat(32, 24), CaptureMetadata::new(3)) {
        FrameEvent::Fused(out) => {
            assert_eq!(out.stats.frames_seen, 4);
            assert_eq!(out.stats.frames_dropped, 1);
            assert_eq!(out.fused.frame().pixel(5, 5), &[77]);
        }
        other => panic!("expected a fused burst, got {other:?}"),
    }
}

#[test]
fn abort_policy_restarts_on_the_next_frame() {
    init_logging();
    let cfg = PipelineConfig {
        target_count: 3,
        failure_policy: FailurePolicy::AbortBurst,
        ..PipelineConfig::default()
    };
    let mut acc = BurstAccumulator::new(&cfg).unwrap();
    let gray = Frame::filled(32, 24, PixelFormat::Gray8, &[50]).unwrap();
    let color = Frame::filled(32, 24, PixelFormat::Rgb8, &[50, 50, 50]).unwrap();

    acc.on_frame(gray.clone(), CaptureMetadata::new(0));
    acc.on_frame(gray, CaptureMetadata::new(1));
    assert_eq!(acc.phase(), BurstPhase::Collecting(1));

    match acc.on_frame(color.clone(), CaptureMetadata::new(2)) {
        FrameEvent::Aborted {
            reason:
                AbortReason::Align(AlignFailure::Estimation(EstimationFailure::FormatMismatch {
                    ..
                })),
        } => {}
        other => panic!("expected an aborted burst, got {other:?}"),
    }
    assert_eq!(acc.phase(), BurstPhase::Idle);
    assert!(acc.state().reference().is_none());

    // The next frame opens a fresh burst, whatever its format.
    assert!(matches!(acc.on_frame(color, CaptureMetadata::new(3)), FrameEvent::Opened));
    assert_eq!(acc.state().reference().map(Frame::format), Some(PixelFormat::Rgb8));
}

#[test]
fn back_to_back_bursts_never_share_frames() {
    init_logging();
    let cfg = PipelineConfig {
        target_count: 2,
        ..PipelineConfig::default()
    };
    let mut acc = BurstAccumulator::new(&cfg)
        .unwrap()
        .with_estimator(StaticCamera);
    let mut fused = Vec::new();
    for seq in 0..9u64 {
        let frame = Frame::filled(16, 16, PixelFormat::Gray8, &[seq as u8 * 10]).unwrap();
        assert!(acc.state().accumulated().len() <= cfg.target_count);
        if let FrameEvent::Fused(out) = acc.on_frame(frame, CaptureMetadata::new(seq)) {
            fused.push(out);
        }
    }
    let spans: Vec<_> = fused
        .iter()
        .map(|o| (o.stats.reference_sequence, o.stats.trigger_sequence))
        .collect();
    assert_eq!(spans, [(0, 2), (3, 5), (6, 8)]);
    // Median of {0, 10, 20}, {30, 40, 50}, {60, 70, 80}.
    let values: Vec<u8> = fused.iter().map(|o| o.fused.frame().pixel(0, 0)[0]).collect();
    assert_eq!(values, [10, 40, 70]);
}
