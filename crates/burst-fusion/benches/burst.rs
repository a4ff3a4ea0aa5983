use burst_fusion::{
    BurstAccumulator, CaptureMetadata, Frame, FrameEvent, PipelineConfig, PixelFormat,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn hash(x: i32, y: i32) -> u8 {
    let mut h = (x as u32).wrapping_mul(0x9E37_79B1) ^ (y as u32).wrapping_mul(0x85EB_CA77);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^= h >> 12;
    (h & 0xff) as u8
}

fn scene(dx: i32, dy: i32) -> Frame {
    Frame::from_fn(640, 480, PixelFormat::Bgra8, |x, y, px| {
        let v = hash((x as i32 - dx).div_euclid(6), (y as i32 - dy).div_euclid(6));
        px.copy_from_slice(&[v, v / 2, 255 - v, 255]);
    })
    .expect("valid frame")
}

fn run_burst(acc: &mut BurstAccumulator, frames: &[Frame]) -> usize {
    acc.reset();
    let mut fused = 0;
    for (seq, frame) in frames.iter().enumerate() {
        let meta = CaptureMetadata::new(seq as u64);
        if let FrameEvent::Fused(out) = acc.on_frame(frame.clone(), meta) {
            fused += out.fused.defined_pixels();
        }
    }
    fused
}

fn bench_burst(c: &mut Criterion) {
    let frames: Vec<Frame> = [(0, 0), (2, -1), (-3, 1), (1, 2), (-1, -2), (3, 3)]
        .iter()
        .map(|&(dx, dy)| scene(dx, dy))
        .collect();

    for parallel in [false, true] {
        let cfg = PipelineConfig {
            parallel,
            ..PipelineConfig::default()
        };
        let mut acc = BurstAccumulator::new(&cfg).expect("config");
        let name = if parallel {
            "burst_6x_bgra_640x480_parallel"
        } else {
            "burst_6x_bgra_640x480"
        };
        c.bench_function(name, |b| {
            b.iter(|| black_box(run_burst(&mut acc, black_box(&frames))));
        });
    }
}

criterion_group!(benches, bench_burst);
criterion_main!(benches);
