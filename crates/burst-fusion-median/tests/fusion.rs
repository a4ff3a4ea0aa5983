use burst_fusion_core::{Frame, PixelFormat, Rect};
use burst_fusion_median::{CpuMedianFusion, MedianFusion, UndefinedPixel};

fn checker(width: usize, height: usize) -> Frame {
    Frame::from_fn(width, height, PixelFormat::Rgba8, |x, y, px| {
        let v = if (x / 3 + y / 3) % 2 == 0 { 30 } else { 220 };
        px.copy_from_slice(&[v, 255 - v, v / 2, 255]);
    })
    .expect("valid frame")
}

#[test]
fn identical_burst_fuses_to_the_input() {
    let reference = checker(24, 18);
    let burst = vec![reference.clone(); 5];
    let fused = CpuMedianFusion::default().fuse(&reference, &burst).unwrap();
    assert_eq!(fused.frame().data(), reference.data());
    assert_eq!(fused.defined_ratio(), 1.0);
}

#[test]
fn transient_outlier_is_suppressed() {
    let reference = checker(24, 18);
    let mut burst = vec![reference.clone(); 5];
    // A bright streak crosses one frame only.
    burst[2] = Frame::from_fn(24, 18, PixelFormat::Rgba8, |x, y, px| {
        px.copy_from_slice(reference.pixel(x, y));
        if y == 9 {
            px.copy_from_slice(&[255, 255, 255, 255]);
        }
    })
    .unwrap();
    let fused = CpuMedianFusion::default().fuse(&reference, &burst).unwrap();
    assert_eq!(fused.frame().data(), reference.data());
}

#[test]
fn partially_covered_burst_keeps_reference_pixels() {
    let reference = checker(12, 8);
    // Aligned frames that only cover the left half.
    let mut mask = vec![0u8; 12 * 8];
    for y in 0..8 {
        for x in 0..6 {
            mask[y * 12 + x] = 255;
        }
    }
    let half = Frame::filled(12, 8, PixelFormat::Rgba8, &[0, 0, 0, 255])
        .unwrap()
        .with_mask(mask)
        .unwrap();
    let fusion = CpuMedianFusion::new(UndefinedPixel([1, 2, 3, 4]));
    let fused = fusion.fuse(&reference, &[half.clone(), half.clone(), half]).unwrap();
    // Right half: only the reference contributes.
    assert_eq!(fused.frame().pixel(9, 4), reference.pixel(9, 4));
    // Left half: three black samples outvote the reference.
    assert_eq!(fused.frame().pixel(2, 4), &[0, 0, 0, 255]);
    assert_eq!(fused.defined_ratio(), 1.0);
}

#[test]
fn masked_reference_without_coverage_uses_sentinel() {
    let reference = checker(8, 8).with_extent(Rect::new(0, 0, 8, 4)).unwrap();
    let empty = Frame::filled(8, 4, PixelFormat::Rgba8, &[0, 0, 0, 0])
        .unwrap()
        .with_mask(vec![0; 32])
        .unwrap();
    let masked_ref = reference.clone().with_mask(vec![0; 64]).unwrap();
    let fused = CpuMedianFusion::new(UndefinedPixel([1, 2, 3, 4]))
        .fuse(&masked_ref, &[empty])
        .unwrap();
    assert_eq!((fused.width(), fused.height()), (8, 4));
    assert_eq!(fused.defined_pixels(), 0);
    assert!(fused
        .frame()
        .data()
        .chunks_exact(4)
        .all(|px| px == [1, 2, 3, 4]));
}
