#![cfg(feature = "cli")]

use assert_cmd::Command;
use burst_fusion::PipelineConfig;
use predicates::prelude::*;
use std::path::{Path, PathBuf};

fn write_burst(dir: &Path, count: usize, rgb: [u8; 3]) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("frame_{i:02}.png"));
            image::RgbImage::from_pixel(40, 30, image::Rgb(rgb))
                .save(&path)
                .expect("write frame");
            path
        })
        .collect()
}

#[test]
fn fuse_writes_image_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let frames = write_burst(dir.path(), 6, [120, 60, 30]);
    let out = dir.path().join("fused.png");
    let report = dir.path().join("report.json");

    Command::cargo_bin("burst-fusion")
        .unwrap()
        .arg("fuse")
        .args(&frames)
        .arg("--out")
        .arg(&out)
        .arg("--report")
        .arg(&report)
        .assert()
        .success();

    let fused = image::open(&out).unwrap().to_rgb8();
    assert_eq!(fused.dimensions(), (40, 30));
    assert!(fused.pixels().all(|p| p.0 == [120, 60, 30]));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["counters"]["frames_processed"], 6);
    assert_eq!(json["counters"]["bursts_completed"], 1);
    let bursts = json["bursts"].as_array().unwrap();
    assert_eq!(bursts.len(), 1);
    assert_eq!(bursts[0]["stats"]["frames_aligned"], 5);
    assert_eq!(bursts[0]["payloads"], serde_json::json!([]));
}

#[test]
fn too_few_frames_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let frames = write_burst(dir.path(), 3, [10, 10, 10]);

    Command::cargo_bin("burst-fusion")
        .unwrap()
        .arg("fuse")
        .args(&frames)
        .arg("--out")
        .arg(dir.path().join("fused.png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("need at least 6 frames"));
}

#[test]
fn target_count_override_yields_several_bursts() {
    let dir = tempfile::tempdir().unwrap();
    let frames = write_burst(dir.path(), 6, [200, 200, 200]);
    let out = dir.path().join("fused.png");

    Command::cargo_bin("burst-fusion")
        .unwrap()
        .arg("fuse")
        .args(&frames)
        .args(["--target-count", "2"])
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    assert!(out.exists());
    assert!(dir.path().join("fused-1.png").exists());
    assert!(!dir.path().join("fused-2.png").exists());
}

#[test]
fn default_config_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");

    Command::cargo_bin("burst-fusion")
        .unwrap()
        .arg("default-config")
        .arg("--out")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote default config"));

    let cfg = PipelineConfig::load_json(&path).unwrap();
    assert_eq!(cfg, PipelineConfig::default());
}
