use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pinhole intrinsics attached to a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// The 3x3 camera matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }
}

/// Per-frame capture information forwarded untouched to the detector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// Monotonic index assigned by the frame source.
    pub sequence: u64,
    #[serde(default)]
    pub timestamp: Option<Duration>,
    #[serde(default)]
    pub intrinsics: Option<CameraIntrinsics>,
}

impl CaptureMetadata {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            ..Self::default()
        }
    }

    pub fn with_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }
}
