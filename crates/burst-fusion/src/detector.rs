//! Symbol detector contract.
//!
//! Decoding is delegated: the pipeline hands each fused image, the capture
//! intrinsics of the frame that completed the burst, and the configured
//! symbologies to a [`SymbolDetector`] and forwards whatever it returns.

use burst_fusion_core::CameraIntrinsics;
use burst_fusion_median::FusedImage;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Barcode symbologies a detector may be asked to look for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    Code39,
    Code93,
    Code128,
    Ean8,
    Ean13,
    UpcE,
    Itf14,
    Qr,
    DataMatrix,
    Pdf417,
    Aztec,
}

/// Decoded payloads of one fused image, in detector order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionResult {
    pub payloads: Vec<String>,
}

impl DetectionResult {
    pub fn new(payloads: Vec<String>) -> Self {
        Self { payloads }
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.payloads.iter().map(String::as_str)
    }
}

/// Opaque detector failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("symbol detection failed: {message}")]
pub struct DetectorError {
    pub message: String,
}

impl DetectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Decodes symbols in a fused image.
///
/// Implemented for closures with the matching signature.
pub trait SymbolDetector: Send {
    fn detect(
        &mut self,
        image: &FusedImage,
        intrinsics: Option<&CameraIntrinsics>,
        symbologies: &[Symbology],
    ) -> Result<DetectionResult, DetectorError>;
}

impl<F> SymbolDetector for F
where
    F: FnMut(
            &FusedImage,
            Option<&CameraIntrinsics>,
            &[Symbology],
        ) -> Result<DetectionResult, DetectorError>
        + Send,
{
    fn detect(
        &mut self,
        image: &FusedImage,
        intrinsics: Option<&CameraIntrinsics>,
        symbologies: &[Symbology],
    ) -> Result<DetectionResult, DetectorError> {
        self(image, intrinsics, symbologies)
    }
}

/// Run `detector`, turning a panic inside it into a [`DetectorError`].
pub(crate) fn detect_guarded(
    detector: &mut dyn SymbolDetector,
    image: &FusedImage,
    intrinsics: Option<&CameraIntrinsics>,
    symbologies: &[Symbology],
) -> Result<DetectionResult, DetectorError> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        detector.detect(image, intrinsics, symbologies)
    }))
    .unwrap_or_else(|payload| {
        Err(DetectorError::new(format!(
            "detector panicked: {}",
            panic_message(&*payload)
        )))
    })
}

/// Text of a panic payload, when it carries one.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string payload"
    }
}

/// Detector that never finds anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDetector;

impl SymbolDetector for NoopDetector {
    fn detect(
        &mut self,
        _image: &FusedImage,
        _intrinsics: Option<&CameraIntrinsics>,
        _symbologies: &[Symbology],
    ) -> Result<DetectionResult, DetectorError> {
        Ok(DetectionResult::default())
    }
}
