//! Pre-filtering of raw detector output before matching.

use crate::error::ConfigError;
use crate::geometry;
use crate::types::Detection;
use serde::{Deserialize, Serialize};
use std::ops::RangeBounds;

const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_MIN_FACE_SIZE: f32 = 20.0;
const DEFAULT_DEDUP_IOU: f32 = 0.3;

/// Detector-side acceptance rules applied to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionFilter {
    /// Minimum detector score, in [0.01, 1.0].
    pub min_confidence: f32,
    /// Minimum length of the shorter box side in pixels, in [10, 100].
    pub min_face_size: f32,
    /// Overlap above which two detections are the same face.
    pub dedup_iou: f32,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            dedup_iou: DEFAULT_DEDUP_IOU,
        }
    }
}

impl DetectionFilter {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("min_confidence", self.min_confidence, 0.01..=1.0, "[0.01, 1.0]")?;
        check_range("min_face_size", self.min_face_size, 10.0..=100.0, "[10, 100]")?;
        check_range("dedup_iou", self.dedup_iou, 0.0..=1.0, "[0, 1]")?;
        Ok(())
    }

    /// Drop weak or tiny detections, then collapse duplicates.
    ///
    /// Manually drawn boxes bypass the score and size checks. Detections with
    /// no box are left for the consensus engine to skip.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let before = detections.len();
        let accepted: Vec<Detection> = detections
            .into_iter()
            .filter(|d| self.accepts(d))
            .collect();

        let rejected = before - accepted.len();
        if rejected > 0 {
            tracing::debug!(rejected, "filtered low-confidence or undersized detections");
        }

        geometry::suppress_duplicates(accepted, self.dedup_iou)
    }

    fn accepts(&self, det: &Detection) -> bool {
        if det.is_manual {
            return true;
        }
        if det.score < self.min_confidence {
            return false;
        }
        match det.valid_box() {
            Some(b) => b.width.min(b.height) >= self.min_face_size,
            None => true,
        }
    }
}

/// Reject non-finite values and values outside `range`.
pub(crate) fn check_range(
    field: &'static str,
    value: f32,
    range: impl RangeBounds<f32>,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value.is_finite() && range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value as f64,
            expected,
        })
    }
}
