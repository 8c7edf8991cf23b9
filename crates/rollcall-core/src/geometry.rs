//! Box overlap and duplicate suppression.

use crate::types::{BoundingBox, Detection};

/// Intersection-over-Union between two boxes, in [0, 1].
///
/// Degenerate pairs (zero union) yield 0.0.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

/// Collapse detections that describe the same face.
///
/// Detections are visited from highest to lowest score; one is kept unless it
/// overlaps an already-kept detection by more than `iou_threshold`. Detections
/// without usable geometry are passed through so the caller can count them as
/// malformed.
pub fn suppress_duplicates(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let (mut boxed, unboxed): (Vec<Detection>, Vec<Detection>) = detections
        .into_iter()
        .partition(|d| d.valid_box().is_some());

    boxed.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(boxed.len());
    let mut kept_boxes: Vec<BoundingBox> = Vec::with_capacity(boxed.len());
    let total = boxed.len();

    for det in boxed {
        let Some(bbox) = det.valid_box() else {
            continue;
        };
        if kept_boxes.iter().any(|k| iou(k, &bbox) > iou_threshold) {
            continue;
        }
        kept_boxes.push(bbox);
        keep.push(det);
    }

    if keep.len() < total {
        tracing::debug!(
            before = total,
            after = keep.len(),
            "suppressed overlapping detections"
        );
    }

    keep.extend(unboxed);
    keep
}
