use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Axis-aligned rectangle in image-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// All fields finite and a non-negative extent. Zero-area boxes are valid.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }
}

/// Face embedding vector (512-dimensional for ArcFace-family detectors).
///
/// Detectors feeding this crate L2-normalize their output; see
/// [`dot`](Self::dot) for why that matters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Unit-length copy. A zero vector is returned unchanged.
    pub fn normalized(&self) -> Embedding {
        let norm = self.norm();
        if norm > 0.0 {
            Embedding::new(self.values.iter().map(|v| v / norm).collect())
        } else {
            self.clone()
        }
    }

    /// Dot product. Equals cosine similarity only when both vectors are unit-norm.
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Cosine similarity in [-1, 1]. Returns 0.0 if either vector has zero norm.
    pub fn cosine(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// Identity assigned to a face: an enrolled student, or nobody.
///
/// `Unknown` is a variant rather than a reserved name so that a student
/// enrolled as "unknown" stays distinguishable from a failed match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Known(String),
    Unknown,
}

impl Label {
    pub fn known(name: impl Into<String>) -> Self {
        Label::Known(name.into())
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Label::Known(_))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Label::Known(name) => Some(name),
            Label::Unknown => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Known(name) => f.write_str(name),
            Label::Unknown => f.write_str("unknown"),
        }
    }
}

/// An enrolled student with one embedding per registration photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    #[serde(alias = "name")]
    pub label: String,
    #[serde(alias = "descriptors", alias = "descriptor", default)]
    pub embeddings: Vec<Embedding>,
}

impl Identity {
    pub fn new(label: impl Into<String>, embeddings: Vec<Embedding>) -> Self {
        Self {
            label: label.into(),
            embeddings,
        }
    }
}

/// One face reported by the external detector for a single frame.
///
/// Geometry and embedding are optional because upstream payloads are not
/// trusted to carry them; a detection missing either is skipped. Fields that
/// are present but malformed deserialize as absent so one bad value never
/// fails the surrounding frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box", default, deserialize_with = "lenient")]
    pub bbox: Option<BoundingBox>,
    #[serde(default, deserialize_with = "lenient")]
    pub embedding: Option<Embedding>,
    /// Detector confidence.
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub score: f32,
    /// Facial landmark points in pixel coordinates. Five-point and 106-point
    /// layouts are both accepted.
    #[serde(default, deserialize_with = "lenient")]
    pub landmarks: Option<Vec<(f32, f32)>>,
    /// Box drawn by a user rather than produced by the detector.
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub is_manual: bool,
}

impl Detection {
    pub fn new(bbox: BoundingBox, embedding: Embedding, score: f32) -> Self {
        Self {
            bbox: Some(bbox),
            embedding: Some(embedding),
            score,
            landmarks: None,
            is_manual: false,
        }
    }

    /// Box, if present and geometrically sound.
    pub fn valid_box(&self) -> Option<BoundingBox> {
        self.bbox.filter(BoundingBox::is_valid)
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn lenient_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// Detections decoded from one frame's JSON array.
#[derive(Debug, Clone, Default)]
pub struct ParsedFrame {
    pub detections: Vec<Detection>,
    /// Array elements that were not detection objects at all.
    pub rejected: usize,
}

/// Decode a frame element by element.
///
/// Only a payload that is not a JSON array is an error. Elements that cannot
/// be read as a detection are counted in `rejected` and the rest are kept.
pub fn parse_frame(json: &str) -> Result<ParsedFrame, serde_json::Error> {
    let elements: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let mut frame = ParsedFrame::default();
    for (i, element) in elements.into_iter().enumerate() {
        match serde_json::from_value(element) {
            Ok(detection) => frame.detections.push(detection),
            Err(e) => {
                tracing::debug!(detection = i, error = %e, "dropping malformed detection");
                frame.rejected += 1;
            }
        }
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_symmetric() {
        let a = Embedding::new(vec![0.3, -0.2, 0.9]);
        let b = Embedding::new(vec![0.5, 0.7, -0.1]);
        assert_eq!(a.dot(&b), b.dot(&a));
    }

    #[test]
    fn test_cosine_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.cosine(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.cosine(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.cosine(&b), 0.0);
    }

    #[test]
    fn test_normalized_is_unit() {
        let a = Embedding::new(vec![3.0, 4.0]).normalized();
        assert!((a.norm() - 1.0).abs() < 1e-6);
        assert!((a.values[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_box_validity() {
        assert!(BoundingBox::new(0.0, 0.0, 0.0, 0.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, -1.0, 5.0).is_valid());
        assert!(!BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_label_display() {
        assert_eq!(Label::known("Alice").to_string(), "Alice");
        assert_eq!(Label::Unknown.to_string(), "unknown");
        assert_ne!(Label::known("unknown"), Label::Unknown);
    }

    #[test]
    fn test_detection_wire_format() {
        let json = r#"{"box": {"x": 1, "y": 2, "width": 3, "height": 4},
                       "embedding": [0.6, 0.8], "score": 0.9}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.bbox, Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0)));
        assert_eq!(det.embedding.unwrap().dimension(), 2);
        assert!(det.landmarks.is_none());
        assert!(!det.is_manual);
    }

    #[test]
    fn test_detection_missing_fields() {
        let det: Detection = serde_json::from_str(r#"{"score": 0.4}"#).unwrap();
        assert!(det.bbox.is_none());
        assert!(det.embedding.is_none());
    }

    #[test]
    fn test_identity_accepts_enrollment_field_names() {
        let json = r#"{"name": "Bob", "descriptors": [[0.0, 1.0]]}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.label, "Bob");
        assert_eq!(identity.embeddings.len(), 1);
    }

    #[test]
    fn test_identity_accepts_singular_descriptor() {
        let json = r#"{"name": "Cara", "descriptor": [[0.6, 0.8], [0.8, 0.6]]}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.label, "Cara");
        assert_eq!(identity.embeddings.len(), 2);
    }

    #[test]
    fn test_partial_box_does_not_fail_frame() {
        let json = r#"[
            {"box": {"x": 0, "y": 0, "width": 100, "height": 100}, "embedding": [1.0, 0.0], "score": 0.9},
            {"box": {"x": 300, "y": 0, "width": 100}, "embedding": [0.0, 1.0], "score": 0.8}
        ]"#;
        let frame = parse_frame(json).unwrap();
        assert_eq!(frame.rejected, 0);
        assert_eq!(frame.detections.len(), 2);
        assert_eq!(
            frame.detections[0].valid_box(),
            Some(BoundingBox::new(0.0, 0.0, 100.0, 100.0))
        );
        assert!(frame.detections[1].bbox.is_none());
        assert!(frame.detections[1].embedding.is_some());
    }

    #[test]
    fn test_null_fields_read_as_absent() {
        let json = r#"[{"box": {"x": 1, "y": null, "width": 3, "height": 4},
                        "embedding": [0.6, "x"], "score": null, "is_manual": null}]"#;
        let frame = parse_frame(json).unwrap();
        let det = &frame.detections[0];
        assert!(det.bbox.is_none());
        assert!(det.embedding.is_none());
        assert_eq!(det.score, 0.0);
        assert!(!det.is_manual);
    }

    #[test]
    fn test_dense_landmarks_accepted() {
        let points: Vec<[f32; 2]> = (0..106).map(|i| [i as f32, i as f32 * 0.5]).collect();
        let json = serde_json::json!([{
            "box": {"x": 10, "y": 10, "width": 50, "height": 50},
            "embedding": [1.0, 0.0],
            "landmarks": points,
        }])
        .to_string();
        let frame = parse_frame(&json).unwrap();
        let det = &frame.detections[0];
        assert_eq!(det.landmarks.as_ref().map(Vec::len), Some(106));
        assert!(det.valid_box().is_some());
    }

    #[test]
    fn test_non_object_elements_are_rejected_individually() {
        let json = r#"[42, {"box": {"x": 0, "y": 0, "width": 10, "height": 10}}, "face"]"#;
        let frame = parse_frame(json).unwrap();
        assert_eq!(frame.rejected, 2);
        assert_eq!(frame.detections.len(), 1);
    }

    #[test]
    fn test_frame_must_be_an_array() {
        assert!(parse_frame(r#"{"box": null}"#).is_err());
        assert!(parse_frame("not json").is_err());
    }
}
