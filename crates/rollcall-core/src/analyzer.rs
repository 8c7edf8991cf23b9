//! Matcher and consensus engine bundled under one owner.
//!
//! Holding both in one struct lets the registry-rebuild and the active
//! session exclude each other: a rebuild is refused while frames are being
//! accumulated, so every frame of a session is matched against the same
//! registry.

use crate::consensus::{ConsensusConfig, FrameOutcome, SessionState, StableResult, TrackConsensus};
use crate::error::{ConfigError, SessionError};
use crate::filter::DetectionFilter;
use crate::matcher::{EmbeddingMatcher, MatchParams, MatchResult, Matcher};
use crate::types::{BoundingBox, Detection, Identity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Per-detection match for a single image, independent of any session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAnnotation {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(flatten)]
    pub result: MatchResult,
}

#[derive(Debug)]
pub struct Analyzer {
    matcher: EmbeddingMatcher,
    consensus: TrackConsensus,
    filter: Option<DetectionFilter>,
}

impl Analyzer {
    pub fn new(
        identities: Vec<Identity>,
        params: MatchParams,
        consensus: ConsensusConfig,
        filter: Option<DetectionFilter>,
    ) -> Result<Self, ConfigError> {
        if let Some(f) = &filter {
            f.validate()?;
        }
        Ok(Self {
            matcher: EmbeddingMatcher::new(identities, params)?,
            consensus: TrackConsensus::new(consensus)?,
            filter,
        })
    }

    pub fn matcher(&self) -> &EmbeddingMatcher {
        &self.matcher
    }

    pub fn state(&self) -> SessionState {
        self.consensus.state()
    }

    pub fn consensus(&self) -> &TrackConsensus {
        &self.consensus
    }

    /// Replace the enrolled roster and matching parameters.
    pub fn rebuild_registry(
        &mut self,
        identities: Vec<Identity>,
        params: MatchParams,
    ) -> Result<(), AnalyzerError> {
        if self.consensus.state() == SessionState::Accumulating {
            tracing::warn!("registry rebuild refused during active session");
            return Err(SessionError::RegistryBusy.into());
        }
        self.matcher.rebuild(identities, params)?;
        Ok(())
    }

    /// Match every usable detection in one image. Session state is untouched.
    pub fn annotate(&self, detections: Vec<Detection>) -> Vec<FaceAnnotation> {
        self.prepare(detections)
            .into_iter()
            .filter_map(|det| {
                let bbox = det.valid_box()?;
                let embedding = det.embedding.as_ref()?;
                Some(FaceAnnotation {
                    bbox,
                    result: self.matcher.classify(embedding),
                })
            })
            .collect()
    }

    pub fn start_session(&mut self) -> Result<(), SessionError> {
        self.consensus.start()
    }

    pub fn push_frame(&mut self, detections: Vec<Detection>) -> Result<FrameOutcome, SessionError> {
        let detections = self.prepare(detections);
        self.consensus.push_frame(&self.matcher, &detections)
    }

    pub fn finish_session(&mut self) -> Result<Vec<StableResult>, SessionError> {
        self.consensus.finish()
    }

    pub fn abort_session(&mut self) {
        self.consensus.abort();
    }

    fn prepare(&self, detections: Vec<Detection>) -> Vec<Detection> {
        match &self.filter {
            Some(filter) => filter.apply(detections),
            None => detections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Embedding, Label};

    fn roster() -> Vec<Identity> {
        vec![
            Identity::new("Alice", vec![Embedding::new(vec![1.0, 0.0])]),
            Identity::new("Bob", vec![Embedding::new(vec![0.0, 1.0])]),
        ]
    }

    fn det(x: f32, embedding: [f32; 2], score: f32) -> Detection {
        Detection::new(
            BoundingBox::new(x, 0.0, 80.0, 80.0),
            Embedding::new(embedding.to_vec()),
            score,
        )
    }

    fn analyzer(filter: Option<DetectionFilter>) -> Analyzer {
        Analyzer::new(roster(), MatchParams::default(), ConsensusConfig::default(), filter).unwrap()
    }

    #[test]
    fn test_rebuild_refused_while_accumulating() {
        let mut analyzer = analyzer(None);
        analyzer.start_session().unwrap();
        assert_eq!(
            analyzer.rebuild_registry(vec![], MatchParams::default()),
            Err(AnalyzerError::Session(SessionError::RegistryBusy))
        );
        assert_eq!(analyzer.matcher().identities().len(), 2);

        analyzer.abort_session();
        analyzer.rebuild_registry(vec![], MatchParams::default()).unwrap();
        assert!(analyzer.matcher().is_empty());
    }

    #[test]
    fn test_rebuild_surfaces_config_error() {
        let mut analyzer = analyzer(None);
        let params = MatchParams {
            similarity_threshold: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            analyzer.rebuild_registry(roster(), params),
            Err(AnalyzerError::Config(_))
        ));
    }

    #[test]
    fn test_annotate_reports_label_and_score() {
        let analyzer = analyzer(None);
        let annotations = analyzer.annotate(vec![
            det(0.0, [1.0, 0.0], 0.9),
            det(200.0, [0.3, 0.954], 0.9),
            Detection::default(),
        ]);
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].result.label, Label::known("Alice"));
        assert_eq!(annotations[1].result.label, Label::known("Bob"));
        assert_eq!(analyzer.state(), SessionState::Idle);
    }

    #[test]
    fn test_filter_applies_before_consensus() {
        let mut analyzer = analyzer(Some(DetectionFilter::default()));
        analyzer.start_session().unwrap();
        for _ in 0..11 {
            analyzer
                .push_frame(vec![
                    det(0.0, [1.0, 0.0], 0.9),
                    det(4.0, [1.0, 0.0], 0.8),
                    det(300.0, [0.0, 1.0], 0.2),
                ])
                .unwrap();
        }
        assert_eq!(analyzer.consensus().tracks().len(), 1);
        let results = analyzer.finish_session().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, Label::known("Alice"));
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let filter = DetectionFilter {
            min_face_size: 1.0,
            ..Default::default()
        };
        assert!(Analyzer::new(
            roster(),
            MatchParams::default(),
            ConsensusConfig::default(),
            Some(filter)
        )
        .is_err());
    }

    #[test]
    fn test_partial_box_neighbour_does_not_cost_frames() {
        let line = r#"[
            {"box": {"x": 0, "y": 0, "width": 100, "height": 100}, "embedding": [1.0, 0.0], "score": 0.9},
            {"box": {"x": 300, "y": 0, "width": 100}, "embedding": [0.0, 1.0], "score": 0.9}
        ]"#;
        let mut analyzer = analyzer(None);
        analyzer.start_session().unwrap();
        let mut skipped = 0;
        for _ in 0..15 {
            let frame = crate::types::parse_frame(line).unwrap();
            let outcome = analyzer.push_frame(frame.detections).unwrap();
            skipped += outcome.report().skipped;
        }
        assert_eq!(skipped, 15);

        let results = analyzer.finish_session().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, Label::known("Alice"));
        assert_eq!(results[0].frame_count, 15);
        assert!((results[0].confidence - 1.0).abs() < 1e-6);
    }
}
