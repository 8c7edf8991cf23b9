//! Multi-frame identity consensus.
//!
//! Detections are associated to persistent tracks by box overlap, each
//! association casts one vote for the label the matcher assigned, and at
//! session end every sufficiently observed track is resolved by majority.

use crate::error::{ConfigError, SessionError};
use crate::filter::check_range;
use crate::geometry::iou;
use crate::matcher::Matcher;
use crate::types::{BoundingBox, Detection, Label};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_IOU_THRESHOLD: f32 = 0.4;
const DEFAULT_MIN_FRAMES: usize = 10;
const DEFAULT_FRAME_BUDGET: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// A detection joins a track only when overlap with its last box exceeds this.
    pub iou_threshold: f32,
    /// Tracks observed in this many frames or fewer are discarded as noise.
    pub min_frames: usize,
    /// Frames accumulated before the session finalizes on its own.
    pub frame_budget: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            min_frames: DEFAULT_MIN_FRAMES,
            frame_budget: DEFAULT_FRAME_BUDGET,
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("iou_threshold", self.iou_threshold, 0.0..1.0, "[0, 1)")?;
        if self.frame_budget == 0 {
            return Err(ConfigError::OutOfRange {
                field: "frame_budget",
                value: 0.0,
                expected: ">= 1",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Accumulating,
}

#[derive(Debug, Clone, Copy, Default)]
struct BoxSum {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl BoxSum {
    fn add(&mut self, b: &BoundingBox) {
        self.x += b.x as f64;
        self.y += b.y as f64;
        self.width += b.width as f64;
        self.height += b.height as f64;
    }
}

/// A face followed across frames within one session.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: Uuid,
    /// Box of the most recent association; next frame associates against it.
    pub last_box: BoundingBox,
    /// Votes per label, in first-vote order.
    label_counts: Vec<(Label, usize)>,
    total_frames: usize,
    sum_box: BoxSum,
}

impl Track {
    fn new(bbox: BoundingBox) -> Self {
        Self {
            id: Uuid::new_v4(),
            last_box: bbox,
            label_counts: Vec::new(),
            total_frames: 0,
            sum_box: BoxSum::default(),
        }
    }

    fn observe(&mut self, bbox: BoundingBox, label: Label) {
        self.total_frames += 1;
        match self.label_counts.iter_mut().find(|(l, _)| *l == label) {
            Some((_, count)) => *count += 1,
            None => self.label_counts.push((label, 1)),
        }
        self.sum_box.add(&bbox);
        self.last_box = bbox;
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn label_counts(&self) -> &[(Label, usize)] {
        &self.label_counts
    }

    pub fn votes_for(&self, label: &Label) -> usize {
        self.label_counts
            .iter()
            .find(|(l, _)| l == label)
            .map_or(0, |(_, c)| *c)
    }

    /// Label with the most votes. Equal counts go to the label voted for first.
    pub fn winning_label(&self) -> Option<(&Label, usize)> {
        let mut best: Option<(&Label, usize)> = None;
        for (label, count) in &self.label_counts {
            if best.map_or(true, |(_, c)| *count > c) {
                best = Some((label, *count));
            }
        }
        best
    }

    /// Per-field mean of every associated box.
    pub fn average_box(&self) -> BoundingBox {
        if self.total_frames == 0 {
            return self.last_box;
        }
        let n = self.total_frames as f64;
        BoundingBox {
            x: (self.sum_box.x / n) as f32,
            y: (self.sum_box.y / n) as f32,
            width: (self.sum_box.width / n) as f32,
            height: (self.sum_box.height / n) as f32,
        }
    }

    /// Fraction of frames that agree on the winning label.
    pub fn confidence(&self) -> f32 {
        match self.winning_label() {
            Some((_, count)) if self.total_frames > 0 => {
                count as f32 / self.total_frames as f32
            }
            _ => 0.0,
        }
    }

    fn finalize(&self) -> Option<StableResult> {
        let (label, _) = self.winning_label()?;
        Some(StableResult {
            label: label.clone(),
            bbox: self.average_box(),
            confidence: self.confidence(),
            frame_count: self.total_frames,
        })
    }
}

/// A finalized, deduplicated identity for one persistently visible face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableResult {
    pub label: Label,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub frame_count: usize,
}

/// Live per-detection result for overlay rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub track_id: Uuid,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub label: Label,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame_index: usize,
    pub annotations: Vec<Annotation>,
    /// Detections dropped as malformed in this frame.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub enum FrameOutcome {
    /// The session keeps accumulating.
    Accumulating(FrameReport),
    /// This frame exhausted the budget; the session is back to idle.
    Finalized {
        report: FrameReport,
        results: Vec<StableResult>,
    },
}

impl FrameOutcome {
    pub fn report(&self) -> &FrameReport {
        match self {
            FrameOutcome::Accumulating(report) | FrameOutcome::Finalized { report, .. } => report,
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, FrameOutcome::Finalized { .. })
    }

    pub fn into_results(self) -> Option<Vec<StableResult>> {
        match self {
            FrameOutcome::Accumulating(_) => None,
            FrameOutcome::Finalized { results, .. } => Some(results),
        }
    }
}

/// Track consensus over one accumulation session at a time.
///
/// Frames must arrive in time order; a late frame would be associated against
/// boxes that have already moved on.
#[derive(Debug)]
pub struct TrackConsensus {
    config: ConsensusConfig,
    state: SessionState,
    tracks: Vec<Track>,
    frames_seen: usize,
    skipped: usize,
    /// Embedding dimension fixed for the current session.
    dimension: Option<usize>,
}

impl TrackConsensus {
    pub fn new(config: ConsensusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: SessionState::Idle,
            tracks: Vec::new(),
            frames_seen: 0,
            skipped: 0,
            dimension: None,
        })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    /// Malformed detections skipped so far in this session.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Accumulating {
            return Err(SessionError::AlreadyAccumulating);
        }
        self.reset();
        self.state = SessionState::Accumulating;
        tracing::info!(budget = self.config.frame_budget, "accumulation session started");
        Ok(())
    }

    /// Fold one frame's detections into the session.
    ///
    /// When this frame reaches the budget the session is finalized and the
    /// stable results are returned with the report.
    pub fn push_frame<M: Matcher + ?Sized>(
        &mut self,
        matcher: &M,
        detections: &[Detection],
    ) -> Result<FrameOutcome, SessionError> {
        if self.state != SessionState::Accumulating {
            return Err(SessionError::NotAccumulating);
        }

        let mut report = FrameReport {
            frame_index: self.frames_seen,
            ..Default::default()
        };

        for (i, det) in detections.iter().enumerate() {
            let Some(bbox) = det.valid_box() else {
                tracing::debug!(
                    frame = report.frame_index,
                    detection = i,
                    "skipping detection without valid box"
                );
                report.skipped += 1;
                continue;
            };
            let Some(embedding) = det.embedding.as_ref().filter(|e| !e.is_empty()) else {
                tracing::debug!(
                    frame = report.frame_index,
                    detection = i,
                    "skipping detection without embedding"
                );
                report.skipped += 1;
                continue;
            };

            let expected = *self
                .dimension
                .get_or_insert(matcher.dimension().unwrap_or(embedding.dimension()));
            if embedding.dimension() != expected {
                tracing::debug!(
                    frame = report.frame_index,
                    detection = i,
                    expected,
                    actual = embedding.dimension(),
                    "skipping detection with mismatched embedding dimension"
                );
                report.skipped += 1;
                continue;
            }

            let idx = self.associate(&bbox);
            let result = matcher.classify(embedding);
            let track = &mut self.tracks[idx];
            track.observe(bbox, result.label.clone());

            report.annotations.push(Annotation {
                track_id: track.id,
                bbox,
                label: result.label,
                score: result.score,
            });
        }

        self.skipped += report.skipped;
        self.frames_seen += 1;

        if self.frames_seen >= self.config.frame_budget {
            let results = self.finalize();
            return Ok(FrameOutcome::Finalized { report, results });
        }
        Ok(FrameOutcome::Accumulating(report))
    }

    /// End the session early and emit whatever has accumulated.
    pub fn finish(&mut self) -> Result<Vec<StableResult>, SessionError> {
        if self.state != SessionState::Accumulating {
            return Err(SessionError::NotAccumulating);
        }
        Ok(self.finalize())
    }

    /// Discard the session without emitting anything.
    pub fn abort(&mut self) {
        if self.state == SessionState::Accumulating {
            tracing::info!(
                frames = self.frames_seen,
                tracks = self.tracks.len(),
                "accumulation session aborted"
            );
        }
        self.reset();
        self.state = SessionState::Idle;
    }

    /// Index of the track this box continues, creating one if none overlaps enough.
    fn associate(&mut self, bbox: &BoundingBox) -> usize {
        let mut best: Option<(usize, f32)> = None;
        for (i, track) in self.tracks.iter().enumerate() {
            let overlap = iou(bbox, &track.last_box);
            if overlap > self.config.iou_threshold && best.map_or(true, |(_, b)| overlap > b) {
                best = Some((i, overlap));
            }
        }

        match best {
            Some((i, _)) => i,
            None => {
                self.tracks.push(Track::new(*bbox));
                self.tracks.len() - 1
            }
        }
    }

    fn finalize(&mut self) -> Vec<StableResult> {
        let results: Vec<StableResult> = self
            .tracks
            .iter()
            .filter(|t| t.total_frames > self.config.min_frames)
            .filter_map(Track::finalize)
            .collect();

        tracing::info!(
            frames = self.frames_seen,
            tracks = self.tracks.len(),
            stable = results.len(),
            skipped = self.skipped,
            "accumulation session finalized"
        );

        self.reset();
        self.state = SessionState::Idle;
        results
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.frames_seen = 0;
        self.skipped = 0;
        self.dimension = None;
    }
}
