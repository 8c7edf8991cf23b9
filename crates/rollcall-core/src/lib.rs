//! rollcall-core: classroom face identification engine.
//!
//! Matches detector-produced face embeddings against an enrolled roster and
//! stabilizes identities across video frames by IoU tracking and majority vote.

pub mod analyzer;
pub mod consensus;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod matcher;
pub mod roster;
pub mod types;

pub use analyzer::{Analyzer, AnalyzerError, FaceAnnotation};
pub use consensus::{
    Annotation, ConsensusConfig, FrameOutcome, FrameReport, SessionState, StableResult, Track,
    TrackConsensus,
};
pub use error::{ConfigError, SessionError};
pub use filter::DetectionFilter;
pub use matcher::{EmbeddingMatcher, MatchParams, MatchResult, Matcher, SimilarityMetric};
pub use roster::{Roster, RosterEntry, RosterError};
pub use types::{parse_frame, BoundingBox, Detection, Embedding, Identity, Label, ParsedFrame};
