//! Enrollment store documents.
//!
//! The enrollment store posts `{"students": [{"name": ..., "descriptors": [[...]]}]}`.
//! A bare array of students is accepted as well.

use crate::types::Identity;
use serde::{Deserialize, Serialize};
use std::io::Read;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("malformed roster: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read roster: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roster {
    pub students: Vec<Identity>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterDocument {
    Wrapped { students: Vec<Identity> },
    Bare(Vec<Identity>),
}

/// One line of a roster listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub label: String,
    pub descriptors: usize,
}

impl Roster {
    pub fn from_json(json: &str) -> Result<Self, RosterError> {
        Ok(serde_json::from_str::<RosterDocument>(json)?.into())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RosterError> {
        Ok(serde_json::from_reader::<_, RosterDocument>(reader)?.into())
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn summary(&self) -> Vec<RosterEntry> {
        self.students
            .iter()
            .map(|s| RosterEntry {
                label: s.label.clone(),
                descriptors: s.embeddings.len(),
            })
            .collect()
    }

    pub fn into_identities(self) -> Vec<Identity> {
        self.students
    }
}

impl From<RosterDocument> for Roster {
    fn from(doc: RosterDocument) -> Self {
        match doc {
            RosterDocument::Wrapped { students } | RosterDocument::Bare(students) => {
                Roster { students }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_document() {
        let json = r#"{"students": [
            {"name": "Alice", "descriptors": [[1.0, 0.0], [0.9, 0.1]]},
            {"name": "Bob", "descriptors": [[0.0, 1.0]]}
        ]}"#;
        let roster = Roster::from_json(json).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(
            roster.summary(),
            vec![
                RosterEntry { label: "Alice".into(), descriptors: 2 },
                RosterEntry { label: "Bob".into(), descriptors: 1 },
            ]
        );
    }

    #[test]
    fn test_bare_array() {
        let json = r#"[{"label": "Alice", "embeddings": [[1.0]]}]"#;
        let roster = Roster::from_reader(json.as_bytes()).unwrap();
        assert_eq!(roster.into_identities()[0].label, "Alice");
    }

    #[test]
    fn test_missing_descriptors_defaults_empty() {
        let roster = Roster::from_json(r#"{"students": [{"name": "Nobody"}]}"#).unwrap();
        assert!(roster.students[0].embeddings.is_empty());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            Roster::from_json(r#"{"students": 3}"#),
            Err(RosterError::Parse(_))
        ));
    }
}
