//! Recorded per-example scores, for evaluating a finished inference run
//! without the model in the loop.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregatedResult, BatchAggregator, ModelOutput};
use crate::domain::{Result, ZslError};

/// Scores of one evaluation stream, one row per example.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedStream {
    pub ground_truth: Vec<usize>,
    pub closed_set: Vec<Vec<f32>>,
    pub embedding: Vec<Vec<f32>>,
}

/// A seen and an unseen stream. With `normalized` unset the rows are raw
/// logits and get a softmax on aggregation; otherwise they are taken as
/// probabilities (e.g. already averaged over flip-test views).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedScores {
    pub seen: RecordedStream,
    pub unseen: RecordedStream,
    #[serde(default)]
    pub normalized: bool,
}

impl RecordedScores {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Aggregate both streams. Returns `(seen, unseen)`.
    pub fn aggregate(&self, num_classes: usize) -> Result<(AggregatedResult, AggregatedResult)> {
        Ok((
            aggregate_recorded(&self.seen, num_classes, self.normalized)?,
            aggregate_recorded(&self.unseen, num_classes, self.normalized)?,
        ))
    }
}

fn aggregate_recorded(stream: &RecordedStream, num_classes: usize, normalized: bool) -> Result<AggregatedResult> {
    let closed = to_matrix("recorded closed-set scores", &stream.closed_set, num_classes)?;
    let embedding = to_matrix("recorded embedding scores", &stream.embedding, num_classes)?;
    let mut aggregator = BatchAggregator::new(num_classes, false);
    if normalized {
        aggregator.push_probabilities(&stream.ground_truth, closed.view(), embedding.view())?;
    } else {
        let output = ModelOutput {
            closed_set_logits: closed,
            embedding_logits: embedding,
            features: None,
        };
        aggregator.push_logits(&stream.ground_truth, &output)?;
    }
    aggregator.finish()
}

fn to_matrix(context: &'static str, rows: &[Vec<f32>], num_classes: usize) -> Result<Array2<f32>> {
    if let Some(bad) = rows.iter().find(|row| row.len() != num_classes) {
        return Err(ZslError::shape(context, num_classes, bad.len()));
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), num_classes), flat)
        .map_err(|e| ZslError::shape(context, (rows.len(), num_classes), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = r#"{
        "seen": {
            "ground_truth": [0, 1],
            "closed_set": [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0]],
            "embedding": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
        },
        "unseen": {
            "ground_truth": [2],
            "closed_set": [[0.0, 0.0, 1.0]],
            "embedding": [[0.0, 0.0, 3.0]]
        }
    }"#;

    #[test]
    fn logits_are_softmaxed() {
        let scores = RecordedScores::from_json_str(RAW).expect("parse");
        assert!(!scores.normalized);
        let (seen, unseen) = scores.aggregate(3).expect("aggregate");
        assert_eq!(seen.ground_truth, vec![0, 1]);
        assert_eq!(unseen.len(), 1);
        for row in seen.embedding_probability.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!(unseen.embedding_probability[[0, 2]] > 0.9);
    }

    #[test]
    fn normalized_rows_are_kept() {
        let mut scores = RecordedScores::from_json_str(RAW).expect("parse");
        scores.normalized = true;
        let (seen, _) = scores.aggregate(3).expect("aggregate");
        assert_eq!(seen.embedding_probability[[0, 0]], 1.0);
    }

    #[test]
    fn ragged_rows_rejected() {
        let mut scores = RecordedScores::from_json_str(RAW).expect("parse");
        scores.seen.embedding[1].push(0.0);
        assert!(matches!(scores.aggregate(3), Err(ZslError::ShapeMismatch { .. })));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scores.json");
        std::fs::write(&path, RAW).expect("write");
        let scores = RecordedScores::load(&path).expect("load");
        assert_eq!(scores.unseen.ground_truth, vec![2]);
    }
}
