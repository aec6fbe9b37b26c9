//! Batch aggregation of inference outputs over seen and unseen streams.
//!
//! An evaluation stream is consumed end to end, in order. Each batch goes
//! through the [`InferenceModel`], its logits are normalised exactly once
//! (plain softmax, or softmax followed by a mean over flip-test views) and
//! the rows are appended in stream order.

use ndarray::{concatenate, Array2, ArrayD, ArrayView2, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Result, ZslError};
use crate::softmax::{softmax_rows, softmax_view_mean};

/// One batch of model inputs with integer targets.
///
/// With flip testing disabled `input` is `(N, ...)`; with it enabled it is
/// `(N, views, ...)` and every example carries all of its views.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub input: ArrayD<f32>,
    pub targets: Vec<usize>,
}

impl Batch {
    pub fn new(input: ArrayD<f32>, targets: Vec<usize>) -> Self {
        Self { input, targets }
    }
}

/// Raw output of the model collaborator for one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub closed_set_logits: Array2<f32>,
    pub embedding_logits: Array2<f32>,
    pub features: Option<Array2<f32>>,
}

/// Forward pass of the external model, without gradient tracking.
pub trait InferenceModel {
    /// Switch to inference behaviour (frozen normalisation statistics, no dropout).
    fn eval_mode(&mut self) {}

    /// Map a batch of inputs to closed-set and embedding logits.
    fn infer(&mut self, input: &ArrayD<f32>) -> Result<ModelOutput>;
}

/// Per-stream aggregation: ground truth plus normalised probabilities from
/// both heads, rows in stream order.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResult {
    pub ground_truth: Vec<usize>,
    pub closed_set_probability: Array2<f32>,
    pub embedding_probability: Array2<f32>,
}

impl AggregatedResult {
    pub fn len(&self) -> usize {
        self.ground_truth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ground_truth.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.embedding_probability.ncols()
    }
}

/// Accumulates batches of one evaluation stream.
#[derive(Debug)]
pub struct BatchAggregator {
    num_classes: usize,
    flip_test: bool,
    ground_truth: Vec<usize>,
    closed_set: Vec<f32>,
    embedding: Vec<f32>,
}

impl BatchAggregator {
    pub fn new(num_classes: usize, flip_test: bool) -> Self {
        Self {
            num_classes,
            flip_test,
            ground_truth: Vec::new(),
            closed_set: Vec::new(),
            embedding: Vec::new(),
        }
    }

    /// Run inference over every batch of `stream` and append the results.
    pub fn consume<M, I>(&mut self, model: &mut M, stream: I) -> Result<()>
    where
        M: InferenceModel + ?Sized,
        I: IntoIterator<Item = Result<Batch>>,
    {
        for (index, batch) in stream.into_iter().enumerate() {
            let batch = batch?;
            self.consume_batch(model, batch)?;
            debug!(batch = index, examples = self.ground_truth.len(), "batch aggregated");
        }
        Ok(())
    }

    fn consume_batch<M>(&mut self, model: &mut M, batch: Batch) -> Result<()>
    where
        M: InferenceModel + ?Sized,
    {
        let Batch { input, targets } = batch;
        if self.flip_test {
            let (input, views) = merge_view_axis(input)?;
            let output = model.infer(&input)?;
            let closed = softmax_view_mean(output.closed_set_logits.view(), views)?;
            let embedding = softmax_view_mean(output.embedding_logits.view(), views)?;
            self.push_probabilities(&targets, closed.view(), embedding.view())
        } else {
            let output = model.infer(&input)?;
            self.push_logits(&targets, &output)
        }
    }

    /// Append one batch of raw logits, applying softmax to both heads.
    pub fn push_logits(&mut self, targets: &[usize], output: &ModelOutput) -> Result<()> {
        let closed = softmax_rows(output.closed_set_logits.view());
        let embedding = softmax_rows(output.embedding_logits.view());
        self.push_probabilities(targets, closed.view(), embedding.view())
    }

    /// Append one batch of already-normalised probabilities.
    pub fn push_probabilities(
        &mut self,
        targets: &[usize],
        closed_set: ArrayView2<'_, f32>,
        embedding: ArrayView2<'_, f32>,
    ) -> Result<()> {
        let expected = (targets.len(), self.num_classes);
        if closed_set.dim() != expected {
            return Err(ZslError::shape("closed-set scores", expected, closed_set.dim()));
        }
        if embedding.dim() != expected {
            return Err(ZslError::shape("embedding scores", expected, embedding.dim()));
        }
        if let Some(&class) = targets.iter().find(|&&t| t >= self.num_classes) {
            return Err(ZslError::InvalidClass {
                class,
                num_classes: self.num_classes,
            });
        }
        self.ground_truth.extend_from_slice(targets);
        self.closed_set.extend(closed_set.iter().copied());
        self.embedding.extend(embedding.iter().copied());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ground_truth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ground_truth.is_empty()
    }

    pub fn finish(self) -> Result<AggregatedResult> {
        let shape = (self.ground_truth.len(), self.num_classes);
        let closed_set_probability = Array2::from_shape_vec(shape, self.closed_set)
            .map_err(|e| ZslError::shape("closed-set aggregate", shape, e.to_string()))?;
        let embedding_probability = Array2::from_shape_vec(shape, self.embedding)
            .map_err(|e| ZslError::shape("embedding aggregate", shape, e.to_string()))?;
        Ok(AggregatedResult {
            ground_truth: self.ground_truth,
            closed_set_probability,
            embedding_probability,
        })
    }
}

/// Collapse `(N, views, ...)` into `(N * views, ...)`.
fn merge_view_axis(input: ArrayD<f32>) -> Result<(ArrayD<f32>, usize)> {
    let shape = input.shape().to_vec();
    if shape.len() < 2 {
        return Err(ZslError::shape("flip-test input", "(N, views, ...)", shape));
    }
    let views = shape[1];
    let mut merged = vec![shape[0] * views];
    merged.extend_from_slice(&shape[2..]);
    let input = if input.is_standard_layout() {
        input
    } else {
        input.as_standard_layout().into_owned()
    };
    let input = input
        .into_shape(IxDyn(&merged))
        .map_err(|e| ZslError::shape("flip-test input", merged.clone(), e.to_string()))?;
    Ok((input, views))
}

/// Aggregate one full stream.
pub fn aggregate_stream<M, I>(
    model: &mut M,
    stream: I,
    num_classes: usize,
    flip_test: bool,
) -> Result<AggregatedResult>
where
    M: InferenceModel + ?Sized,
    I: IntoIterator<Item = Result<Batch>>,
{
    let mut aggregator = BatchAggregator::new(num_classes, flip_test);
    aggregator.consume(model, stream)?;
    aggregator.finish()
}

/// Seen-stream rows followed by unseen-stream rows, with the boundary index.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedResult {
    pub ground_truth: Vec<usize>,
    pub closed_set_probability: Array2<f32>,
    pub embedding_probability: Array2<f32>,
    pub split_index: usize,
}

impl CombinedResult {
    pub fn new(seen: &AggregatedResult, unseen: &AggregatedResult) -> Result<Self> {
        if seen.num_classes() != unseen.num_classes() {
            return Err(ZslError::shape(
                "combined result",
                seen.num_classes(),
                unseen.num_classes(),
            ));
        }
        let closed_set_probability = concatenate(
            Axis(0),
            &[seen.closed_set_probability.view(), unseen.closed_set_probability.view()],
        )
        .map_err(|e| ZslError::shape("combined closed-set", seen.num_classes(), e.to_string()))?;
        let embedding_probability = concatenate(
            Axis(0),
            &[seen.embedding_probability.view(), unseen.embedding_probability.view()],
        )
        .map_err(|e| ZslError::shape("combined embedding", seen.num_classes(), e.to_string()))?;
        let mut ground_truth = Vec::with_capacity(seen.len() + unseen.len());
        ground_truth.extend_from_slice(&seen.ground_truth);
        ground_truth.extend_from_slice(&unseen.ground_truth);
        Ok(Self {
            ground_truth,
            closed_set_probability,
            embedding_probability,
            split_index: seen.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.ground_truth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ground_truth.is_empty()
    }

    pub fn seen_ground_truth(&self) -> &[usize] {
        &self.ground_truth[..self.split_index]
    }

    pub fn unseen_ground_truth(&self) -> &[usize] {
        &self.ground_truth[self.split_index..]
    }
}

/// Summary of a finished aggregation pass, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCounts {
    pub seen: usize,
    pub unseen: usize,
}
