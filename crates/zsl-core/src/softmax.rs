//! Softmax normalisation and flip-test view averaging.

use ndarray::{Array2, ArrayView2, Axis};

use crate::domain::{Result, ZslError};

/// Row-wise softmax. Each row is shifted by its maximum before
/// exponentiation so large logits stay finite; the result is identical to
/// the unshifted formula.
pub fn softmax_rows(logits: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.rows_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Softmax a `(examples * views, classes)` logit matrix, then average the
/// probabilities of each example's views into one row.
///
/// Rows are grouped example-major: rows `i*views .. (i+1)*views` belong to
/// example `i`.
pub fn softmax_view_mean(logits: ArrayView2<'_, f32>, views: usize) -> Result<Array2<f32>> {
    let (rows, classes) = logits.dim();
    if views == 0 || rows % views != 0 {
        return Err(ZslError::shape(
            "flip-test logits",
            format!("rows divisible by {} views", views),
            (rows, classes),
        ));
    }
    let probs = softmax_rows(logits).as_standard_layout().into_owned();
    let grouped = probs
        .into_shape((rows / views, views, classes))
        .map_err(|e| ZslError::shape("flip-test logits", (rows / views, views, classes), e.to_string()))?;
    grouped
        .mean_axis(Axis(1))
        .ok_or_else(|| ZslError::shape("flip-test logits", "non-empty view axis", views))
}
