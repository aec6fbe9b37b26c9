//! Row-wise reductions over score matrices.

use ndarray::ArrayView2;

/// Index of the maximum of every row. Ties resolve to the lowest index.
pub fn row_argmax(scores: ArrayView2<'_, f32>) -> Vec<usize> {
    scores
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for (i, &v) in row.iter().enumerate().skip(1) {
                if v > row[best] {
                    best = i;
                }
            }
            best
        })
        .collect()
}

/// Maximum value of every row.
pub fn row_max(scores: ArrayView2<'_, f32>) -> Vec<f32> {
    scores
        .rows()
        .into_iter()
        .map(|row| row.iter().copied().fold(f32::NEG_INFINITY, f32::max))
        .collect()
}
