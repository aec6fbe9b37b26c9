//! Restricted-prediction policy.
//!
//! Suppressing a class forces its column to [`SUPPRESSED`], below any valid
//! probability, so a row-wise argmax can only pick an allowed class.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::domain::ClassSet;
use crate::tensor::row_argmax;

/// Sentinel written into suppressed columns.
pub const SUPPRESSED: f32 = -1.0;

/// Copy of `probabilities` with every column in `suppress` set to [`SUPPRESSED`].
/// Ids beyond the matrix width are ignored.
pub fn suppress_classes(probabilities: ArrayView2<'_, f32>, suppress: &ClassSet) -> Array2<f32> {
    let mut out = probabilities.to_owned();
    let width = out.ncols();
    for class in suppress.iter().filter(|&c| c < width) {
        out.column_mut(class).fill(SUPPRESSED);
    }
    out
}

/// Argmax over the columns not in `suppress`.
pub fn restricted_argmax(probabilities: ArrayView2<'_, f32>, suppress: &ClassSet) -> Vec<usize> {
    row_argmax(suppress_classes(probabilities, suppress).view())
}

/// The three prediction vectors retained per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictedPredictions {
    /// Argmax with unseen classes suppressed.
    pub seen_only: Vec<usize>,
    /// Argmax with seen classes suppressed.
    pub unseen_only: Vec<usize>,
    /// Plain argmax over every class.
    pub all: Vec<usize>,
}

impl RestrictedPredictions {
    pub fn compute(probabilities: ArrayView2<'_, f32>, seen: &ClassSet, unseen: &ClassSet) -> Self {
        Self {
            seen_only: restricted_argmax(probabilities, unseen),
            unseen_only: restricted_argmax(probabilities, seen),
            all: row_argmax(probabilities),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn set(ids: &[usize]) -> ClassSet {
        ClassSet::new(ids.to_vec()).expect("class set")
    }

    #[test]
    fn suppressed_class_never_wins() {
        let probs = array![[0.1, 0.9, 0.05]];
        assert_eq!(restricted_argmax(probs.view(), &set(&[1])), vec![0]);
    }

    #[test]
    fn suppression_leaves_source_untouched() {
        let probs = array![[0.3, 0.7]];
        let restricted = suppress_classes(probs.view(), &set(&[1]));
        assert_eq!(restricted, array![[0.3, SUPPRESSED]]);
        assert_eq!(probs, array![[0.3, 0.7]]);
    }

    #[test]
    fn three_views_per_stream() {
        let probs = array![[0.5, 0.3, 0.2], [0.1, 0.2, 0.7], [0.2, 0.6, 0.2]];
        let seen = set(&[0, 2]);
        let unseen = set(&[1]);
        let preds = RestrictedPredictions::compute(probs.view(), &seen, &unseen);
        assert_eq!(preds.all, vec![0, 2, 1]);
        assert_eq!(preds.seen_only, vec![0, 2, 0]);
        assert_eq!(preds.unseen_only, vec![1, 1, 1]);
    }
}
