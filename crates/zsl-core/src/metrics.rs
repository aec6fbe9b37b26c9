//! Metric primitives over label vectors and probability matrices.
//!
//! All functions are pure. Undefined results (empty inputs, `0/0` in the
//! harmonic mean) come back as `NaN` rather than a masked zero.

use ndarray::ArrayView2;

use crate::domain::ClassSet;
use crate::tensor::row_max;

/// Macro-averaged per-class accuracy over `classes`.
///
/// For every class, the fraction of its ground-truth examples that were
/// predicted correctly. A class with no ground-truth support contributes
/// `0.0` to the mean rather than being dropped. Returns `NaN` when
/// `classes` is empty.
///
/// # Panics
///
/// When `ground_truth` and `predictions` differ in length.
pub fn per_class_accuracy(ground_truth: &[usize], predictions: &[usize], classes: &ClassSet) -> f64 {
    assert_eq!(
        ground_truth.len(),
        predictions.len(),
        "ground truth and predictions must be the same length"
    );
    let bound = classes.id_bound();
    let mut support = vec![0usize; bound];
    let mut correct = vec![0usize; bound];
    for (&gt, &pred) in ground_truth.iter().zip(predictions) {
        if gt < bound {
            support[gt] += 1;
            if gt == pred {
                correct[gt] += 1;
            }
        }
    }
    let total: f64 = classes
        .iter()
        .map(|class| match support[class] {
            0 => 0.0,
            n => correct[class] as f64 / n as f64,
        })
        .sum();
    total / classes.len() as f64
}

/// Fraction of predictions that land anywhere inside `domain`.
pub fn domain_membership_accuracy(predictions: &[usize], domain: &ClassSet) -> f64 {
    let inside = predictions.iter().filter(|&&p| domain.contains(p)).count();
    inside as f64 / predictions.len() as f64
}

/// `2ab / (a + b)`. Yields `NaN` when both inputs are zero.
pub fn harmonic_mean(a: f64, b: f64) -> f64 {
    2.0 * a * b / (a + b)
}

/// Row-wise `-p_max * ln(p_max)`, where `p_max` is the row maximum.
///
/// Only the winning class enters the sum. The domain calibration search
/// reports its thresholds with the same transform.
pub fn entropy_of_max(probabilities: ArrayView2<'_, f32>) -> Vec<f64> {
    row_max(probabilities)
        .into_iter()
        .map(|p| {
            let p = f64::from(p);
            -p * p.ln()
        })
        .collect()
}

/// Top-k precision in percent for each `k`, computed from raw scores.
pub fn top_k_precision(scores: ArrayView2<'_, f32>, targets: &[usize], ks: &[usize]) -> Vec<f64> {
    let max_k = ks.iter().copied().max().unwrap_or(0);
    let mut hits = vec![0usize; ks.len()];
    for (row, &target) in scores.rows().into_iter().zip(targets) {
        let mut order: Vec<usize> = (0..row.len()).collect();
        order.sort_by(|&a, &b| row[b].total_cmp(&row[a]).then(a.cmp(&b)));
        if let Some(rank) = order.iter().take(max_k).position(|&c| c == target) {
            for (hit, &k) in hits.iter_mut().zip(ks) {
                if rank < k {
                    *hit += 1;
                }
            }
        }
    }
    hits.into_iter()
        .map(|h| h as f64 * 100.0 / targets.len() as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn set(ids: &[usize]) -> ClassSet {
        ClassSet::new(ids.to_vec()).expect("class set")
    }

    #[test]
    fn perfect_predictions_give_full_accuracy() {
        let gt = vec![0, 1, 1, 2, 0, 2, 2];
        assert_eq!(per_class_accuracy(&gt, &gt, &set(&[0, 1, 2])), 1.0);
    }

    #[test]
    fn unsupported_class_contributes_zero() {
        let gt = vec![0, 0, 0];
        assert_eq!(per_class_accuracy(&gt, &gt, &set(&[0, 1])), 0.5);
    }

    #[test]
    fn accuracy_is_macro_averaged() {
        // class 0: 3/4 correct, class 1: 0/1 correct
        let gt = vec![0, 0, 0, 0, 1];
        let pred = vec![0, 0, 0, 1, 0];
        assert_eq!(per_class_accuracy(&gt, &pred, &set(&[0, 1])), 0.375);
    }

    #[test]
    fn classes_outside_set_are_ignored() {
        let gt = vec![0, 5, 5];
        let pred = vec![0, 0, 0];
        assert_eq!(per_class_accuracy(&gt, &pred, &set(&[0])), 1.0);
    }

    #[test]
    #[should_panic(expected = "same length")]
    fn mismatched_lengths_panic() {
        per_class_accuracy(&[0, 1], &[0], &set(&[0, 1]));
    }

    #[test]
    fn empty_class_set_is_nan() {
        assert!(per_class_accuracy(&[0], &[0], &set(&[])).is_nan());
    }

    #[test]
    fn domain_membership_ignores_correctness() {
        let seen = set(&[0, 2]);
        assert_eq!(domain_membership_accuracy(&[0, 2, 1, 2], &seen), 0.75);
        assert!(domain_membership_accuracy(&[], &seen).is_nan());
    }

    #[test]
    fn harmonic_mean_values() {
        assert!((harmonic_mean(0.8, 0.2) - 0.32).abs() < 1e-12);
        assert_eq!(harmonic_mean(1.0, 1.0), 1.0);
        assert_eq!(harmonic_mean(0.0, 1.0), 0.0);
    }

    #[test]
    fn harmonic_mean_of_zeros_is_nan() {
        assert!(harmonic_mean(0.0, 0.0).is_nan());
    }

    #[test]
    fn entropy_uses_only_row_maximum() {
        let e = entropy_of_max(array![[0.5, 0.5]].view());
        assert!((e[0] - 0.3466).abs() < 1e-4);
        assert!((e[0] - (-0.5f64 * 0.5f64.ln())).abs() < 1e-12);

        let e = entropy_of_max(array![[0.1, 0.7, 0.2], [1.0, 0.0, 0.0]].view());
        assert!((e[0] - (-0.7f64 * 0.7f64.ln())).abs() < 1e-6);
        assert_eq!(e[1], 0.0);
    }

    #[test]
    fn top_k_precision_percent() {
        let scores = array![[0.1, 0.7, 0.2], [0.5, 0.3, 0.2], [0.2, 0.3, 0.5]];
        let targets = vec![1, 1, 0];
        let p = top_k_precision(scores.view(), &targets, &[1, 2, 3]);
        assert!((p[0] - 100.0 / 3.0).abs() < 1e-9);
        assert!((p[1] - 200.0 / 3.0).abs() < 1e-9);
        assert!((p[2] - 100.0).abs() < 1e-9);
    }
}
