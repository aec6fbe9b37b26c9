//! Domain calibration search.
//!
//! A one-dimensional grid search over a confidence threshold `base`. For
//! every example the all-class prediction is kept when its maximum
//! probability reaches `base`; below it the example is treated as belonging
//! to the unseen domain and re-predicted with the seen classes suppressed.
//! The step with the highest harmonic mean of seen and unseen per-class
//! accuracy wins (strictly greater, so ties keep the earliest step).
//!
//! The reported threshold is `tau = -base * ln(base)`; the decision itself
//! always compares the raw maximum probability against `base`.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::CombinedResult;
use crate::domain::{ClassSet, Result, ZslError};
use crate::metrics::{domain_membership_accuracy, harmonic_mean, per_class_accuracy};
use crate::restrict::restricted_argmax;
use crate::tensor::{row_argmax, row_max};

/// How the prediction vector carries over between grid steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideStrategy {
    /// Every step starts again from the all-class argmax.
    #[default]
    ResetPerStep,
    /// Overrides from earlier steps persist into later ones.
    Ratchet,
}

/// Which head supplies the all-class prediction and its confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    #[default]
    Embedding,
    ClosedSet,
}

/// Grid and policy for the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub strategy: OverrideStrategy,
    pub source: ConfidenceSource,
    /// Thresholds visited in order.
    pub bases: Vec<f64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            strategy: OverrideStrategy::default(),
            source: ConfidenceSource::default(),
            bases: default_bases(),
        }
    }
}

impl CalibrationConfig {
    pub fn with_strategy(mut self, strategy: OverrideStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_source(mut self, source: ConfidenceSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_bases(mut self, bases: Vec<f64>) -> Self {
        self.bases = bases;
        self
    }
}

/// `0.1, 0.2, ..., 0.9`, computed as `0.1 * step + 0.1`.
pub fn default_bases() -> Vec<f64> {
    (0..9).map(|step| 0.1 * step as f64 + 0.1).collect()
}

/// `-base * ln(base)`.
pub fn threshold_tau(base: f64) -> f64 {
    -base * base.ln()
}

/// Metrics of a single grid step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStep {
    pub base: f64,
    pub tau: f64,
    pub seen_accuracy: f64,
    pub unseen_accuracy: f64,
    pub harmonic: f64,
    pub seen_domain_accuracy: f64,
    pub unseen_domain_accuracy: f64,
}

/// The winning step. All zeros when no step produced a positive harmonic mean.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub tau: f64,
    pub base: f64,
    pub harmonic: f64,
    pub seen_accuracy: f64,
    pub unseen_accuracy: f64,
    pub seen_domain_accuracy: f64,
    pub unseen_domain_accuracy: f64,
}

impl From<CalibrationStep> for CalibrationOutcome {
    fn from(step: CalibrationStep) -> Self {
        Self {
            tau: step.tau,
            base: step.base,
            harmonic: step.harmonic,
            seen_accuracy: step.seen_accuracy,
            unseen_accuracy: step.unseen_accuracy,
            seen_domain_accuracy: step.seen_domain_accuracy,
            unseen_domain_accuracy: step.unseen_domain_accuracy,
        }
    }
}

/// Outcome plus the metrics of every visited step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSearch {
    pub outcome: CalibrationOutcome,
    pub steps: Vec<CalibrationStep>,
}

/// Inputs shared by every grid step.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationInput<'a> {
    /// Probabilities whose argmax and maximum drive the keep/override decision.
    pub all_class_probability: ArrayView2<'a, f32>,
    /// Embedding-head probabilities used for the seen-suppressed fallback.
    pub embedding_probability: ArrayView2<'a, f32>,
    pub ground_truth: &'a [usize],
    pub split_index: usize,
    pub seen_classes: &'a ClassSet,
    pub unseen_classes: &'a ClassSet,
}

impl<'a> CalibrationInput<'a> {
    pub fn from_combined(
        combined: &'a CombinedResult,
        seen_classes: &'a ClassSet,
        unseen_classes: &'a ClassSet,
        source: ConfidenceSource,
    ) -> Self {
        let all_class_probability = match source {
            ConfidenceSource::Embedding => combined.embedding_probability.view(),
            ConfidenceSource::ClosedSet => combined.closed_set_probability.view(),
        };
        Self {
            all_class_probability,
            embedding_probability: combined.embedding_probability.view(),
            ground_truth: &combined.ground_truth,
            split_index: combined.split_index,
            seen_classes,
            unseen_classes,
        }
    }

    fn validate(&self) -> Result<()> {
        let rows = self.ground_truth.len();
        if self.all_class_probability.nrows() != rows {
            return Err(ZslError::shape(
                "calibration confidence rows",
                rows,
                self.all_class_probability.nrows(),
            ));
        }
        if self.embedding_probability.nrows() != rows {
            return Err(ZslError::shape(
                "calibration embedding rows",
                rows,
                self.embedding_probability.nrows(),
            ));
        }
        if self.split_index > rows {
            return Err(ZslError::shape("calibration split index", rows, self.split_index));
        }
        Ok(())
    }
}

/// Run the grid search.
pub fn search(input: &CalibrationInput<'_>, config: &CalibrationConfig) -> Result<CalibrationSearch> {
    input.validate()?;
    let baseline = row_argmax(input.all_class_probability);
    let confidence = row_max(input.all_class_probability);
    let fallback = restricted_argmax(input.embedding_probability, input.seen_classes);

    let (gt_s, gt_t) = input.ground_truth.split_at(input.split_index);
    let mut pre = baseline.clone();
    let mut outcome = CalibrationOutcome::default();
    let mut steps = Vec::with_capacity(config.bases.len());

    for &base in &config.bases {
        if config.strategy == OverrideStrategy::ResetPerStep {
            pre.copy_from_slice(&baseline);
        }
        for ((p, &conf), &fb) in pre.iter_mut().zip(&confidence).zip(&fallback) {
            if f64::from(conf) < base {
                *p = fb;
            }
        }

        let (pre_s, pre_t) = pre.split_at(input.split_index);
        let seen_accuracy = per_class_accuracy(gt_s, pre_s, input.seen_classes);
        let unseen_accuracy = per_class_accuracy(gt_t, pre_t, input.unseen_classes);
        let step = CalibrationStep {
            base,
            tau: threshold_tau(base),
            seen_accuracy,
            unseen_accuracy,
            harmonic: harmonic_mean(seen_accuracy, unseen_accuracy),
            seen_domain_accuracy: domain_membership_accuracy(pre_s, input.seen_classes),
            unseen_domain_accuracy: domain_membership_accuracy(pre_t, input.unseen_classes),
        };
        debug!(
            event = "calibration.step",
            base = step.base,
            s = step.seen_accuracy,
            u = step.unseen_accuracy,
            h = step.harmonic,
            ds = step.seen_domain_accuracy,
            du = step.unseen_domain_accuracy,
        );

        if step.harmonic > outcome.harmonic {
            outcome = step.into();
        }
        steps.push(step);
    }

    Ok(CalibrationSearch { outcome, steps })
}

/// Search directly over a combined seen/unseen result.
pub fn calibrate(
    combined: &CombinedResult,
    seen_classes: &ClassSet,
    unseen_classes: &ClassSet,
    config: &CalibrationConfig,
) -> Result<CalibrationOutcome> {
    let input = CalibrationInput::from_combined(combined, seen_classes, unseen_classes, config.source);
    Ok(search(&input, config)?.outcome)
}

/// Domain-separation estimate from one head's maximum probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DomainSeparation {
    /// Fraction of seen-stream examples above the threshold.
    pub seen_accuracy: f64,
    /// Fraction of unseen-stream examples below the threshold.
    pub unseen_accuracy: f64,
    pub tau: f64,
}

/// Ten-step search over `tau = 0.1 * step` that separates the two streams
/// by maximum probability alone: seen examples should score above `tau`,
/// unseen examples below it. Class correctness is not considered.
pub fn optimal_domain_separation(
    seen_probability: ArrayView2<'_, f32>,
    unseen_probability: ArrayView2<'_, f32>,
) -> DomainSeparation {
    let max_s = row_max(seen_probability);
    let max_t = row_max(unseen_probability);
    let mut best = DomainSeparation::default();
    let mut best_h = 0.0;

    for step in 0..10 {
        let tau = 0.1 * step as f64;
        let acc_s = max_s.iter().filter(|&&m| f64::from(m) > tau).count() as f64 / max_s.len() as f64;
        let acc_t = max_t.iter().filter(|&&m| f64::from(m) < tau).count() as f64 / max_t.len() as f64;
        let h = harmonic_mean(acc_s, acc_t);
        if h > best_h {
            best_h = h;
            best = DomainSeparation {
                seen_accuracy: acc_s,
                unseen_accuracy: acc_t,
                tau,
            };
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn set(ids: &[usize]) -> ClassSet {
        ClassSet::new(ids.to_vec()).expect("class set")
    }

    fn two_class_combined() -> CombinedResult {
        let probs = array![[0.9, 0.1], [0.9, 0.1], [0.2, 0.8], [0.2, 0.8]];
        CombinedResult {
            ground_truth: vec![0, 0, 1, 1],
            closed_set_probability: probs.clone(),
            embedding_probability: probs,
            split_index: 2,
        }
    }

    #[test]
    fn default_grid_has_nine_ascending_bases() {
        let bases = default_bases();
        assert_eq!(bases.len(), 9);
        assert!((bases[0] - 0.1).abs() < 1e-12);
        assert!((bases[8] - 0.9).abs() < 1e-12);
        assert!(bases.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn tau_is_entropy_of_base() {
        assert!((threshold_tau(0.5) - 0.3466).abs() < 1e-4);
        assert!((threshold_tau(0.1) - 0.230_258_5).abs() < 1e-6);
    }

    #[test]
    fn separable_streams_reach_perfect_harmonic_mean() {
        let combined = two_class_combined();
        let (seen, unseen) = (set(&[0]), set(&[1]));
        let outcome = calibrate(&combined, &seen, &unseen, &CalibrationConfig::default())
            .expect("calibrate");
        assert_eq!(outcome.harmonic, 1.0);
        assert_eq!(outcome.seen_accuracy, 1.0);
        assert_eq!(outcome.unseen_accuracy, 1.0);
        assert_eq!(outcome.seen_domain_accuracy, 1.0);
        assert_eq!(outcome.unseen_domain_accuracy, 1.0);
        assert!(outcome.base <= 0.8);
        // ties keep the earliest step
        assert!((outcome.base - 0.1).abs() < 1e-12);
        assert!((outcome.tau - threshold_tau(0.1)).abs() < 1e-12);
    }

    #[test]
    fn every_step_is_evaluated() {
        let combined = two_class_combined();
        let (seen, unseen) = (set(&[0]), set(&[1]));
        let input = CalibrationInput::from_combined(&combined, &seen, &unseen, ConfidenceSource::Embedding);
        let result = search(&input, &CalibrationConfig::default()).expect("search");
        assert_eq!(result.steps.len(), 9);
        // at base 0.9 the seen examples (max 0.9f32 < 0.9) are pushed to class 1
        let last = result.steps[8];
        assert_eq!(last.seen_accuracy, 0.0);
        assert_eq!(last.unseen_accuracy, 1.0);
        assert_eq!(last.harmonic, 0.0);
        assert_eq!(last.seen_domain_accuracy, 0.0);
    }

    #[test]
    fn search_is_deterministic() {
        let combined = two_class_combined();
        let (seen, unseen) = (set(&[0]), set(&[1]));
        let config = CalibrationConfig::default();
        let a = calibrate(&combined, &seen, &unseen, &config).expect("first");
        let b = calibrate(&combined, &seen, &unseen, &config).expect("second");
        assert_eq!(a.harmonic.to_bits(), b.harmonic.to_bits());
        assert_eq!(a.tau.to_bits(), b.tau.to_bits());
        assert_eq!(a, b);
    }

    #[test]
    fn strategies_agree_on_ascending_grid() {
        let combined = CombinedResult {
            ground_truth: vec![0, 2, 1, 1, 3],
            closed_set_probability: Array2::zeros((5, 4)),
            embedding_probability: array![
                [0.6, 0.1, 0.2, 0.1],
                [0.3, 0.3, 0.35, 0.05],
                [0.45, 0.4, 0.1, 0.05],
                [0.2, 0.7, 0.05, 0.05],
                [0.25, 0.2, 0.3, 0.25]
            ],
            split_index: 2,
        };
        let (seen, unseen) = (set(&[0, 2]), set(&[1, 3]));
        let reset = CalibrationConfig::default();
        let ratchet = CalibrationConfig::default().with_strategy(OverrideStrategy::Ratchet);
        let input = CalibrationInput::from_combined(&combined, &seen, &unseen, ConfidenceSource::Embedding);
        let a = search(&input, &reset).expect("reset");
        let b = search(&input, &ratchet).expect("ratchet");
        assert_eq!(a, b);
    }

    #[test]
    fn ratchet_keeps_overrides_from_earlier_steps() {
        let combined = two_class_combined();
        let (seen, unseen) = (set(&[0]), set(&[1]));
        let descending = vec![0.9, 0.1];

        let reset = CalibrationConfig::default().with_bases(descending.clone());
        let outcome = calibrate(&combined, &seen, &unseen, &reset).expect("reset");
        assert_eq!(outcome.harmonic, 1.0);
        assert!((outcome.base - 0.1).abs() < 1e-12);

        let ratchet = reset.with_strategy(OverrideStrategy::Ratchet);
        let input = CalibrationInput::from_combined(&combined, &seen, &unseen, ConfidenceSource::Embedding);
        let result = search(&input, &ratchet).expect("ratchet");
        assert_eq!(result.steps[1].seen_accuracy, 0.0);
        assert_eq!(result.outcome, CalibrationOutcome::default());
    }

    #[test]
    fn closed_set_source_reads_closed_set_confidence() {
        let mut combined = two_class_combined();
        // closed-set head is unsure about everything, so every example is
        // routed to the unseen fallback once base exceeds 0.5
        combined.closed_set_probability = array![[0.55, 0.45], [0.55, 0.45], [0.45, 0.55], [0.45, 0.55]];
        let (seen, unseen) = (set(&[0]), set(&[1]));
        let config = CalibrationConfig::default().with_source(ConfidenceSource::ClosedSet);
        let input = CalibrationInput::from_combined(&combined, &seen, &unseen, config.source);
        let result = search(&input, &config).expect("search");
        assert_eq!(result.steps[4].harmonic, 1.0);
        assert_eq!(result.steps[5].seen_accuracy, 0.0);
    }

    #[test]
    fn zero_harmonic_everywhere_leaves_default_outcome() {
        let combined = CombinedResult {
            ground_truth: vec![0, 1],
            closed_set_probability: array![[0.1, 0.9], [0.9, 0.1]],
            embedding_probability: array![[0.1, 0.9], [0.9, 0.1]],
            split_index: 1,
        };
        let (seen, unseen) = (set(&[0]), set(&[1]));
        let outcome = calibrate(&combined, &seen, &unseen, &CalibrationConfig::default())
            .expect("calibrate");
        assert_eq!(outcome, CalibrationOutcome::default());
    }

    #[test]
    fn bad_split_index_rejected() {
        let mut combined = two_class_combined();
        combined.split_index = 9;
        let (seen, unseen) = (set(&[0]), set(&[1]));
        assert!(calibrate(&combined, &seen, &unseen, &CalibrationConfig::default()).is_err());
    }

    #[test]
    fn domain_separation_picks_best_threshold() {
        let seen = array![[0.9, 0.1], [0.8, 0.2]];
        let unseen = array![[0.55, 0.45], [0.6, 0.4]];
        let sep = optimal_domain_separation(seen.view(), unseen.view());
        assert_eq!(sep.seen_accuracy, 1.0);
        assert_eq!(sep.unseen_accuracy, 1.0);
        assert!((sep.tau - 0.7).abs() < 1e-12);
    }
}
