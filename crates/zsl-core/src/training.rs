//! Training loop around the external model collaborator.
//!
//! The model owns its parameters, optimisers and loss; this module owns the
//! schedule, the per-epoch bookkeeping, best-score tracking and the
//! checkpoint decision.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Batch, InferenceModel};
use crate::checkpoint::{checkpoint_path, save_checkpoint, Checkpoint};
use crate::config::ExperimentConfig;
use crate::domain::{Result, SemanticData};
use crate::evaluation::{validate, EvalOptions, EvaluationReport};
use crate::obs::{emit_checkpoint_saved, emit_epoch_finished, emit_run_started};
use crate::reporting::RunLog;

/// The four loss terms reported by the model, plus their weighted total.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub total: f64,
    /// Closed-set classification loss (`L_odr`).
    pub closed_set: f64,
    /// Semantic embedding loss (`L_zsl`).
    pub embedding: f64,
    pub auxiliary: f64,
    /// Frequency-domain loss (`L_fft`).
    pub frequency: f64,
}

/// How one training step updates parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdatePlan {
    /// One optimiser over all parameters, driven by the total loss.
    Joint,
    /// Closed-set head updated from its own loss, then the embedding
    /// parameters from `embedding + auxiliary + frequency * frequency_weight`.
    Split { frequency_weight: f64 },
}

/// Learning rates of the three parameter groups for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningRates {
    pub joint: f64,
    pub closed_set: f64,
    pub embedding: f64,
}

/// Step decay: every `epoch_decay` epochs the rates shrink by `factor`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrSchedule {
    pub lr1: f64,
    pub lr2: f64,
    pub epoch_decay: usize,
    pub factor: f64,
}

impl LrSchedule {
    pub fn new(lr1: f64, lr2: f64, epoch_decay: usize) -> Self {
        Self {
            lr1,
            lr2,
            epoch_decay,
            factor: 0.1,
        }
    }

    pub fn rates_for(&self, epoch: usize) -> LearningRates {
        let decay = self.factor.powi((epoch / self.epoch_decay.max(1)) as i32);
        LearningRates {
            joint: self.lr1 * decay,
            closed_set: self.lr1 * decay,
            embedding: self.lr2 * decay,
        }
    }
}

/// A model that can also be trained and serialised.
pub trait TrainableModel: InferenceModel {
    /// Enter training behaviour; `freeze_batch_norm` keeps normalisation
    /// layers in inference mode for a fixed backbone.
    fn train_mode(&mut self, freeze_batch_norm: bool);

    fn set_learning_rates(&mut self, rates: LearningRates);

    /// Forward, loss and parameter update for one batch. `attributes` holds
    /// the descriptor row of every target, in batch order.
    fn train_step(
        &mut self,
        batch: &Batch,
        attributes: ArrayView2<'_, f32>,
        plan: UpdatePlan,
    ) -> Result<LossBreakdown>;

    fn state_bytes(&self) -> Result<Vec<u8>>;

    fn load_state(&mut self, state: &[u8]) -> Result<()>;
}

/// Running best score, owned by the training loop.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BestScore {
    value: f64,
}

impl BestScore {
    pub fn new(value: f64) -> Self {
        Self { value }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Record `score`; returns true when it strictly beats the previous best.
    pub fn observe(&mut self, score: f64) -> bool {
        let is_best = score > self.value;
        if is_best {
            self.value = score;
        }
        is_best
    }
}

/// Per-epoch training summary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EpochSummary {
    pub batches: usize,
    pub mean_total_loss: f64,
    pub last: LossBreakdown,
}

fn progress_line(epoch: usize, index: usize, total: usize, loss: &LossBreakdown) -> String {
    format!(
        "Epoch: [{}][{}/{}] loss: L_odr {:.4} L_zsl {:.4} L_aux {:.4} L_fft {:.4} ;",
        epoch, index, total, loss.closed_set, loss.embedding, loss.auxiliary, loss.frequency
    )
}

/// Run one epoch over `batches`, logging progress every `print_freq` batches.
pub fn train_epoch<M, I>(
    model: &mut M,
    batches: I,
    semantic: &SemanticData,
    epoch: usize,
    config: &ExperimentConfig,
    log: &RunLog,
) -> anyhow::Result<EpochSummary>
where
    M: TrainableModel + ?Sized,
    I: IntoIterator<Item = Result<Batch>>,
    I::IntoIter: ExactSizeIterator,
{
    model.train_mode(config.is_fix);
    let plan = if config.pretrained {
        UpdatePlan::Split {
            frequency_weight: config.lossw,
        }
    } else {
        UpdatePlan::Joint
    };

    let batches = batches.into_iter();
    let total = batches.len();
    let print_freq = config.print_freq.max(1);
    let mut summary = EpochSummary::default();
    let mut loss_sum = 0.0;

    for (index, batch) in batches.enumerate() {
        let batch = batch?;
        let attributes = semantic.attributes.rows_for(&batch.targets)?;
        let loss = model.train_step(&batch, attributes.view(), plan)?;
        if index % print_freq == 0 {
            log.log_print(&progress_line(epoch, index, total, &loss))?;
        }
        loss_sum += loss.total;
        summary.batches += 1;
        summary.last = loss;
    }
    if summary.batches > 0 {
        summary.mean_total_loss = loss_sum / summary.batches as f64;
    }
    emit_epoch_finished(epoch, summary.batches, summary.mean_total_loss);
    Ok(summary)
}

/// Boxed stream of batches.
pub type BatchStream<'a> = Box<dyn ExactSizeIterator<Item = Result<Batch>> + 'a>;

/// Supplies fresh batch streams each epoch. Test streams are read in
/// fixed order and never reshuffled.
pub trait DataSource {
    fn train_batches(&mut self, epoch: usize) -> Result<BatchStream<'_>>;
    fn seen_test_batches(&self) -> Result<BatchStream<'_>>;
    fn unseen_test_batches(&self) -> Result<BatchStream<'_>>;
}

/// Result of one full epoch (train plus evaluation).
#[derive(Debug, Clone, PartialEq)]
pub struct EpochOutcome {
    pub epoch: usize,
    pub training: EpochSummary,
    pub evaluation: EvaluationReport,
    pub is_best: bool,
    pub best: f64,
}

/// Run epochs `start_epoch..epochs`: schedule, train, evaluate, track the
/// best score and checkpoint whenever it improves.
pub fn run_training<M, D>(
    model: &mut M,
    data: &mut D,
    semantic: &SemanticData,
    config: &ExperimentConfig,
    best: &mut BestScore,
    log: &RunLog,
) -> anyhow::Result<Vec<EpochOutcome>>
where
    M: TrainableModel + ?Sized,
    D: DataSource + ?Sized,
{
    emit_run_started(&config.data, &config.arch, config.seed.unwrap_or_default());
    let schedule = config.lr_schedule();
    let eval_options = EvalOptions {
        flip_test: config.flipping_test,
        calibration: config.calibration.clone(),
    };
    let mut outcomes = Vec::with_capacity(config.epochs.saturating_sub(config.start_epoch));

    for epoch in config.start_epoch..config.epochs {
        model.set_learning_rates(schedule.rates_for(epoch));
        let training = train_epoch(model, data.train_batches(epoch)?, semantic, epoch, config, log)?;

        let evaluation = validate(
            model,
            data.seen_test_batches()?,
            data.unseen_test_batches()?,
            semantic,
            &eval_options,
            log,
        )?;

        let is_best = best.observe(evaluation.score);
        if is_best {
            let path = checkpoint_path(&config.save_path, &config.arch, best.value(), config.is_fix);
            save_checkpoint(
                &path,
                &Checkpoint {
                    epoch: epoch + 1,
                    arch: config.arch.clone(),
                    best_prec1: best.value(),
                    state: model.state_bytes()?,
                },
            )?;
            emit_checkpoint_saved(&path, epoch + 1, best.value());
        }
        log.log_print(&format!("Best_prec:{:.4};", best.value()))?;

        outcomes.push(EpochOutcome {
            epoch,
            training,
            evaluation,
            is_best,
            best: best.value(),
        });
    }
    Ok(outcomes)
}
