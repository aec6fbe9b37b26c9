//! Structured observability hooks for training and evaluation runs.
//!
//! Events are emitted at `info!` level; checkpoint misses at `warn!`.
//! Filter with `RUST_LOG` (e.g. `RUST_LOG=zsl_core=debug` to also see
//! every calibration step).

use tracing::{info, warn};
use uuid::Uuid;

/// RAII guard that enters a run-scoped span for the duration of a run.
pub struct RunSpan {
    run_id: Uuid,
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with a fresh run id.
    pub fn enter(data: &str) -> Self {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("zsl.run", run_id = %run_id, data = %data);
        Self {
            run_id,
            _span: span.entered(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

pub fn emit_run_started(data: &str, arch: &str, seed: u64) {
    info!(event = "run.started", data = %data, arch = %arch, seed = seed);
}

pub fn emit_epoch_finished(epoch: usize, batches: usize, mean_loss: f64) {
    info!(event = "epoch.finished", epoch = epoch, batches = batches, mean_loss = mean_loss);
}

pub fn emit_eval_finished(seen: usize, unseen: usize, h: f64, h_opt: f64, score: f64) {
    info!(
        event = "eval.finished",
        seen_examples = seen,
        unseen_examples = unseen,
        h = h,
        h_opt = h_opt,
        score = score,
    );
}

pub fn emit_checkpoint_saved(path: &std::path::Path, epoch: usize, best: f64) {
    info!(event = "checkpoint.saved", path = %path.display(), epoch = epoch, best = best);
}

pub fn emit_checkpoint_missing(path: &std::path::Path) {
    warn!(event = "checkpoint.missing", path = %path.display());
}
