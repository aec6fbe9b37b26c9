//! Checkpoint persistence.
//!
//! A checkpoint is a JSON envelope carrying the epoch, architecture name,
//! best score and the model state. The state travels hex-encoded together
//! with its SHA-256 digest, which is verified on load. Writes go to a
//! temporary file in the target directory and are renamed into place.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::domain::{Result, ZslError};
use crate::obs::emit_checkpoint_missing;
use crate::reporting::RunLog;
use crate::training::{BestScore, TrainableModel};

/// In-memory checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub epoch: usize,
    pub arch: String,
    pub best_prec1: f64,
    pub state: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    epoch: usize,
    arch: String,
    best_prec1: f64,
    state_digest: String,
    state: String,
}

fn digest_hex(state: &[u8]) -> String {
    hex::encode(Sha256::digest(state))
}

/// `<save_path>/fix.model` for a frozen backbone, otherwise
/// `<save_path>/<arch>_<best:.4>.model`.
pub fn checkpoint_path(save_path: &Path, arch: &str, best_prec1: f64, is_fix: bool) -> PathBuf {
    if is_fix {
        save_path.join("fix.model")
    } else {
        save_path.join(format!("{}_{:.4}.model", arch, best_prec1))
    }
}

/// Atomically write `checkpoint` to `path`.
pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let record = CheckpointRecord {
        epoch: checkpoint.epoch,
        arch: checkpoint.arch.clone(),
        best_prec1: checkpoint.best_prec1,
        state_digest: digest_hex(&checkpoint.state),
        state: hex::encode(&checkpoint.state),
    };
    let bytes = serde_json::to_vec(&record)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(path).map_err(|e| ZslError::Io(e.error))?;
    Ok(())
}

/// Read and verify a checkpoint.
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let raw = std::fs::read(path)?;
    let record: CheckpointRecord = serde_json::from_slice(&raw)?;
    let state = hex::decode(&record.state)
        .map_err(|e| ZslError::Checkpoint(format!("state is not valid hex: {}", e)))?;
    let actual = digest_hex(&state);
    if actual != record.state_digest {
        return Err(ZslError::DigestMismatch {
            expected: record.state_digest,
            actual,
        });
    }
    Ok(Checkpoint {
        epoch: record.epoch,
        arch: record.arch,
        best_prec1: record.best_prec1,
        state,
    })
}

/// What happened when resuming.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    Loaded { epoch: usize, best_prec1: f64 },
    Missing,
}

/// Restore model state from `path` if it exists.
///
/// A missing file is logged and the run continues with the model as is.
/// The checkpoint's best score is adopted only while `best` is still zero.
pub fn resume<M>(path: &Path, model: &mut M, best: &mut BestScore, log: &RunLog) -> anyhow::Result<ResumeOutcome>
where
    M: TrainableModel + ?Sized,
{
    if !path.is_file() {
        emit_checkpoint_missing(path);
        log.log_print(&format!("=> no checkpoint found at {}", path.display()))?;
        return Ok(ResumeOutcome::Missing);
    }

    log.log_print(&format!("=> loading checkpoint {}", path.display()))?;
    let checkpoint = load_checkpoint(path)?;
    if best.value() == 0.0 {
        best.observe(checkpoint.best_prec1);
    }
    log.log_print(&format!("=> pretrained acc {:.4}", best.value()))?;
    model.load_state(&checkpoint.state)?;
    log.log_print(&format!(
        "=> loaded checkpoint {} (epoch {})",
        path.display(),
        checkpoint.epoch
    ))?;
    Ok(ResumeOutcome::Loaded {
        epoch: checkpoint.epoch,
        best_prec1: best.value(),
    })
}
