//! Experiment configuration.
//!
//! Field names and defaults follow the training command line. Partial JSON
//! files are accepted; absent fields take their defaults.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::augment::AugmentationProfile;
use crate::calibration::CalibrationConfig;
use crate::domain::{Result, ZslError};
use crate::training::LrSchedule;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Dataset name; also the directory under `data_root`.
    pub data: String,
    pub arch: String,
    pub backbone: String,
    pub save_path: PathBuf,
    pub data_root: PathBuf,
    pub output_root: PathBuf,
    pub workers: usize,
    pub epochs: usize,
    pub start_epoch: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub lr1: f64,
    pub lr2: f64,
    pub epoch_decay: usize,
    pub momentum: f64,
    pub weight_decay: f64,
    pub print_freq: usize,
    pub resume: Option<PathBuf>,
    pub pretrained: bool,
    pub seed: Option<u64>,
    pub is_fix: bool,
    pub flipping_test: bool,
    pub aug: String,
    pub sigma: f64,
    pub att: usize,
    pub lossw: f64,
    pub golibw: f64,
    pub phasew: f64,
    pub odr: usize,
    pub lb: f64,
    pub ratio: f64,
    pub spacew: f64,
    pub calibration: CalibrationConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            data: "cub".to_string(),
            arch: "resnet18".to_string(),
            backbone: "resnet18".to_string(),
            save_path: PathBuf::new(),
            data_root: PathBuf::from("./data"),
            output_root: PathBuf::from("zero-shot"),
            workers: 3,
            epochs: 90,
            start_epoch: 0,
            batch_size: 256,
            lr: 0.005,
            lr1: 0.1,
            lr2: 0.001,
            epoch_decay: 30,
            momentum: 0.9,
            weight_decay: 1e-4,
            print_freq: 10,
            resume: None,
            pretrained: false,
            seed: None,
            is_fix: false,
            flipping_test: false,
            aug: "v7".to_string(),
            sigma: 0.5,
            att: 312,
            lossw: 1.0,
            golibw: 0.02,
            phasew: 0.1,
            odr: 0,
            lb: 0.1,
            ratio: 0.1,
            spacew: 0.5,
            calibration: CalibrationConfig::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ZslError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if self.epoch_decay == 0 {
            return Err(ZslError::InvalidConfig("epoch_decay must be positive".to_string()));
        }
        if self.start_epoch > self.epochs {
            return Err(ZslError::InvalidConfig(format!(
                "start_epoch {} is past epochs {}",
                self.start_epoch, self.epochs
            )));
        }
        if self.calibration.bases.is_empty() {
            return Err(ZslError::InvalidConfig("calibration grid is empty".to_string()));
        }
        self.augmentation_profile()?;
        Ok(())
    }

    /// Fix the seed, drawing one from `1..=10000` when none was given.
    pub fn resolve_seed<R: Rng>(&mut self, rng: &mut R) -> u64 {
        *self.seed.get_or_insert_with(|| rng.gen_range(1..=10000))
    }

    fn resolved_seed(&self) -> Result<u64> {
        self.seed
            .ok_or_else(|| ZslError::InvalidConfig("seed has not been resolved".to_string()))
    }

    /// Run output directory, named after the hyper-parameters.
    pub fn output_dir(&self) -> Result<PathBuf> {
        let seed = self.resolved_seed()?;
        Ok(self
            .output_root
            .join(&self.data)
            .join(format!("lr{}_ph{}", self.lr, self.phasew))
            .join(format!(
                "_b-{}_lossw-{}_phasew-{}_lr1-{}_lr2-{}_decay-{}_seed-{}",
                self.batch_size, self.lossw, self.phasew, self.lr1, self.lr2, self.epoch_decay, seed
            )))
    }

    pub fn log_path(&self) -> Result<PathBuf> {
        Ok(self.output_dir()?.join(format!("log{}.txt", self.data)))
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.data_root.join(&self.data)
    }

    pub fn semantic_data_path(&self) -> PathBuf {
        self.dataset_dir().join("data_info.json")
    }

    pub fn train_list(&self) -> PathBuf {
        self.dataset_dir().join("train.list")
    }

    pub fn seen_test_list(&self) -> PathBuf {
        self.dataset_dir().join("test_seen.list")
    }

    pub fn unseen_test_list(&self) -> PathBuf {
        self.dataset_dir().join("test_unseen.list")
    }

    pub fn lr_schedule(&self) -> LrSchedule {
        LrSchedule::new(self.lr1, self.lr2, self.epoch_decay)
    }

    pub fn augmentation_profile(&self) -> Result<AugmentationProfile> {
        self.aug.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn defaults_match_command_line() {
        let c = ExperimentConfig::default();
        assert_eq!(c.data, "cub");
        assert_eq!(c.batch_size, 256);
        assert_eq!(c.epoch_decay, 30);
        assert_eq!(c.aug, "v7");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c = ExperimentConfig::from_json_str(r#"{"data": "awa2", "epochs": 5, "seed": 7}"#)
            .expect("config");
        assert_eq!(c.data, "awa2");
        assert_eq!(c.epochs, 5);
        assert_eq!(c.seed, Some(7));
        assert_eq!(c.lr1, 0.1);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(ExperimentConfig::from_json_str(r#"{"epoch_decay": 0}"#).is_err());
        assert!(ExperimentConfig::from_json_str(r#"{"aug": "v5"}"#).is_err());
        assert!(ExperimentConfig::from_json_str(r#"{"start_epoch": 10, "epochs": 5}"#).is_err());
    }

    #[test]
    fn seed_is_drawn_once() {
        let mut c = ExperimentConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let seed = c.resolve_seed(&mut rng);
        assert!((1..=10000).contains(&seed));
        assert_eq!(c.resolve_seed(&mut rng), seed);

        let mut fixed = ExperimentConfig {
            seed: Some(42),
            ..ExperimentConfig::default()
        };
        assert_eq!(fixed.resolve_seed(&mut rng), 42);
    }

    #[test]
    fn output_dir_encodes_hyper_parameters() {
        let c = ExperimentConfig {
            seed: Some(42),
            ..ExperimentConfig::default()
        };
        let dir = c.output_dir().expect("dir");
        assert_eq!(
            dir,
            PathBuf::from("zero-shot/cub/lr0.005_ph0.1/_b-256_lossw-1_phasew-0.1_lr1-0.1_lr2-0.001_decay-30_seed-42")
        );
        assert_eq!(c.log_path().expect("log").file_name().and_then(|n| n.to_str()), Some("logcub.txt"));
        assert!(ExperimentConfig::default().output_dir().is_err());
    }

    #[test]
    fn data_paths_live_under_dataset_dir() {
        let c = ExperimentConfig::default();
        assert_eq!(c.semantic_data_path(), PathBuf::from("./data/cub/data_info.json"));
        assert_eq!(c.unseen_test_list(), PathBuf::from("./data/cub/test_unseen.list"));
    }
}
