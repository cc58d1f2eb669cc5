use std::{fmt, path::PathBuf};

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Mnist,
    Fmnist,
    Cifar10,
}

impl DatasetKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mnist => "mnist",
            Self::Fmnist => "fmnist",
            Self::Cifar10 => "cifar10",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    M1,
    M2,
    M3,
}

impl ModelKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::M1 => "m1",
            Self::M2 => "m2",
            Self::M3 => "m3",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Gpu,
    Cpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum TrainMethod {
    #[value(name = "SGD")]
    Sgd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    Relu,
}

/// Accepts the usual spellings of a boolean: yes/true/t/y/1 and no/false/f/n/0.
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" => Ok(true),
        "no" | "false" | "f" | "n" | "0" => Ok(false),
        _ => Err(format!("boolean value expected, got '{value}'")),
    }
}

/// MLP training script
#[derive(Clone, Debug, Parser, Serialize, Deserialize)]
#[command(name = "mlp-classifier", about = "MLP training script")]
pub struct TrainArgs {
    #[arg(long, value_enum, ignore_case = true, default_value_t = DatasetKind::Mnist)]
    pub dataset: DatasetKind,

    /// Preferred device; `gpu` falls back to the CPU when CUDA support is not compiled in
    #[arg(long, value_enum, ignore_case = true, default_value_t = DeviceKind::Gpu)]
    pub device: DeviceKind,

    #[arg(long = "max_epoch", default_value_t = 50)]
    pub max_epoch: usize,

    #[arg(long, default_value_t = 1e-2)]
    pub lr: f64,

    #[arg(long, action = ArgAction::Set, value_parser = parse_bool, default_value = "true")]
    pub shuffle: bool,

    #[arg(long = "train_method", value_enum, ignore_case = true, default_value_t = TrainMethod::Sgd)]
    pub train_method: TrainMethod,

    /// L2 regularization strength (weight decay)
    #[arg(long, default_value_t = 1e-4)]
    pub reg: f64,

    #[arg(long = "batch_size", default_value_t = 100)]
    pub batch_size: usize,

    /// Evaluation batch size for the test split
    #[arg(long = "eval_batch_size", default_value_t = 100)]
    pub eval_batch_size: usize,

    /// Log running metrics every N batches
    #[arg(long = "print_freq", default_value_t = 500)]
    pub print_freq: usize,

    #[arg(long = "class_num", default_value_t = 10)]
    pub class_num: usize,

    #[arg(long, value_enum, ignore_case = true, default_value_t = ActivationKind::Relu)]
    pub activation: ActivationKind,

    #[arg(long, value_enum, ignore_case = true, default_value_t = ModelKind::M1)]
    pub model: ModelKind,

    /// Hidden widths for m1 (m1 has no hidden layer, so these are ignored)
    #[arg(long = "layer_model1", num_args = 1..)]
    pub layer_model1: Vec<usize>,

    /// Hidden width for m2 (first entry used)
    #[arg(long = "layer_model2", num_args = 1.., default_values_t = vec![128])]
    pub layer_model2: Vec<usize>,

    /// Hidden widths for m3 (first two entries used)
    #[arg(long = "layer_model3", num_args = 1.., default_values_t = vec![256, 128])]
    pub layer_model3: Vec<usize>,

    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,

    #[arg(long = "confusion_matrix", action = ArgAction::Set, value_parser = parse_bool, default_value = "true")]
    pub confusion_matrix: bool,

    #[arg(long = "plot_learning_curve", action = ArgAction::Set, value_parser = parse_bool, default_value = "true")]
    pub plot_learning_curve: bool,

    #[arg(long = "plot_weight_hist", action = ArgAction::Set, value_parser = parse_bool, default_value = "false")]
    pub plot_weight_hist: bool,

    /// Root directory holding dataset files
    #[arg(long = "data_dir", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Root directory for checkpoints and run artefacts
    #[arg(long = "output_dir", default_value = ".")]
    pub output_dir: PathBuf,
}

impl TrainArgs {
    /// Hidden layer widths of the selected architecture.
    pub fn hidden_dims(&self) -> Vec<usize> {
        match self.model {
            ModelKind::M1 => Vec::new(),
            ModelKind::M2 => self.layer_model2.iter().take(1).copied().collect(),
            ModelKind::M3 => self.layer_model3.iter().take(2).copied().collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_epoch == 0 {
            bail!("--max_epoch must be at least 1");
        }
        if self.batch_size == 0 || self.eval_batch_size == 0 {
            bail!("batch sizes must be positive");
        }
        if self.print_freq == 0 {
            bail!("--print_freq must be at least 1");
        }
        if self.class_num == 0 {
            bail!("--class_num must be at least 1");
        }
        if !self.lr.is_finite() || self.lr < 0.0 {
            bail!("--lr must be a non-negative number, got {}", self.lr);
        }
        if !self.reg.is_finite() || self.reg < 0.0 {
            bail!("--reg must be a non-negative number, got {}", self.reg);
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("--dropout must lie in [0, 1), got {}", self.dropout);
        }

        let required = match self.model {
            ModelKind::M1 => 0,
            ModelKind::M2 => 1,
            ModelKind::M3 => 2,
        };
        let hidden = self.hidden_dims();
        if hidden.len() < required {
            bail!(
                "model {} needs {} hidden widths (--layer_{}), got {}",
                self.model,
                required,
                match self.model {
                    ModelKind::M3 => "model3",
                    _ => "model2",
                },
                hidden.len()
            );
        }
        if hidden.contains(&0) {
            bail!("hidden layer widths must be positive, got {hidden:?}");
        }
        Ok(())
    }

    /// Checks that depend on the loaded data.
    pub fn check_dataset(&self, dataset_classes: usize) -> Result<()> {
        if dataset_classes > self.class_num {
            bail!(
                "{} has {} classes but --class_num is {}",
                self.dataset,
                dataset_classes,
                self.class_num
            );
        }
        Ok(())
    }
}
