use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use burn::{
    module::Module,
    optim::Optimizer,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use crate::{cli::DatasetKind, model::MlpClassifier};

/// Weights are stored as full `f32` so the reloaded best model matches the trained one exactly.
type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Where the best model and its optimizer state are written. The recorder adds the file
/// extension itself.
#[derive(Clone, Debug)]
pub struct CheckpointPaths {
    pub model: PathBuf,
    pub optimizer: PathBuf,
}

impl CheckpointPaths {
    pub fn new(output_dir: &Path, dataset: DatasetKind) -> Self {
        let dir = output_dir.join("model");
        Self {
            model: dir.join(format!("best_model_dataset_{dataset}")),
            optimizer: dir.join(format!("best_model_dataset_{dataset}_optimizer")),
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.model.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        Ok(())
    }
}

pub fn save_checkpoint<B, O>(
    paths: &CheckpointPaths,
    model: &MlpClassifier<B>,
    optimizer: &O,
) -> Result<()>
where
    B: AutodiffBackend,
    O: Optimizer<MlpClassifier<B>, B>,
{
    paths.ensure_dir()?;
    let recorder = CheckpointRecorder::new();
    model
        .clone()
        .save_file(paths.model.clone(), &recorder)
        .map_err(|err| anyhow!("failed to save model to {}: {err:?}", paths.model.display()))?;
    Recorder::<B>::record(&recorder, optimizer.to_record(), paths.optimizer.clone()).map_err(
        |err| {
            anyhow!(
                "failed to save optimizer state to {}: {err:?}",
                paths.optimizer.display()
            )
        },
    )?;
    Ok(())
}

/// Load the checkpointed weights into `template`, which must share the saved architecture.
pub fn load_model<B: AutodiffBackend>(
    paths: &CheckpointPaths,
    template: MlpClassifier<B>,
    device: &B::Device,
) -> Result<MlpClassifier<B>> {
    template
        .load_file(paths.model.clone(), &CheckpointRecorder::new(), device)
        .map_err(|err| anyhow!("failed to load model from {}: {err:?}", paths.model.display()))
}
