use std::time::Instant;

use anyhow::{anyhow, Result};
use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, GradientsParams, Optimizer, SgdConfig},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use burn_autodiff::Autodiff;
use burn_candle::Candle;
use log::info;
use mlpbench_core::{
    epoch_order, plan_batches, EpochMetrics, EvaluationMetrics, ImageSet, RunningMetrics,
    TrainingHistory,
};
use rand::rngs::StdRng;

use crate::{
    checkpoint::{save_checkpoint, CheckpointPaths},
    data::ImageBatch,
    model::MlpClassifier,
};

pub type TrainingBackend = Autodiff<Candle<f32, i64>>;

/// Loop settings shared by every epoch.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub print_freq: usize,
    pub shuffle: bool,
    pub classes: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
}

/// Result of a pass over the evaluation split.
#[derive(Clone, Debug)]
pub struct ValidationOutcome {
    pub metrics: EvaluationMetrics,
    pub predictions: Vec<usize>,
    pub targets: Vec<usize>,
}

pub struct FitOutcome {
    pub history: TrainingHistory,
    pub started: Instant,
}

/// Train for `settings.epochs` epochs, validating after each one and checkpointing whenever
/// validation accuracy improves. The checkpoint, not the final model, is what later analysis uses.
pub fn fit<B: AutodiffBackend>(
    mut model: MlpClassifier<B>,
    train: &ImageSet,
    test: &ImageSet,
    settings: &LoopSettings,
    checkpoints: &CheckpointPaths,
    rng: &mut StdRng,
    device: &B::Device,
) -> Result<FitOutcome> {
    let mut optimizer = SgdConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(settings.weight_decay as f32)))
        .init::<B, MlpClassifier<B>>();
    let mut history = TrainingHistory::default();
    let started = Instant::now();

    for epoch in 0..settings.epochs {
        let (trained, train_metrics) =
            train_epoch(model, &mut optimizer, train, settings, epoch, rng, device)?;
        model = trained;
        let validation = validate(&model.valid(), test, settings, epoch, Some(started), device)?;

        let improved = history.record(EpochMetrics {
            epoch: epoch + 1,
            train: train_metrics,
            validation: validation.metrics,
        });
        if improved {
            info!("save model");
            save_checkpoint(checkpoints, &model, &optimizer)?;
        }
    }

    Ok(FitOutcome {
        history,
        started,
    })
}

pub fn train_epoch<B, O>(
    mut model: MlpClassifier<B>,
    optimizer: &mut O,
    set: &ImageSet,
    settings: &LoopSettings,
    epoch: usize,
    rng: &mut StdRng,
    device: &B::Device,
) -> Result<(MlpClassifier<B>, EvaluationMetrics)>
where
    B: AutodiffBackend,
    O: Optimizer<MlpClassifier<B>, B>,
{
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let order = epoch_order(set.len(), settings.shuffle, rng);
    let mut running = RunningMetrics::new();

    for (batch_idx, indices) in plan_batches(&order, settings.batch_size)?.iter().enumerate() {
        let batch = ImageBatch::<B>::from_indices(set, indices, settings.classes, device)?;
        let logits = model.forward_train(batch.images.clone(), rng);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        let (correct, total) = accuracy_counts(logits, batch.targets.clone());
        running.record(loss.clone().into_scalar().elem::<f32>(), correct, total);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(settings.learning_rate, model, grads);

        if batch_idx % settings.print_freq == 0 {
            let avg = running.average();
            info!(
                "[Epoch {}][Train][{}] \t Loss: {:.4e} \t Top-1 {:6.2}",
                epoch + 1,
                batch_idx,
                avg.loss,
                avg.accuracy
            );
        }
    }

    Ok((model, running.average()))
}

/// Evaluate without gradients, in sample order, collecting predictions for a confusion matrix.
pub fn validate<B: Backend>(
    model: &MlpClassifier<B>,
    set: &ImageSet,
    settings: &LoopSettings,
    epoch: usize,
    started: Option<Instant>,
    device: &B::Device,
) -> Result<ValidationOutcome> {
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let order: Vec<usize> = (0..set.len()).collect();
    let mut running = RunningMetrics::new();
    let mut predictions = Vec::with_capacity(set.len());
    let mut targets = Vec::with_capacity(set.len());

    for (batch_idx, indices) in plan_batches(&order, settings.eval_batch_size)?
        .iter()
        .enumerate()
    {
        let batch = ImageBatch::<B>::from_indices(set, indices, settings.classes, device)?;
        let logits = model.forward(batch.images.clone());
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

        predictions.extend(argmax_labels(logits.clone())?);
        targets.extend_from_slice(&batch.labels);

        let (correct, total) = accuracy_counts(logits, batch.targets.clone());
        running.record(loss.into_scalar().elem::<f32>(), correct, total);

        if batch_idx % settings.print_freq == 0 {
            let avg = running.average();
            info!(
                "[Epoch {}][Eval][{}] \t Loss: {:.4e} \t Top-1 {:6.2}",
                epoch + 1,
                batch_idx,
                avg.loss,
                avg.accuracy
            );
        }
    }

    let metrics = running.average();
    let minutes = started.map_or(-1.0, |start| start.elapsed().as_secs_f64() / 60.0);
    info!(
        "[Epoch {}] \t \t Top-1 {:6.2} \t \t Time: {:.2}",
        epoch + 1,
        metrics.accuracy,
        minutes
    );

    Ok(ValidationOutcome {
        metrics,
        predictions,
        targets,
    })
}

pub fn accuracy_counts<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> (usize, usize) {
    let predictions = logits.argmax(1).squeeze(1);
    let correct = predictions
        .equal(targets.clone())
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize;
    let total = targets.dims()[0];

    (correct, total)
}

fn argmax_labels<B: Backend>(logits: Tensor<B, 2>) -> Result<Vec<usize>> {
    let labels = logits
        .argmax(1)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| anyhow!("failed to decode predictions: {err:?}"))?;
    Ok(labels.into_iter().map(|label| label as usize).collect())
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;
    use burn_candle::CandleDevice;
    use mlpbench_core::seeded_rng;

    use super::*;
    use crate::model::MlpSpec;

    type Inner = Candle<f32, i64>;

    fn settings(epochs: usize) -> LoopSettings {
        LoopSettings {
            epochs,
            batch_size: 4,
            eval_batch_size: 3,
            print_freq: 1,
            shuffle: true,
            classes: 2,
            learning_rate: 0.5,
            weight_decay: 1e-4,
        }
    }

    /// Two linearly separable classes: class 0 lights the first feature, class 1 the second.
    fn separable_set(samples: usize) -> ImageSet {
        let mut pixels = Vec::new();
        let mut labels = Vec::new();
        for i in 0..samples {
            let label = (i % 2) as u8;
            if label == 0 {
                pixels.extend_from_slice(&[1.0, 0.0, 0.1, 0.0]);
            } else {
                pixels.extend_from_slice(&[0.0, 1.0, 0.0, 0.1]);
            }
            labels.push(label);
        }
        ImageSet::new(1, 2, 2, pixels, labels).unwrap()
    }

    #[test]
    fn accuracy_counts_top1_hits() {
        let device = CandleDevice::Cpu;
        let logits = Tensor::<Inner, 2>::from_floats(
            TensorData::new(vec![2.0f32, 1.0, 0.0, 3.0, 5.0, -1.0], [3, 2]),
            &device,
        );
        let targets = Tensor::<Inner, 1, Int>::from_ints(TensorData::new(vec![0i64, 1, 1], [3]), &device);

        assert_eq!(accuracy_counts(logits.clone(), targets), (2, 3));
        assert_eq!(argmax_labels(logits).unwrap(), vec![0, 1, 0]);
    }

    #[test]
    fn validate_collects_every_prediction_in_order() {
        let device = CandleDevice::Cpu;
        let set = separable_set(7);
        let spec = MlpSpec {
            input_dim: 4,
            hidden: vec![3],
            classes: 2,
            dropout: 0.0,
        };
        let model = MlpClassifier::<Inner>::init(&spec, &device, &mut seeded_rng(9));

        let outcome = validate(&model, &set, &settings(1), 0, None, &device).unwrap();
        assert_eq!(outcome.predictions.len(), 7);
        assert_eq!(outcome.targets, vec![0, 1, 0, 1, 0, 1, 0]);
        assert!((0.0..=100.0).contains(&outcome.metrics.accuracy));
        assert!(outcome.metrics.loss > 0.0);
    }

    #[test]
    fn fit_learns_separable_data_and_checkpoints_best_epoch() {
        let device = CandleDevice::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let checkpoints =
            CheckpointPaths::new(dir.path(), crate::cli::DatasetKind::Mnist);
        let train = separable_set(16);
        let test = separable_set(6);
        let spec = MlpSpec {
            input_dim: 4,
            hidden: vec![8],
            classes: 2,
            dropout: 0.1,
        };
        let mut rng = seeded_rng(4);
        let model = MlpClassifier::<TrainingBackend>::init(&spec, &device, &mut rng);

        let outcome = fit(model, &train, &test, &settings(20), &checkpoints, &mut rng, &device)
            .unwrap();

        assert_eq!(outcome.history.epochs.len(), 20);
        assert_eq!(outcome.history.best_accuracy(), 100.0);
        let first = outcome.history.epochs[0].train.loss;
        let last = outcome.history.last().unwrap().train.loss;
        assert!(last < first, "loss did not decrease: {first} -> {last}");
        assert!(checkpoints.model.with_extension("mpk").exists());
    }

    #[test]
    fn seeded_runs_with_dropout_repeat_exactly() {
        let device = CandleDevice::Cpu;
        let train = separable_set(12);
        let test = separable_set(4);
        let spec = MlpSpec {
            input_dim: 4,
            hidden: vec![6],
            classes: 2,
            dropout: 0.5,
        };
        let run = || {
            let dir = tempfile::tempdir().unwrap();
            let checkpoints = CheckpointPaths::new(dir.path(), crate::cli::DatasetKind::Fmnist);
            let mut rng = seeded_rng(17);
            let model = MlpClassifier::<TrainingBackend>::init(&spec, &device, &mut rng);
            let outcome =
                fit(model, &train, &test, &settings(3), &checkpoints, &mut rng, &device).unwrap();
            outcome.history.train_loss()
        };

        let first = run();
        let second = run();
        for (a, b) in first.iter().zip(&second) {
            assert!((a - b).abs() < 1e-6, "{first:?} != {second:?}");
        }
    }
}
