mod artifacts;
mod checkpoint;
mod cli;
mod data;
mod download;
mod model;
mod training;

use anyhow::Result;
use burn::module::AutodiffModule;
use burn_candle::CandleDevice;
use clap::Parser;
use log::{info, warn};
use mlpbench_core::{
    ensure_report_file, load_or_init, seeded_rng, write_json, ConfusionMatrix,
    DEFAULT_REPORT_TEMPLATE,
};

use crate::{
    artifacts::{
        sample_predictions, write_confusion_matrix, write_learning_curves, write_report,
        write_weight_histograms, ExperimentConfig, OptionalSections, RunPaths, SAMPLE_COUNT,
    },
    checkpoint::{load_model, CheckpointPaths},
    cli::{DeviceKind, TrainArgs},
    data::load_dataset,
    model::{MlpClassifier, MlpSpec},
    training::{fit, validate, LoopSettings, TrainingBackend},
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = TrainArgs::parse();
    args.validate()?;
    run(&args)
}

fn select_device(kind: DeviceKind) -> CandleDevice {
    match kind {
        DeviceKind::Gpu => gpu_device(),
        DeviceKind::Cpu => CandleDevice::Cpu,
    }
}

#[cfg(feature = "cuda")]
fn gpu_device() -> CandleDevice {
    info!("using CUDA device 0");
    CandleDevice::cuda(0)
}

#[cfg(not(feature = "cuda"))]
fn gpu_device() -> CandleDevice {
    warn!("No GPU available, using the CPU instead.");
    CandleDevice::Cpu
}

fn run(args: &TrainArgs) -> Result<()> {
    let device = select_device(args.device);
    info!("config: {args:?}");

    let paths = RunPaths::create(args)?;
    let config: ExperimentConfig = load_or_init(&paths.config, ExperimentConfig::default)?;
    write_json(&paths.run_config, args)?;
    if ensure_report_file(&paths.report, DEFAULT_REPORT_TEMPLATE)? {
        info!("created report notebook {}", paths.report.display());
    }

    let splits = load_dataset(args.dataset, &args.data_dir)?;
    args.check_dataset(splits.train.class_count().max(splits.test.class_count()))?;

    let spec = MlpSpec {
        input_dim: splits.train.input_dim(),
        hidden: args.hidden_dims(),
        classes: args.class_num,
        dropout: args.dropout,
    };
    let settings = LoopSettings {
        epochs: args.max_epoch,
        batch_size: args.batch_size,
        eval_batch_size: args.eval_batch_size,
        print_freq: args.print_freq,
        shuffle: args.shuffle,
        classes: args.class_num,
        learning_rate: args.lr,
        weight_decay: args.reg,
    };
    let checkpoints = CheckpointPaths::new(&args.output_dir, args.dataset);

    let mut rng = seeded_rng(config.seed);
    let model = MlpClassifier::<TrainingBackend>::init(&spec, &device, &mut rng);
    info!(
        "model {}: {} inputs, {} hidden layer(s), {} classes; artefacts in {}",
        args.model,
        spec.input_dim,
        model.hidden_layers(),
        spec.classes,
        paths.dir.display()
    );
    let outcome = fit(
        model,
        &splits.train,
        &splits.test,
        &settings,
        &checkpoints,
        &mut rng,
        &device,
    )?;
    write_json(&paths.history, &outcome.history)?;

    info!("config: {args:?}");
    let final_top1 = outcome
        .history
        .last()
        .map_or(0.0, |metrics| metrics.validation.accuracy);
    info!(
        "Script finished in {:.2} minutes, best top-1: {:.2}, final top-1: {:.2}",
        outcome.started.elapsed().as_secs_f64() / 60.0,
        outcome.history.best_accuracy(),
        final_top1
    );

    let mut optional = OptionalSections::default();
    if args.plot_learning_curve {
        optional.learning_curves = Some(write_learning_curves(&paths, &outcome.history)?);
    }

    let template = MlpClassifier::<TrainingBackend>::init(&spec, &device, &mut seeded_rng(config.seed));
    let best = load_model(&checkpoints, template, &device)?.valid();

    if args.confusion_matrix {
        let evaluation = validate(
            &best,
            &splits.test,
            &settings,
            args.max_epoch - 1,
            Some(outcome.started),
            &device,
        )?;
        let matrix =
            ConfusionMatrix::from_labels(args.class_num, &evaluation.targets, &evaluation.predictions)?;
        optional.confusion_matrix = Some(write_confusion_matrix(&paths, &matrix)?);
    }
    if args.plot_weight_hist {
        optional.weights = Some(write_weight_histograms(&paths, &best)?);
    }

    let samples = sample_predictions(&best, &splits.test, args.class_num, SAMPLE_COUNT, &device)?;
    write_report(
        &paths.report,
        args,
        &config,
        &outcome.history,
        optional,
        &samples,
    )?;
    info!("report written to {}", paths.report.display());

    Ok(())
}
