use std::{
    fmt::Write,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use burn::tensor::backend::Backend;
use log::info;
use mlpbench_core::{
    encode_image_data_url,
    plot::{
        render_confusion_heatmap, render_histogram, render_line_chart, save_png, Histogram,
        LineSeries, TRAIN_COLOR, VALIDATION_COLOR,
    },
    update_sections, ConfusionMatrix, EpochMetrics, ImageSet, ReportSection, TrainingHistory,
};
use serde::{Deserialize, Serialize};

use crate::{cli::TrainArgs, data::ImageBatch, model::MlpClassifier};

const CHART_WIDTH: u32 = 640;
const CHART_HEIGHT: u32 = 480;
const HEATMAP_CELL: u32 = 48;
const HISTOGRAM_BINS: usize = 100;
const HISTOGRAM_RANGE: (f32, f32) = (-1.0, 1.0);
pub const SAMPLE_COUNT: usize = 4;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub seed: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self { seed: 1337 }
    }
}

/// Files produced for one dataset/model combination.
pub struct RunPaths {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub run_config: PathBuf,
    pub history: PathBuf,
    pub report: PathBuf,
    pub plots: PathBuf,
}

impl RunPaths {
    pub fn create(args: &TrainArgs) -> Result<Self> {
        let dir = args
            .output_dir
            .join("runs")
            .join(format!("{}-{}", args.dataset, args.model));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create run directory {}", dir.display()))?;

        Ok(Self {
            config: dir.join("config.json"),
            run_config: dir.join("run_config.json"),
            history: dir.join("history.json"),
            report: dir.join("report.md"),
            plots: dir.join("plots"),
            dir,
        })
    }

    /// Path of a chart relative to the report, for Markdown links.
    fn plot_link(&self, name: &str) -> String {
        format!("plots/{name}")
    }
}

#[derive(Clone)]
pub struct SamplePrediction {
    pub index: usize,
    pub label: usize,
    pub prediction: usize,
    pub image_data_url: String,
}

/// Accuracy and log-loss curves over epochs. Returns the report section body.
pub fn write_learning_curves(paths: &RunPaths, history: &TrainingHistory) -> Result<String> {
    let accuracy = render_line_chart(
        &[
            LineSeries {
                values: &history.train_accuracy(),
                color: TRAIN_COLOR,
            },
            LineSeries {
                values: &history.validation_accuracy(),
                color: VALIDATION_COLOR,
            },
        ],
        CHART_WIDTH,
        CHART_HEIGHT,
    )?;
    save_png(&accuracy, &paths.plots.join("accuracy.png"))?;

    let loss = render_line_chart(
        &[
            LineSeries {
                values: &history.train_loss(),
                color: TRAIN_COLOR,
            },
            LineSeries {
                values: &history.validation_loss(),
                color: VALIDATION_COLOR,
            },
        ],
        CHART_WIDTH,
        CHART_HEIGHT,
    )?;
    save_png(&loss, &paths.plots.join("loss.png"))?;
    info!("wrote learning curves to {}", paths.plots.display());

    Ok(format!(
        "Train (blue) and validation/test (red) per epoch.\n\n\
         ### Accuracy (%)\n\n![Train and validation/test acc vs epochs]({})\n\n\
         ### Log-loss\n\n![Train and validation/test log_loss vs epochs]({})\n",
        paths.plot_link("accuracy.png"),
        paths.plot_link("loss.png")
    ))
}

pub fn write_confusion_matrix(paths: &RunPaths, matrix: &ConfusionMatrix) -> Result<String> {
    let heatmap = render_confusion_heatmap(matrix, HEATMAP_CELL)?;
    save_png(&heatmap, &paths.plots.join("confusion_matrix.png"))?;
    info!(
        "confusion matrix over {} test samples: {:.2}% on the diagonal",
        matrix.total(),
        matrix.accuracy()
    );

    let mut output = String::new();
    let _ = writeln!(
        &mut output,
        "Best checkpoint on the test split (rows: true label, columns: predicted label).\n"
    );
    let _ = writeln!(
        &mut output,
        "![Confusion matrix]({})\n",
        paths.plot_link("confusion_matrix.png")
    );
    output.push_str(&matrix.to_markdown());
    output.push('\n');

    let _ = writeln!(&mut output, "| Class | Recall |");
    let _ = writeln!(&mut output, "| --- | --- |");
    for (class, recall) in matrix.per_class_recall().iter().enumerate() {
        match recall {
            Some(value) => {
                let _ = writeln!(&mut output, "| {class} | {:.2}% |", value * 100.0);
            }
            None => {
                let _ = writeln!(&mut output, "| {class} | n/a |");
            }
        }
    }
    Ok(output)
}

/// Histograms of the first hidden layer's and the output layer's weights, clipped to [-1, 1].
pub fn write_weight_histograms<B: Backend>(
    paths: &RunPaths,
    model: &MlpClassifier<B>,
) -> Result<String> {
    let mut output = String::new();
    let (lo, hi) = HISTOGRAM_RANGE;

    match model.first_hidden_weights()? {
        Some(weights) => {
            let hist = Histogram::from_values(&weights, HISTOGRAM_BINS, lo, hi)?;
            save_png(
                &render_histogram(&hist, CHART_WIDTH, CHART_HEIGHT)?,
                &paths.plots.join("weights_hidden.png"),
            )?;
            push_histogram_entry(&mut output, "First hidden layer", &hist, &paths.plot_link("weights_hidden.png"));
        }
        None => {
            let _ = writeln!(&mut output, "This architecture has no hidden layer.\n");
        }
    }

    let weights = model.output_weights()?;
    let hist = Histogram::from_values(&weights, HISTOGRAM_BINS, lo, hi)?;
    save_png(
        &render_histogram(&hist, CHART_WIDTH, CHART_HEIGHT)?,
        &paths.plots.join("weights_output.png"),
    )?;
    push_histogram_entry(&mut output, "Output layer", &hist, &paths.plot_link("weights_output.png"));

    Ok(output)
}

fn push_histogram_entry(output: &mut String, title: &str, hist: &Histogram, link: &str) {
    let _ = writeln!(
        output,
        "### {title}\n\n- Weights in range: {}\n- Clipped (outside [{}, {}]): {}\n\n![{title} weights]({link})\n",
        hist.total(),
        hist.min,
        hist.max,
        hist.clipped
    );
}

/// Predictions of `model` on the first `count` images of `set`.
pub fn sample_predictions<B: Backend>(
    model: &MlpClassifier<B>,
    set: &ImageSet,
    classes: usize,
    count: usize,
    device: &B::Device,
) -> Result<Vec<SamplePrediction>> {
    let available = count.min(set.len());
    if available == 0 {
        return Ok(Vec::new());
    }

    let indices: Vec<usize> = (0..available).collect();
    let batch = ImageBatch::<B>::from_indices(set, &indices, classes, device)?;
    let predictions = model
        .forward(batch.images.clone())
        .argmax(1)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| anyhow!("failed to decode predictions: {err:?}"))?;

    let mut samples = Vec::with_capacity(available);
    for (i, prediction) in predictions.iter().enumerate() {
        let image = set
            .image(indices[i])
            .ok_or_else(|| anyhow!("dataset index {} out of bounds", indices[i]))?;
        samples.push(SamplePrediction {
            index: indices[i],
            label: batch.labels[i],
            prediction: *prediction as usize,
            image_data_url: encode_image_data_url(
                set.channels,
                set.width as u32,
                set.height as u32,
                image,
            )?,
        });
    }

    Ok(samples)
}

/// Report bodies that are only present when the matching output was requested.
#[derive(Default)]
pub struct OptionalSections {
    pub learning_curves: Option<String>,
    pub confusion_matrix: Option<String>,
    pub weights: Option<String>,
}

pub fn write_report(
    report_path: &Path,
    args: &TrainArgs,
    config: &ExperimentConfig,
    history: &TrainingHistory,
    optional: OptionalSections,
    samples: &[SamplePrediction],
) -> Result<()> {
    let disabled = |flag: &str| format!("Disabled for this run (`--{flag} false`).");
    let sections = [
        ReportSection::new("overview", render_overview(args)),
        ReportSection::new("configuration", render_configuration_section(args, config)),
        ReportSection::new("metrics", render_metrics_section(history)),
        ReportSection::new(
            "learning-curves",
            optional
                .learning_curves
                .unwrap_or_else(|| disabled("plot_learning_curve")),
        ),
        ReportSection::new(
            "confusion-matrix",
            optional
                .confusion_matrix
                .unwrap_or_else(|| disabled("confusion_matrix")),
        ),
        ReportSection::new(
            "weights",
            optional
                .weights
                .unwrap_or_else(|| "Enable with `--plot_weight_hist true`.".to_string()),
        ),
        ReportSection::new("samples", render_samples_section(samples)),
    ];

    update_sections(report_path, &sections)
}

fn render_overview(args: &TrainArgs) -> String {
    let hidden = args.hidden_dims();
    let layers = if hidden.is_empty() {
        "no hidden layer".to_string()
    } else {
        format!("hidden widths {hidden:?}")
    };
    format!(
        "Model `{}` ({layers}, {:?} activation) trained on `{}` with {:?}.",
        args.model, args.activation, args.dataset, args.train_method
    )
}

fn render_configuration_section(args: &TrainArgs, config: &ExperimentConfig) -> String {
    format!(
        "- Seed: {}\n- Dataset: {}\n- Model: {}\n- Hidden widths: {:?}\n- Max epochs: {}\n\
         - Learning rate: {}\n- L2 regularization: {}\n- Batch size: {}\n- Eval batch size: {}\n\
         - Shuffle: {}\n- Dropout: {}\n- Classes: {}\n",
        config.seed,
        args.dataset,
        args.model,
        args.hidden_dims(),
        args.max_epoch,
        args.lr,
        args.reg,
        args.batch_size,
        args.eval_batch_size,
        args.shuffle,
        args.dropout,
        args.class_num
    )
}

fn render_metrics_section(history: &TrainingHistory) -> String {
    let mut output = String::new();

    if let Some(best) = history.best {
        let _ = writeln!(
            &mut output,
            "- Best validation top-1: {:.2}% (epoch {})",
            best.validation.accuracy, best.epoch
        );
    }
    if let Some(last) = history.last() {
        let _ = writeln!(
            &mut output,
            "- Final train loss: {:.4}\n- Final train top-1: {:.2}%\n- Final validation loss: {:.4}\n- Final validation top-1: {:.2}%\n",
            last.train.loss, last.train.accuracy, last.validation.loss, last.validation.accuracy
        );
    }

    if !history.epochs.is_empty() {
        let _ = writeln!(
            &mut output,
            "| Epoch | Train Loss | Train Top-1 (%) | Val Loss | Val Top-1 (%) |"
        );
        let _ = writeln!(&mut output, "| --- | --- | --- | --- | --- |");
        for metrics in summarize_history(&history.epochs) {
            let _ = writeln!(
                &mut output,
                "| {} | {:.4} | {:.2} | {:.4} | {:.2} |",
                metrics.epoch,
                metrics.train.loss,
                metrics.train.accuracy,
                metrics.validation.loss,
                metrics.validation.accuracy
            );
        }
    }

    output
}

fn render_samples_section(samples: &[SamplePrediction]) -> String {
    if samples.is_empty() {
        return "No samples available for this split.".to_string();
    }

    let mut output = String::new();
    for (i, sample) in samples.iter().enumerate() {
        let _ = writeln!(
            &mut output,
            "#### Sample {} (index {})\n- True label: {}\n- Predicted: {}\n\n![Sample image]({})\n",
            i + 1,
            sample.index,
            sample.label,
            sample.prediction,
            sample.image_data_url
        );
    }
    output
}

/// A readable subset of epochs: a fixed ladder of early epochs, then the last one.
fn summarize_history(history: &[EpochMetrics]) -> Vec<&EpochMetrics> {
    let Some(last) = history.last() else {
        return Vec::new();
    };

    let mut summary: Vec<&EpochMetrics> = [1, 2, 5, 10, 20, 30, 40, 50, 75, 100]
        .iter()
        .filter_map(|&target| history.iter().find(|m| m.epoch == target))
        .collect();
    if summary.last().map(|m| m.epoch) != Some(last.epoch) {
        summary.push(last);
    }
    summary
}
