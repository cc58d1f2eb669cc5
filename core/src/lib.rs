pub mod batch;
pub mod config;
pub mod datasets;
pub mod metrics;
pub mod plot;
pub mod report;
pub mod rng;
pub mod visualization;

pub use batch::plan_batches;
pub use config::{load_or_init, read_json, write_json};
pub use datasets::{
    cifar10_files, load_cifar10_dir, load_idx_dir, DatasetSplits, ImageSet, IDX_FILES,
};
pub use metrics::{ConfusionMatrix, EpochMetrics, EvaluationMetrics, RunningMetrics, TrainingHistory};
pub use report::{ensure_report_file, update_sections, ReportSection, DEFAULT_REPORT_TEMPLATE};
pub use rng::{epoch_order, seeded_rng};
pub use visualization::{encode_image_data_url, encode_luma_png_data_url};
