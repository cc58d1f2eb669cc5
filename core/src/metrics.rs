use std::fmt::Write;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Average loss and top-1 accuracy (percent) over a pass through a split.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub loss: f32,
    pub accuracy: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train: EvaluationMetrics,
    pub validation: EvaluationMetrics,
}

/// Sample-weighted running sums for one pass over a split.
///
/// Batch losses arrive as batch means, so each is scaled by the batch length before being
/// summed. A short final batch then counts only for the samples it holds.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunningMetrics {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, mean_loss: f32, correct: usize, batch_len: usize) {
        self.loss_sum += f64::from(mean_loss) * batch_len as f64;
        self.correct += correct;
        self.samples += batch_len;
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Averages so far; zeros before anything was recorded.
    pub fn average(&self) -> EvaluationMetrics {
        if self.samples == 0 {
            return EvaluationMetrics {
                loss: 0.0,
                accuracy: 0.0,
            };
        }
        let samples = self.samples as f64;
        EvaluationMetrics {
            loss: (self.loss_sum / samples) as f32,
            accuracy: (self.correct as f64 * 100.0 / samples) as f32,
        }
    }
}

/// Per-epoch metrics and the best validation accuracy seen so far.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
    pub best: Option<EpochMetrics>,
}

impl TrainingHistory {
    /// Append an epoch. Returns true when its validation accuracy strictly beats every earlier
    /// epoch (the first epoch always does).
    pub fn record(&mut self, metrics: EpochMetrics) -> bool {
        let improved = self
            .best
            .map_or(true, |best| metrics.validation.accuracy > best.validation.accuracy);
        if improved {
            self.best = Some(metrics);
        }
        self.epochs.push(metrics);
        improved
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn best_accuracy(&self) -> f32 {
        self.best.map_or(0.0, |best| best.validation.accuracy)
    }

    pub fn train_accuracy(&self) -> Vec<f32> {
        self.epochs.iter().map(|m| m.train.accuracy).collect()
    }

    pub fn validation_accuracy(&self) -> Vec<f32> {
        self.epochs.iter().map(|m| m.validation.accuracy).collect()
    }

    pub fn train_loss(&self) -> Vec<f32> {
        self.epochs.iter().map(|m| m.train.loss).collect()
    }

    pub fn validation_loss(&self) -> Vec<f32> {
        self.epochs.iter().map(|m| m.validation.loss).collect()
    }
}

/// Square matrix of counts: rows are true labels, columns are predictions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    classes: usize,
    counts: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            counts: vec![0; classes * classes],
        }
    }

    pub fn from_labels(classes: usize, targets: &[usize], predictions: &[usize]) -> Result<Self> {
        if targets.len() != predictions.len() {
            bail!(
                "target count {} does not match prediction count {}",
                targets.len(),
                predictions.len()
            );
        }
        let mut matrix = Self::new(classes);
        for (&target, &prediction) in targets.iter().zip(predictions) {
            matrix.record(target, prediction)?;
        }
        Ok(matrix)
    }

    pub fn record(&mut self, target: usize, prediction: usize) -> Result<()> {
        if target >= self.classes || prediction >= self.classes {
            bail!(
                "label pair ({target}, {prediction}) out of range for {} classes",
                self.classes
            );
        }
        self.counts[target * self.classes + prediction] += 1;
        Ok(())
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn get(&self, target: usize, prediction: usize) -> usize {
        self.counts[target * self.classes + prediction]
    }

    pub fn max_count(&self) -> usize {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Fraction of each true class predicted correctly. Classes with no samples yield `None`.
    pub fn per_class_recall(&self) -> Vec<Option<f32>> {
        (0..self.classes)
            .map(|row| {
                let total: usize = (0..self.classes).map(|col| self.get(row, col)).sum();
                (total > 0).then(|| self.get(row, row) as f32 / total as f32)
            })
            .collect()
    }

    pub fn accuracy(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let diagonal: usize = (0..self.classes).map(|i| self.get(i, i)).sum();
        diagonal as f32 * 100.0 / total as f32
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        let _ = write!(&mut output, "| True \\ Predicted |");
        for col in 0..self.classes {
            let _ = write!(&mut output, " {col} |");
        }
        output.push('\n');
        output.push_str("| --- |");
        for _ in 0..self.classes {
            output.push_str(" --- |");
        }
        output.push('\n');
        for row in 0..self.classes {
            let _ = write!(&mut output, "| **{row}** |");
            for col in 0..self.classes {
                let _ = write!(&mut output, " {} |", self.get(row, col));
            }
            output.push('\n');
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn epoch(epoch: usize, val_acc: f32) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train: EvaluationMetrics {
                loss: 1.0,
                accuracy: 50.0,
            },
            validation: EvaluationMetrics {
                loss: 1.0,
                accuracy: val_acc,
            },
        }
    }

    #[test]
    fn running_metrics_weight_by_batch_length() {
        let mut running = RunningMetrics::new();
        running.record(2.0, 50, 100);
        running.record(0.5, 10, 20);

        let avg = running.average();
        assert_eq!(running.samples(), 120);
        assert_relative_eq!(avg.loss, 1.75, epsilon = 1e-6);
        assert_relative_eq!(avg.accuracy, 50.0, epsilon = 1e-4);
    }

    #[test]
    fn empty_running_metrics_average_to_zero() {
        let avg = RunningMetrics::new().average();
        assert_eq!(avg.loss, 0.0);
        assert_eq!(avg.accuracy, 0.0);
    }

    #[test]
    fn history_only_improves_on_strictly_better_accuracy() {
        let mut history = TrainingHistory::default();
        assert!(history.record(epoch(1, 0.0)));
        assert!(history.record(epoch(2, 80.0)));
        assert!(!history.record(epoch(3, 80.0)));
        assert!(!history.record(epoch(4, 79.0)));
        assert!(history.record(epoch(5, 81.5)));

        assert_eq!(history.best.map(|b| b.epoch), Some(5));
        assert_eq!(history.best_accuracy(), 81.5);
        assert_eq!(history.validation_accuracy(), vec![0.0, 80.0, 80.0, 79.0, 81.5]);
        assert_eq!(history.last().map(|m| m.epoch), Some(5));
    }

    #[test]
    fn confusion_matrix_counts_pairs() {
        let matrix = ConfusionMatrix::from_labels(3, &[0, 0, 1, 2, 2, 2], &[0, 1, 1, 2, 2, 0])
            .unwrap();

        assert_eq!(matrix.get(0, 0), 1);
        assert_eq!(matrix.get(0, 1), 1);
        assert_eq!(matrix.get(2, 0), 1);
        assert_eq!(matrix.get(2, 2), 2);
        assert_eq!(matrix.total(), 6);
        assert_eq!(matrix.max_count(), 2);
        assert_relative_eq!(matrix.accuracy(), 66.666_67, epsilon = 1e-3);

        let recall = matrix.per_class_recall();
        assert_eq!(recall[1], Some(1.0));
        assert_relative_eq!(recall[2].unwrap(), 2.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn confusion_matrix_rejects_out_of_range_labels() {
        let mut matrix = ConfusionMatrix::new(2);
        assert!(matrix.record(2, 0).is_err());
        assert!(ConfusionMatrix::from_labels(2, &[0], &[0, 1]).is_err());
    }

    #[test]
    fn empty_class_has_no_recall() {
        let matrix = ConfusionMatrix::from_labels(3, &[0, 1], &[0, 1]).unwrap();
        assert_eq!(matrix.per_class_recall()[2], None);
    }

    #[test]
    fn markdown_has_header_and_one_row_per_class() {
        let matrix = ConfusionMatrix::from_labels(2, &[0, 1, 1], &[0, 1, 0]).unwrap();
        let table = matrix.to_markdown();
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "| True \\ Predicted | 0 | 1 |");
        assert_eq!(lines[3], "| **1** | 1 | 1 |");
    }
}
