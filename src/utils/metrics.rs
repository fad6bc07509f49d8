//! Metrics Module for Model Evaluation
//!
//! Provides the metrics used during validation and on the test set:
//! - Accuracy and the confusion tally
//! - Per-class precision, recall, F1-score and support
//! - Micro-averaged one-vs-rest ROC AUC

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Class index
    pub class_idx: usize,

    /// Class name
    pub class_name: String,

    /// True positives
    pub true_positives: usize,

    /// False positives
    pub false_positives: usize,

    /// False negatives
    pub false_negatives: usize,

    /// Precision = TP / (TP + FP)
    pub precision: f64,

    /// Recall = TP / (TP + FN)
    pub recall: f64,

    /// F1 = 2 * (precision * recall) / (precision + recall)
    pub f1: f64,

    /// Support = number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        // predicted as this class but actually other classes
        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        // actually this class but predicted as other classes
        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let support = true_positives + false_negatives;

        let precision = if true_positives + false_positives > 0 {
            true_positives as f64 / (true_positives + false_positives) as f64
        } else {
            0.0
        };

        let recall = if support > 0 {
            true_positives as f64 / support as f64
        } else {
            0.0
        };

        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: class_idx.to_string(),
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support,
        }
    }

    /// Set the class name
    pub fn with_name(mut self, name: &str) -> Self {
        self.class_name = name.to_string();
        self
    }
}

/// Per-class precision/recall/F1 with macro averages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub total_support: usize,
}

impl ClassificationReport {
    /// Build the report from a confusion tally
    ///
    /// Macro averages run over every class, including classes with no support.
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_names: &[String]) -> Self {
        let per_class: Vec<ClassMetrics> = (0..cm.num_classes)
            .map(|idx| {
                let metrics = ClassMetrics::from_confusion_matrix(cm, idx);
                match class_names.get(idx) {
                    Some(name) => metrics.with_name(name),
                    None => metrics,
                }
            })
            .collect();

        let n = per_class.len().max(1) as f64;
        Self {
            accuracy: cm.accuracy(),
            macro_precision: per_class.iter().map(|m| m.precision).sum::<f64>() / n,
            macro_recall: per_class.iter().map(|m| m.recall).sum::<f64>() / n,
            macro_f1: per_class.iter().map(|m| m.f1).sum::<f64>() / n,
            total_support: per_class.iter().map(|m| m.support).sum(),
            per_class,
        }
    }

    /// Pretty print the report
    pub fn display(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "{:>28} {:>10} {:>10} {:>10} {:>10}\n\n",
            "", "precision", "recall", "f1-score", "support"
        ));
        for m in &self.per_class {
            output.push_str(&format!(
                "{:>28} {:>10.4} {:>10.4} {:>10.4} {:>10}\n",
                m.class_name, m.precision, m.recall, m.f1, m.support
            ));
        }
        output.push('\n');
        output.push_str(&format!(
            "{:>28} {:>10} {:>10} {:>10.4} {:>10}\n",
            "accuracy", "", "", self.accuracy, self.total_support
        ));
        output.push_str(&format!(
            "{:>28} {:>10.4} {:>10.4} {:>10.4} {:>10}\n",
            "macro avg", self.macro_precision, self.macro_recall, self.macro_f1, self.total_support
        ));

        output
    }

    /// Save the report as pretty JSON
    pub fn save_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Matrix data (row = actual, column = predicted)
    /// Stored as a flat vector in row-major order
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);

        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }

        cm
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            let idx = actual * self.num_classes + predicted;
            self.matrix[idx] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    /// Get the total count
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Get the number of correct predictions (diagonal sum)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Get overall accuracy
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Get the row sums (actual class counts)
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Get the column sums (predicted class counts)
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Matrix as nested rows
    pub fn rows(&self) -> Vec<Vec<usize>> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).collect())
            .collect()
    }

    /// Pretty print the confusion matrix
    pub fn display(&self, class_names: &[String]) -> String {
        let mut output = String::new();

        output.push_str("\nConfusion Matrix (rows=actual, cols=predicted):\n\n");

        let short = |idx: usize, width: usize| -> String {
            class_names
                .get(idx)
                .map(|n| n.chars().take(width).collect())
                .unwrap_or_else(|| idx.to_string())
        };

        output.push_str("          ");
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>6}", short(col, 6)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>8} ", short(row, 8)));

            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    output.push_str(&format!("[{:>4}]", count));
                } else if count > 0 {
                    output.push_str(&format!(" {:>4} ", count));
                } else {
                    output.push_str("    . ");
                }
            }
            output.push('\n');
        }

        output.push_str(&format!("\nAccuracy: {:.2}%\n", self.accuracy() * 100.0));

        output
    }

    /// Save confusion matrix to CSV with class names as headers
    pub fn save_csv(&self, path: &Path, class_names: &[String]) -> std::io::Result<()> {
        let name = |idx: usize| {
            class_names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| idx.to_string())
        };

        let mut content = String::from("actual\\predicted");
        for col in 0..self.num_classes {
            content.push_str(&format!(",{}", name(col)));
        }
        content.push('\n');

        for row in 0..self.num_classes {
            content.push_str(&name(row));
            for col in 0..self.num_classes {
                content.push_str(&format!(",{}", self.get(row, col)));
            }
            content.push('\n');
        }

        std::fs::write(path, content)
    }
}

/// Micro-averaged one-vs-rest ROC AUC
///
/// Every (sample, class) score is ranked against the flattened one-hot labels.
/// Tied scores share their average rank. Returns 0.5 when either side is empty.
pub fn roc_auc_micro(probabilities: &[Vec<f32>], labels: &[usize]) -> f64 {
    let mut scored: Vec<(f32, bool)> = Vec::new();
    for (probs, &label) in probabilities.iter().zip(labels) {
        for (class, &p) in probs.iter().enumerate() {
            scored.push((p, class == label));
        }
    }

    let positives = scored.iter().filter(|(_, pos)| *pos).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0f64;
    let mut i = 0;
    while i < scored.len() {
        let mut j = i;
        while j + 1 < scored.len() && scored[j + 1].0 == scored[i].0 {
            j += 1;
        }
        // ranks are 1-based
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let tied_positives = scored[i..=j].iter().filter(|(_, pos)| *pos).count();
        positive_rank_sum += avg_rank * tied_positives as f64;
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n)
}

/// Running average for tracking metrics during training
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    /// Create a new running average
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value observed over `weight` samples
    pub fn add_weighted(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    /// Add a value
    pub fn add(&mut self, value: f64) {
        self.add_weighted(value, 1);
    }

    /// Get the current average
    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    /// Get the count
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Accuracy tracker for training
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    /// Create a new accuracy tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of correct/total counts
    pub fn add_counts(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
    }

    /// Add a batch of predictions
    pub fn add_batch(&mut self, predictions: &[usize], ground_truth: &[usize]) {
        let correct = predictions
            .iter()
            .zip(ground_truth.iter())
            .filter(|(p, g)| p == g)
            .count();
        self.add_counts(correct, predictions.len().min(ground_truth.len()));
    }

    /// Get the current accuracy
    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }

    /// Get the count
    pub fn count(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let ground_truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 3);

        assert_eq!(cm.total(), 10);
        assert_eq!(cm.correct(), 7);
        assert!((cm.accuracy() - 0.7).abs() < 0.001);
    }

    #[test]
    fn test_row_sums_match_true_class_counts() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let ground_truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3);

        let mut expected = vec![0usize; 3];
        for &g in &ground_truth {
            expected[g] += 1;
        }
        assert_eq!(cm.row_sums(), expected);
        assert_eq!(cm.row_sums().iter().sum::<usize>(), ground_truth.len());

        let direct = predictions
            .iter()
            .zip(&ground_truth)
            .filter(|(p, g)| p == g)
            .count() as f64
            / ground_truth.len() as f64;
        assert!((cm.accuracy() - direct).abs() < 1e-12);
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2);
        let class0 = ClassMetrics::from_confusion_matrix(&cm, 0);

        assert_eq!(class0.true_positives, 2);
        assert_eq!(class0.false_positives, 1);
        assert_eq!(class0.false_negatives, 1);
        assert!((class0.precision - 2.0 / 3.0).abs() < 0.001);
        assert!((class0.recall - 2.0 / 3.0).abs() < 0.001);
    }

    #[test]
    fn test_classification_report_macro_averages() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 0, 1, 1], &[0, 0, 1, 1, 0], 2);
        let names = vec!["melanoma".to_string(), "benign_nevi".to_string()];

        let report = ClassificationReport::from_confusion_matrix(&cm, &names);

        assert_eq!(report.per_class[1].class_name, "benign_nevi");
        assert_eq!(report.total_support, 5);
        // class 0 precision 2/3, class 1 precision 1/2
        assert!((report.macro_precision - (2.0 / 3.0 + 0.5) / 2.0).abs() < 1e-9);
        assert!(report.display().contains("macro avg"));
    }

    #[test]
    fn test_save_csv_uses_class_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("confusion_matrix.csv");
        let cm = ConfusionMatrix::from_predictions(&[0, 1], &[0, 0], 2);

        cm.save_csv(&path, &["a".to_string(), "b".to_string()]).unwrap();

        let csv = std::fs::read_to_string(&path).unwrap();
        assert_eq!(csv, "actual\\predicted,a,b\na,1,1\nb,0,0\n");
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let labels = vec![0, 1, 0];
        let perfect = vec![vec![0.9, 0.1], vec![0.2, 0.8], vec![0.7, 0.3]];
        assert!((roc_auc_micro(&perfect, &labels) - 1.0).abs() < 1e-9);

        let inverted = vec![vec![0.1, 0.9], vec![0.8, 0.2], vec![0.3, 0.7]];
        assert!(roc_auc_micro(&inverted, &labels).abs() < 1e-9);
    }

    #[test]
    fn test_auc_all_ties_is_half() {
        let labels = vec![0, 1];
        let uniform = vec![vec![0.5, 0.5], vec![0.5, 0.5]];
        assert!((roc_auc_micro(&uniform, &labels) - 0.5).abs() < 1e-9);
        assert_eq!(roc_auc_micro(&[], &[]), 0.5);
    }

    #[test]
    fn test_running_average_weighted() {
        let mut avg = RunningAverage::new();

        avg.add_weighted(1.0, 2);
        avg.add(4.0);

        assert_eq!(avg.count(), 3);
        assert!((avg.average() - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_accuracy_tracker() {
        let mut tracker = AccuracyTracker::new();

        tracker.add_batch(&[0, 1, 2], &[0, 1, 0]);

        assert_eq!(tracker.count(), 3);
        assert!((tracker.accuracy() - 2.0 / 3.0).abs() < 0.001);
    }
}
