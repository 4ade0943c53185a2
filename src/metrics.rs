//! Evaluation metrics for the held-out partition.

use std::fmt::{self, Display, Formatter};

use crate::dataset::LabelSet;

#[derive(Debug, Clone)]
/// Confusion matrix over label indices `0..n_classes`.
pub struct ConfusionMatrix {
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn from_predictions(n_classes: usize, truth: &[usize], predicted: &[usize]) -> Self {
        let mut cm = Self::new(n_classes);
        for (&t, &p) in truth.iter().zip(predicted) {
            cm.add(t, p);
        }
        cm
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Number of true examples of `class`.
    pub fn support(&self, class: usize) -> u32 {
        (0..self.n_classes).map(|p| self.get(class, p)).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Precision/recall statistics for a single class.
pub struct ClassMetrics {
    pub label_index: usize,
    pub name: String,
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    pub f1: f32,
    pub support: u32,
}

/// Accuracy plus a per-class breakdown for the classes present in the test set.
#[derive(Debug, Clone)]
pub struct ClassificationReport {
    pub accuracy: f32,
    pub per_class: Vec<ClassMetrics>,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    /// Builds the report from aligned true and predicted label indices.
    ///
    /// Labels of the set that never occur in `truth` are left out of the
    /// per-class table rather than reported with zero scores.
    pub fn new(labels: &LabelSet, truth: &[usize], predicted: &[usize]) -> Self {
        let cm = ConfusionMatrix::from_predictions(labels.len(), truth, predicted);
        let per_class = (0..labels.len())
            .filter(|&class| cm.support(class) > 0)
            .map(|class| class_metrics(&cm, class, labels.name_or_unknown(class)))
            .collect();
        Self {
            accuracy: accuracy(&cm),
            per_class,
            confusion: cm,
        }
    }

    pub fn support(&self) -> u32 {
        self.per_class.iter().map(|c| c.support).sum()
    }

    /// Unweighted mean of precision, recall and F1 over the reported classes.
    pub fn macro_avg(&self) -> (f32, f32, f32) {
        let n = self.per_class.len().max(1) as f32;
        let (p, r, f) = self.per_class.iter().fold((0.0, 0.0, 0.0), |acc, c| {
            (acc.0 + c.precision, acc.1 + c.recall, acc.2 + c.f1)
        });
        (p / n, r / n, f / n)
    }

    /// Support-weighted mean of precision, recall and F1.
    pub fn weighted_avg(&self) -> (f32, f32, f32) {
        let total = self.support().max(1) as f32;
        let (p, r, f) = self.per_class.iter().fold((0.0, 0.0, 0.0), |acc, c| {
            let w = c.support as f32;
            (acc.0 + w * c.precision, acc.1 + w * c.recall, acc.2 + w * c.f1)
        });
        (p / total, r / total, f / total)
    }
}

impl Display for ClassificationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for c in &self.per_class {
            writeln!(
                f,
                "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                c.name, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        let support = self.support();
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, support
        )?;
        let (p, r, f1) = self.macro_avg();
        writeln!(
            f,
            "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
            "macro avg", p, r, f1, support
        )?;
        let (p, r, f1) = self.weighted_avg();
        write!(
            f,
            "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
            "weighted avg", p, r, f1, support
        )
    }
}

fn class_metrics(cm: &ConfusionMatrix, class: usize, name: &str) -> ClassMetrics {
    let tp = cm.get(class, class) as f32;
    let support = cm.support(class);
    let predicted: u32 = (0..cm.n_classes).map(|t| cm.get(t, class)).sum();
    let precision = if predicted == 0 {
        0.0
    } else {
        tp / predicted as f32
    };
    let recall = if support == 0 {
        0.0
    } else {
        tp / support as f32
    };
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    ClassMetrics {
        label_index: class,
        name: name.to_string(),
        precision,
        recall,
        f1,
        support,
    }
}

/// Compute overall accuracy from a confusion matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f32 {
    let total = cm.total();
    if total == 0 {
        return 0.0;
    }
    let correct: u64 = (0..cm.n_classes).map(|c| cm.get(c, c) as u64).sum();
    correct as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn labels() -> LabelSet {
        LabelSet::new(["A", "B", "C", "D"]).unwrap()
    }

    #[test]
    fn test_perfect_predictions() {
        let truth = [0, 0, 1, 1, 2];
        let report = ClassificationReport::new(&labels(), &truth, &truth);
        assert_eq!(report.accuracy, 1.0);
        assert!(report.per_class.iter().all(|c| c.f1 == 1.0));
    }

    #[test]
    fn test_absent_classes_are_excluded() {
        let truth = [0, 0, 2, 2];
        let predicted = [0, 2, 2, 2];
        let report = ClassificationReport::new(&labels(), &truth, &predicted);
        let names: Vec<&str> = report.per_class.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(report.support(), 4);
    }

    #[test]
    fn test_precision_recall_f1() {
        let truth = [0, 0, 0, 1, 1];
        let predicted = [0, 0, 1, 1, 0];
        let report = ClassificationReport::new(&labels(), &truth, &predicted);
        assert_abs_diff_eq!(report.accuracy, 0.6, epsilon = 1e-6);
        let a = &report.per_class[0];
        assert_abs_diff_eq!(a.precision, 2.0 / 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(a.recall, 2.0 / 3.0, epsilon = 1e-6);
        let b = &report.per_class[1];
        assert_abs_diff_eq!(b.precision, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(b.recall, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(b.f1, 0.5, epsilon = 1e-6);
        let (_, _, weighted_f1) = report.weighted_avg();
        assert_abs_diff_eq!(weighted_f1, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_confusion_has_zero_accuracy() {
        assert_eq!(accuracy(&ConfusionMatrix::new(3)), 0.0);
    }

    #[test]
    fn test_report_renders_class_rows() {
        let report = ClassificationReport::new(&labels(), &[0, 1], &[0, 1]);
        let text = report.to_string();
        assert!(text.contains("precision"));
        assert!(text.contains("weighted avg"));
        assert!(text.lines().any(|l| l.trim_start().starts_with("B ")));
    }
}
