//! Held-out evaluation: accuracy, per-class report and confusion matrix.

use crate::labels::LabelMap;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: u32,
    pub folder: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub samples: usize,
    pub accuracy: f64,
    pub classes: Vec<ClassMetrics>,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
    /// `confusion[truth][predicted]`, indexed by label id.
    pub confusion: Vec<Vec<usize>>,
}

/// Ratio with zero in place of an undefined quotient.
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Score predictions against ground truth for every label in `labels`.
///
/// Predicted ids outside the label map are counted as misses but do not get
/// a confusion-matrix column.
pub fn evaluate(truth: &[u32], predicted: &[u32], labels: &LabelMap) -> Evaluation {
    let n = labels.len();
    let mut confusion = vec![vec![0usize; n]; n];
    let mut correct = 0usize;

    for (&t, &p) in truth.iter().zip(predicted) {
        if t == p {
            correct += 1;
        }
        if (t as usize) < n && (p as usize) < n {
            confusion[t as usize][p as usize] += 1;
        }
    }

    let samples = truth.len().min(predicted.len());
    let classes: Vec<ClassMetrics> = labels
        .iter()
        .map(|(id, folder)| {
            let i = id as usize;
            let tp = confusion[i][i];
            let support = truth.iter().filter(|&&t| t == id).count();
            let predicted_as = predicted.iter().filter(|&&p| p == id).count();
            let precision = ratio(tp, predicted_as);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassMetrics {
                label: id,
                folder: folder.to_string(),
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect();

    let macro_avg = if classes.is_empty() {
        AverageMetrics { precision: 0.0, recall: 0.0, f1: 0.0 }
    } else {
        let k = classes.len() as f64;
        AverageMetrics {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / k,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / k,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / k,
        }
    };

    let total_support: usize = classes.iter().map(|c| c.support).sum();
    let weighted = |f: fn(&ClassMetrics) -> f64| {
        if total_support == 0 {
            0.0
        } else {
            classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total_support as f64
        }
    };
    let weighted_avg = AverageMetrics {
        precision: weighted(|c| c.precision),
        recall: weighted(|c| c.recall),
        f1: weighted(|c| c.f1),
    };

    Evaluation {
        samples,
        accuracy: ratio(correct, samples),
        classes,
        macro_avg,
        weighted_avg,
        confusion,
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_width = self
            .classes
            .iter()
            .map(|c| c.folder.len())
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(0);

        writeln!(f, "Accuracy: {:.2}%", self.accuracy * 100.0)?;
        writeln!(f)?;
        writeln!(f, "Classification Report:")?;
        writeln!(
            f,
            "{:>name_width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>name_width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.folder, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>name_width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.samples
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>name_width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, self.samples
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Confusion Matrix:")?;
        for row in &self.confusion {
            let cells: Vec<String> = row.iter().map(|v| format!("{v:>3}")).collect();
            writeln!(f, "[{}]", cells.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelMap {
        LabelMap::from_folders(["A001_alice", "A002_bob"])
    }

    #[test]
    fn test_perfect_predictions() {
        let eval = evaluate(&[0, 0, 1], &[0, 0, 1], &labels());
        assert_eq!(eval.accuracy, 1.0);
        assert_eq!(eval.confusion, vec![vec![2, 0], vec![0, 1]]);
        assert!(eval.classes.iter().all(|c| c.f1 == 1.0));
        assert_eq!(eval.weighted_avg.recall, 1.0);
    }

    #[test]
    fn test_mixed_predictions() {
        // alice: 2 right, 1 called bob; bob: 1 right
        let eval = evaluate(&[0, 0, 0, 1], &[0, 0, 1, 1], &labels());
        assert!((eval.accuracy - 0.75).abs() < 1e-12);
        assert_eq!(eval.confusion, vec![vec![2, 1], vec![0, 1]]);

        let alice = &eval.classes[0];
        assert_eq!(alice.support, 3);
        assert!((alice.precision - 1.0).abs() < 1e-12);
        assert!((alice.recall - 2.0 / 3.0).abs() < 1e-12);

        let bob = &eval.classes[1];
        assert!((bob.precision - 0.5).abs() < 1e-12);
        assert!((bob.recall - 1.0).abs() < 1e-12);

        assert!((eval.macro_avg.recall - (2.0 / 3.0 + 1.0) / 2.0).abs() < 1e-12);
        assert!((eval.weighted_avg.recall - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_class_without_predictions_scores_zero() {
        let eval = evaluate(&[0, 1], &[0, 0], &labels());
        let bob = &eval.classes[1];
        assert_eq!(bob.precision, 0.0);
        assert_eq!(bob.recall, 0.0);
        assert_eq!(bob.f1, 0.0);
    }

    #[test]
    fn test_report_mentions_every_class() {
        let text = evaluate(&[0, 1], &[0, 1], &labels()).to_string();
        assert!(text.contains("Accuracy: 100.00%"));
        assert!(text.contains("A001_alice"));
        assert!(text.contains("A002_bob"));
        assert!(text.contains("Confusion Matrix:"));
    }
}
