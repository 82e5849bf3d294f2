use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use shared::RiceVariety;
use strum::EnumCount;

use super::EvaluationError;

/// Misclassifications listed in the printed report.
pub const REPORTED_MISCLASSIFICATIONS: usize = 5;

/// Rows are actual varieties, columns predicted ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: [[usize; RiceVariety::COUNT]; RiceVariety::COUNT],
}

impl ConfusionMatrix {
    pub fn record(&mut self, actual: RiceVariety, predicted: RiceVariety) {
        self.counts[actual.index()][predicted.index()] += 1;
    }

    pub fn count(&self, actual: RiceVariety, predicted: RiceVariety) -> usize {
        self.counts[actual.index()][predicted.index()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..RiceVariety::COUNT).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// Number of samples whose actual label is `variety`.
    pub fn samples(&self, variety: RiceVariety) -> usize {
        self.counts[variety.index()].iter().sum()
    }

    /// Share of `variety` samples predicted correctly (recall).
    pub fn class_accuracy(&self, variety: RiceVariety) -> f64 {
        ratio(self.count(variety, variety), self.samples(variety))
    }

    pub fn precision(&self, variety: RiceVariety) -> f64 {
        let predicted: usize = self.counts.iter().map(|row| row[variety.index()]).sum();
        ratio(self.count(variety, variety), predicted)
    }

    pub fn rows(&self) -> &[[usize; RiceVariety::COUNT]; RiceVariety::COUNT] {
        &self.counts
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Misclassification {
    pub path: PathBuf,
    pub actual: RiceVariety,
    pub predicted: RiceVariety,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassSummary {
    pub variety: RiceVariety,
    pub accuracy: f64,
    pub precision: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    pub matrix: ConfusionMatrix,
    /// Every misclassified sample, in dataset order.
    pub misclassified: Vec<Misclassification>,
    /// Samples that could not be read or classified.
    pub skipped: usize,
}

impl EvaluationReport {
    pub fn record(&mut self, path: &Path, actual: RiceVariety, predicted: RiceVariety, confidence: f64) {
        self.matrix.record(actual, predicted);
        if actual != predicted {
            self.misclassified.push(Misclassification {
                path: path.to_path_buf(),
                actual,
                predicted,
                confidence,
            });
        }
    }

    pub fn accuracy(&self) -> f64 {
        self.matrix.accuracy()
    }

    pub fn class_summaries(&self) -> Vec<ClassSummary> {
        RiceVariety::ALL
            .iter()
            .map(|&variety| ClassSummary {
                variety,
                accuracy: self.matrix.class_accuracy(variety),
                precision: self.matrix.precision(variety),
                samples: self.matrix.samples(variety),
            })
            .collect()
    }

    /// Human-readable summary, as printed by the evaluation binary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let accuracy = self.accuracy();
        let _ = writeln!(
            out,
            "Overall Accuracy: {:.4} ({:.2}%) over {} images",
            accuracy,
            accuracy * 100.0,
            self.matrix.total()
        );
        if self.skipped > 0 {
            let _ = writeln!(out, "Skipped: {} images", self.skipped);
        }

        let _ = writeln!(out, "\nConfusion Matrix (rows actual, columns predicted):");
        let _ = write!(out, "{:>10}", "");
        for variety in RiceVariety::ALL {
            let _ = write!(out, "{:>10}", variety.to_string());
        }
        let _ = writeln!(out);
        for (variety, row) in RiceVariety::ALL.iter().zip(self.matrix.rows()) {
            let _ = write!(out, "{:>10}", variety.to_string());
            for count in row {
                let _ = write!(out, "{:>10}", count);
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "\nPer-class Accuracy:");
        for summary in self.class_summaries() {
            let _ = writeln!(
                out,
                "{}: {:.4} ({:.2}%), precision {:.4}, {} samples",
                summary.variety,
                summary.accuracy,
                summary.accuracy * 100.0,
                summary.precision,
                summary.samples
            );
        }

        if !self.misclassified.is_empty() {
            let _ = writeln!(
                out,
                "\nFound {} misclassified images:",
                self.misclassified.len()
            );
            for (i, miss) in self
                .misclassified
                .iter()
                .take(REPORTED_MISCLASSIFICATIONS)
                .enumerate()
            {
                let _ = writeln!(out, "  {}. {}", i + 1, miss.path.display());
                let _ = writeln!(
                    out,
                    "     True: {}, Predicted: {} (Confidence: {:.3})",
                    miss.actual, miss.predicted, miss.confidence
                );
            }
        }
        out
    }

    /// One row per variety: name, accuracy, precision, sample count.
    pub fn write_csv(&self, path: &Path) -> Result<(), EvaluationError> {
        let io_err = |source| EvaluationError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = std::fs::File::create(path).map_err(io_err)?;
        writeln!(file, "Rice Type,Accuracy,Precision,Samples").map_err(io_err)?;
        for summary in self.class_summaries() {
            writeln!(
                file,
                "{},{:.6},{:.6},{}",
                summary.variety, summary.accuracy, summary.precision, summary.samples
            )
            .map_err(io_err)?;
        }
        Ok(())
    }
}
