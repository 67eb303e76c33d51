//! Binary classification metrics over host-side scores.
//!
//! Ranking metrics group tied scores into a single threshold, so a perfectly
//! separated split scores exactly 1.0 and ties count as half-ordered pairs.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::MetricError;

fn check_inputs(scores: &[f64], labels: &[usize]) -> Result<(usize, usize), MetricError> {
    if scores.len() != labels.len() {
        return Err(MetricError::LengthMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }
    if labels.is_empty() {
        return Err(MetricError::Empty);
    }
    let positives = labels.iter().filter(|&&l| l == 1).count();
    let negatives = labels.len() - positives;
    match (positives, negatives) {
        (0, _) => Err(MetricError::SingleClass { present: 0 }),
        (_, 0) => Err(MetricError::SingleClass { present: 1 }),
        counts => Ok(counts),
    }
}

/// (positives, negatives) per distinct score, highest score first.
fn threshold_groups(scores: &[f64], labels: &[usize]) -> Vec<(u64, u64)> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut groups: Vec<(u64, u64)> = Vec::new();
    let mut previous: Option<f64> = None;
    for index in order {
        let score = scores[index];
        if previous.map_or(true, |p| p.total_cmp(&score) != Ordering::Equal) {
            groups.push((0, 0));
            previous = Some(score);
        }
        if let Some(group) = groups.last_mut() {
            if labels[index] == 1 {
                group.0 += 1;
            } else {
                group.1 += 1;
            }
        }
    }
    groups
}

/// Area under the ROC curve for positive-class scores.
pub fn roc_auc(scores: &[f64], labels: &[usize]) -> Result<f64, MetricError> {
    let (positives, negatives) = check_inputs(scores, labels)?;

    // twice the trapezoid area, in integer pair counts
    let mut doubled_area: u128 = 0;
    let mut true_positives: u64 = 0;
    for (pos, neg) in threshold_groups(scores, labels) {
        doubled_area += neg as u128 * (2 * true_positives + pos) as u128;
        true_positives += pos;
    }
    Ok(doubled_area as f64 / (2 * positives as u128 * negatives as u128) as f64)
}

/// Average precision: recall-weighted mean of the precision at each
/// threshold.
pub fn average_precision(scores: &[f64], labels: &[usize]) -> Result<f64, MetricError> {
    let (positives, _) = check_inputs(scores, labels)?;

    let mut weighted = 0.0;
    let (mut tp, mut fp) = (0u64, 0u64);
    for (pos, neg) in threshold_groups(scores, labels) {
        tp += pos;
        fp += neg;
        if pos > 0 {
            weighted += pos as f64 * tp as f64 / (tp + fp) as f64;
        }
    }
    Ok(weighted / positives as f64)
}

pub fn accuracy(predicted: &[usize], labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = predicted.iter().zip(labels).filter(|(p, l)| p == l).count();
    correct as f64 / labels.len() as f64
}

/// Rows are true labels, columns predicted labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfusionMatrix {
    counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_predictions(predicted: &[usize], labels: &[usize]) -> Self {
        let mut counts = [[0; 2]; 2];
        for (&p, &l) in predicted.iter().zip(labels) {
            counts[l.min(1)][p.min(1)] += 1;
        }
        Self { counts }
    }

    pub fn get(&self, label: usize, predicted: usize) -> usize {
        self.counts[label][predicted]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    fn class_metrics(&self, class: usize) -> ClassMetrics {
        let other = 1 - class;
        let tp = self.counts[class][class] as f64;
        let predicted = tp + self.counts[other][class] as f64;
        let support = self.counts[class][0] + self.counts[class][1];

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support as f64);
        ClassMetrics {
            precision,
            recall,
            f1_score: ratio(2.0 * precision * recall, precision + recall),
            support,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: usize,
}

/// Per-class precision / recall / F1 plus macro and support-weighted
/// averages, keyed the way the report files expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    #[serde(rename = "0")]
    pub negative: ClassMetrics,
    #[serde(rename = "1")]
    pub positive: ClassMetrics,
    pub accuracy: f64,
    #[serde(rename = "macro avg")]
    pub macro_avg: ClassMetrics,
    #[serde(rename = "weighted avg")]
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn new(matrix: &ConfusionMatrix) -> Self {
        let negative = matrix.class_metrics(0);
        let positive = matrix.class_metrics(1);
        let total = matrix.total();

        let average = |w_negative: f64, w_positive: f64| ClassMetrics {
            precision: negative.precision * w_negative + positive.precision * w_positive,
            recall: negative.recall * w_negative + positive.recall * w_positive,
            f1_score: negative.f1_score * w_negative + positive.f1_score * w_positive,
            support: total,
        };
        let share = |metrics: &ClassMetrics| ratio(metrics.support as f64, total as f64);

        Self {
            negative,
            positive,
            accuracy: ratio((matrix.get(0, 0) + matrix.get(1, 1)) as f64, total as f64),
            macro_avg: average(0.5, 0.5),
            weighted_avg: average(share(&negative), share(&positive)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn perfectly_separated_scores_give_exactly_one() {
        let scores = [0.9, 0.8, 0.8, 0.7, 0.3, 0.2, 0.2];
        let labels = [1, 1, 1, 1, 0, 0, 0];
        assert_eq!(roc_auc(&scores, &labels).unwrap(), 1.0);
        assert_eq!(average_precision(&scores, &labels).unwrap(), 1.0);
    }

    #[test]
    fn matches_reference_values() {
        let scores = [0.1, 0.4, 0.35, 0.8];
        let labels = [0, 0, 1, 1];
        assert_relative_eq!(roc_auc(&scores, &labels).unwrap(), 0.75);
        assert_relative_eq!(average_precision(&scores, &labels).unwrap(), 5.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn tied_scores_count_as_half() {
        let scores = [0.5, 0.5, 0.5, 0.5];
        let labels = [1, 0, 1, 0];
        assert_relative_eq!(roc_auc(&scores, &labels).unwrap(), 0.5);
        assert_relative_eq!(average_precision(&scores, &labels).unwrap(), 0.5);
    }

    #[test]
    fn random_scores_average_to_chance() {
        let mut rng = StdRng::seed_from_u64(7);
        let trials = 50;
        let mean: f64 = (0..trials)
            .map(|_| {
                let labels: Vec<usize> = (0..200).map(|i| i % 2).collect();
                let scores: Vec<f64> = (0..200).map(|_| rng.gen::<f64>()).collect();
                roc_auc(&scores, &labels).unwrap()
            })
            .sum::<f64>()
            / trials as f64;
        assert!((mean - 0.5).abs() < 0.03, "mean AUROC {mean}");
    }

    #[test]
    fn single_class_is_a_named_error() {
        let err = roc_auc(&[0.2, 0.4], &[1, 1]).unwrap_err();
        assert_eq!(err, MetricError::SingleClass { present: 1 });
        let err = average_precision(&[0.2, 0.4], &[0, 0]).unwrap_err();
        assert_eq!(err, MetricError::SingleClass { present: 0 });
        assert_eq!(roc_auc(&[], &[]).unwrap_err(), MetricError::Empty);
    }

    #[test]
    fn report_for_eight_of_ten_correct() {
        let labels = [1, 0, 1, 0, 1, 0, 1, 0, 1, 0];
        let predicted = [1, 0, 1, 0, 1, 0, 1, 0, 0, 1];
        assert_relative_eq!(accuracy(&predicted, &labels), 0.8);

        let matrix = ConfusionMatrix::from_predictions(&predicted, &labels);
        assert_eq!((matrix.get(0, 0), matrix.get(0, 1)), (4, 1));
        assert_eq!((matrix.get(1, 0), matrix.get(1, 1)), (1, 4));

        let report = ClassificationReport::new(&matrix);
        assert_relative_eq!(report.accuracy, 0.8);
        assert_relative_eq!(report.positive.precision, 0.8);
        assert_relative_eq!(report.positive.f1_score, 0.8);
        assert_eq!(report.negative.support, 5);
        assert_eq!(report.weighted_avg.support, 10);
        assert_relative_eq!(report.macro_avg.recall, 0.8);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["1"]["f1-score"].is_number());
        assert!(json["macro avg"]["precision"].is_number());
        assert_eq!(serde_json::to_value(matrix).unwrap(), serde_json::json!([[4, 1], [1, 4]]));
    }

    #[test]
    fn empty_predictions_do_not_divide_by_zero() {
        let report = ClassificationReport::new(&ConfusionMatrix::default());
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.positive.f1_score, 0.0);
    }
}
