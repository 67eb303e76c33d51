use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::batch::{BatchShapes, CollatedBatch};
use crate::error::{MortalityError, Result};

/// One ICU stay: irregular observations per sensor plus static attributes.
///
/// `values` and `mask` are indexed `[sensor][step]` and every sensor row has
/// one entry per element of `times`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub times: Vec<f32>,
    pub values: Vec<Vec<f32>>,
    pub mask: Vec<Vec<bool>>,
    pub static_features: Vec<f32>,
    pub label: usize,
}

impl PatientRecord {
    pub fn sensor_count(&self) -> usize {
        self.values.len()
    }

    pub fn seq_len(&self) -> usize {
        self.times.len()
    }

    fn validate(&self, index: usize) -> Result<()> {
        let invalid = |reason: String| MortalityError::InvalidRecord { index, reason };

        if self.label > 1 {
            return Err(invalid(format!("label {} outside {{0, 1}}", self.label)));
        }
        if self.mask.len() != self.values.len() {
            return Err(invalid(format!(
                "{} mask rows for {} sensors",
                self.mask.len(),
                self.values.len()
            )));
        }
        let steps = self.times.len();
        for (sensor, (values, mask)) in self.values.iter().zip(&self.mask).enumerate() {
            if values.len() != steps || mask.len() != steps {
                return Err(invalid(format!(
                    "sensor {sensor} has {} values and {} mask entries for {steps} time points",
                    values.len(),
                    mask.len()
                )));
            }
        }
        Ok(())
    }
}

/// Anything a [`DataLoader`](crate::data::DataLoader) can index and collate.
pub trait BatchSource: Send + Sync + 'static {
    /// Number of addressable items.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collates the given items into one batch.
    fn collate(&self, indices: &[usize]) -> CollatedBatch;
}

/// Evaluation-style split: one sample per item, padded to a shared length.
#[derive(Debug, Clone)]
pub struct MortalityDataset {
    records: Vec<PatientRecord>,
    sensor_count: usize,
    static_size: usize,
    seq_len: usize,
}

impl MortalityDataset {
    pub fn new(records: Vec<PatientRecord>, max_seq_len: Option<usize>) -> Result<Self> {
        let first = records.first().ok_or(MortalityError::EmptySplit("dataset"))?;
        let sensor_count = first.sensor_count();
        let static_size = first.static_features.len();

        for (index, record) in records.iter().enumerate() {
            record.validate(index)?;
            if record.sensor_count() != sensor_count {
                return Err(MortalityError::InvalidRecord {
                    index,
                    reason: format!(
                        "{} sensors, dataset has {sensor_count}",
                        record.sensor_count()
                    ),
                });
            }
            if record.static_features.len() != static_size {
                return Err(MortalityError::InvalidRecord {
                    index,
                    reason: format!(
                        "{} static attributes, dataset has {static_size}",
                        record.static_features.len()
                    ),
                });
            }
        }

        let longest = records.iter().map(PatientRecord::seq_len).max().unwrap_or(0);
        let seq_len = max_seq_len.map_or(longest, |cap| longest.min(cap)).max(1);

        Ok(Self {
            records,
            sensor_count,
            static_size,
            seq_len,
        })
    }

    /// Loads a JSON array of [`PatientRecord`]s.
    pub fn from_json(path: impl AsRef<Path>, max_seq_len: Option<usize>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let records: Vec<PatientRecord> = serde_json::from_str(&content)?;
        log::info!(
            "Loaded {} patient records from {}",
            records.len(),
            path.as_ref().display()
        );
        Self::new(records, max_seq_len)
    }

    /// Pads or truncates every sample to exactly `seq_len` steps.
    pub fn set_seq_len(&mut self, seq_len: usize) {
        self.seq_len = seq_len.max(1);
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn longest_record(&self) -> usize {
        self.records.iter().map(PatientRecord::seq_len).max().unwrap_or(0)
    }

    pub fn records(&self) -> &[PatientRecord] {
        &self.records
    }

    pub fn shapes(&self) -> BatchShapes {
        BatchShapes {
            max_seq_len: self.seq_len,
            sensor_count: self.sensor_count,
            static_size: self.static_size,
        }
    }

    /// Counts of negative and positive labels.
    pub fn class_counts(&self) -> [usize; 2] {
        self.records.iter().fold([0, 0], |mut counts, r| {
            counts[r.label] += 1;
            counts
        })
    }

    fn collate_records<'a>(&self, records: impl Iterator<Item = &'a PatientRecord>) -> CollatedBatch {
        let shapes = self.shapes();
        let (f, t, s) = (shapes.sensor_count, shapes.max_seq_len, shapes.static_size);

        let mut batch = CollatedBatch {
            batch_size: 0,
            shapes,
            values: Vec::new(),
            times: Vec::new(),
            static_features: Vec::new(),
            labels: Vec::new(),
            mask: Vec::new(),
            delta: Vec::new(),
        };

        for record in records {
            let steps = record.seq_len().min(t);

            let mut times = vec![0.0f32; t];
            times[..steps].copy_from_slice(&record.times[..steps]);

            for sensor in 0..f {
                let mut values = vec![0.0f32; t];
                let mut mask = vec![0.0f32; t];
                for step in 0..steps {
                    if record.mask[sensor][step] {
                        values[step] = record.values[sensor][step];
                        mask[step] = 1.0;
                    }
                }
                let delta = time_since_observed(&times[..steps], &mask[..steps], t);
                batch.values.extend(values);
                batch.mask.extend(mask);
                batch.delta.extend(delta);
            }

            batch.times.extend(times);
            batch.static_features.extend_from_slice(&record.static_features[..s]);
            batch.labels.push(record.label);
            batch.batch_size += 1;
        }

        batch
    }
}

impl BatchSource for MortalityDataset {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn collate(&self, indices: &[usize]) -> CollatedBatch {
        self.collate_records(indices.iter().map(|&i| &self.records[i]))
    }
}

/// GRU-D time-since-last-observation for one sensor, zero-padded to `padded_len`.
fn time_since_observed(times: &[f32], mask: &[f32], padded_len: usize) -> Vec<f32> {
    let mut delta = vec![0.0f32; padded_len];
    for step in 1..times.len() {
        let gap = times[step] - times[step - 1];
        delta[step] = if mask[step - 1] > 0.0 {
            gap
        } else {
            gap + delta[step - 1]
        };
    }
    delta
}

/// Training split served as (positive, negative) pairs so every batch is
/// class balanced. Collating k pairs yields 2k samples.
#[derive(Debug, Clone)]
pub struct PairedDataset {
    inner: MortalityDataset,
    positives: Vec<usize>,
    negatives: Vec<usize>,
}

impl PairedDataset {
    pub fn new(dataset: MortalityDataset) -> Result<Self> {
        let (positives, negatives): (Vec<usize>, Vec<usize>) =
            (0..dataset.records.len()).partition(|&i| dataset.records[i].label == 1);

        if positives.is_empty() || negatives.is_empty() {
            return Err(MortalityError::EmptySplit("train (pairing needs both classes)"));
        }
        log::info!(
            "Paired training split: {} positives, {} negatives, {} pairs",
            positives.len(),
            negatives.len(),
            positives.len().max(negatives.len())
        );

        Ok(Self {
            inner: dataset,
            positives,
            negatives,
        })
    }

    pub fn pair(&self, index: usize) -> (usize, usize) {
        (
            self.positives[index % self.positives.len()],
            self.negatives[index % self.negatives.len()],
        )
    }

}

impl BatchSource for PairedDataset {
    fn len(&self) -> usize {
        self.positives.len().max(self.negatives.len())
    }

    fn collate(&self, indices: &[usize]) -> CollatedBatch {
        let pairs: Vec<(usize, usize)> = indices.iter().map(|&i| self.pair(i)).collect();
        let ordered = pairs
            .iter()
            .map(|&(first, _)| first)
            .chain(pairs.iter().map(|&(_, second)| second));
        self.inner
            .collate_records(ordered.map(|i| &self.inner.records[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(times: Vec<f32>, observed: Vec<bool>, label: usize) -> PatientRecord {
        let values = times.iter().map(|t| t * 10.0).collect();
        PatientRecord {
            times,
            values: vec![values],
            mask: vec![observed],
            static_features: vec![label as f32],
            label,
        }
    }

    #[test]
    fn delta_accumulates_across_missing_steps() {
        let ds = MortalityDataset::new(
            vec![record(
                vec![0.0, 1.0, 3.0, 4.0],
                vec![true, false, false, true],
                0,
            )],
            None,
        )
        .unwrap();

        let batch = ds.collate(&[0]);
        assert_eq!(batch.delta, vec![0.0, 1.0, 3.0, 4.0]);
        assert_eq!(batch.mask, vec![1.0, 0.0, 0.0, 1.0]);
        // unobserved entries are zeroed
        assert_eq!(batch.values, vec![0.0, 0.0, 0.0, 40.0]);
    }

    #[test]
    fn delta_resets_after_observation() {
        let delta = time_since_observed(&[0.0, 2.0, 5.0], &[1.0, 1.0, 0.0], 3);
        assert_eq!(delta, vec![0.0, 2.0, 3.0]);
    }

    #[test]
    fn shorter_records_are_padded_and_longer_truncated() {
        let ds = MortalityDataset::new(
            vec![
                record(vec![0.0, 1.0], vec![true, true], 0),
                record(vec![0.0, 1.0, 2.0, 3.0, 4.0], vec![true; 5], 1),
            ],
            Some(3),
        )
        .unwrap();
        assert_eq!(ds.seq_len(), 3);

        let batch = ds.collate(&[0, 1]);
        batch.validate().unwrap();
        assert_eq!(batch.times, vec![0.0, 1.0, 0.0, 0.0, 1.0, 2.0]);
        assert_eq!(batch.mask, vec![1.0, 1.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(batch.labels, vec![0, 1]);
    }

    #[test]
    fn rejects_ragged_sensor_rows() {
        let mut bad = record(vec![0.0, 1.0], vec![true, true], 0);
        bad.values[0].pop();
        let err = MortalityDataset::new(vec![bad], None).unwrap_err();
        assert!(matches!(err, MortalityError::InvalidRecord { index: 0, .. }));
    }

    #[test]
    fn paired_collation_doubles_the_batch() {
        let ds = MortalityDataset::new(
            vec![
                record(vec![0.0], vec![true], 1),
                record(vec![0.0], vec![true], 0),
                record(vec![0.0], vec![true], 0),
                record(vec![0.0], vec![true], 0),
            ],
            None,
        )
        .unwrap();
        let paired = PairedDataset::new(ds).unwrap();

        assert_eq!(paired.len(), 3);
        let batch = paired.collate(&[0, 1, 2]);
        assert_eq!(batch.batch_size, 6);
        assert_eq!(batch.labels, vec![1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn pairing_requires_both_classes() {
        let ds = MortalityDataset::new(vec![record(vec![0.0], vec![true], 0)], None).unwrap();
        assert!(matches!(
            PairedDataset::new(ds),
            Err(MortalityError::EmptySplit(_))
        ));
    }
}
