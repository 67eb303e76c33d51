use std::fmt;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{MortalityError, Result};

/// Shape parameters every batch of a run must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchShapes {
    /// Time steps per sample (T).
    pub max_seq_len: usize,
    /// Sensors per time step (F).
    pub sensor_count: usize,
    /// Static attributes per patient (S).
    pub static_size: usize,
}

impl fmt::Display for BatchShapes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(T={}, F={}, S={})",
            self.max_seq_len, self.sensor_count, self.static_size
        )
    }
}

impl BatchShapes {
    pub fn check(&self, found: BatchShapes) -> Result<()> {
        if *self == found {
            Ok(())
        } else {
            Err(MortalityError::ShapeMismatch {
                expected: *self,
                found,
            })
        }
    }
}

/// Host-side batch produced by collation. Plain vectors so that loader
/// workers can hand it across threads; row-major in the documented layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct CollatedBatch {
    pub batch_size: usize,
    pub shapes: BatchShapes,
    /// N x F x T
    pub values: Vec<f32>,
    /// N x T
    pub times: Vec<f32>,
    /// N x S
    pub static_features: Vec<f32>,
    /// N
    pub labels: Vec<usize>,
    /// N x F x T, 1.0 where observed
    pub mask: Vec<f32>,
    /// N x F x T
    pub delta: Vec<f32>,
}

impl CollatedBatch {
    /// Checks that every member shares the leading dimension and the
    /// per-member layouts of the six-field contract.
    pub fn validate(&self) -> Result<()> {
        let n = self.batch_size;
        let BatchShapes {
            max_seq_len: t,
            sensor_count: f,
            static_size: s,
        } = self.shapes;

        let expectations = [
            ("values", self.values.len(), n * f * t),
            ("times", self.times.len(), n * t),
            ("static", self.static_features.len(), n * s),
            ("labels", self.labels.len(), n),
            ("mask", self.mask.len(), n * f * t),
            ("delta", self.delta.len(), n * f * t),
        ];
        for (name, found, expected) in expectations {
            if found != expected {
                return Err(MortalityError::MalformedBatch(format!(
                    "{name} has {found} elements, expected {expected} for N={n} {}",
                    self.shapes
                )));
            }
        }
        if let Some(label) = self.labels.iter().find(|&&l| l > 1) {
            return Err(MortalityError::MalformedBatch(format!(
                "label {label} outside {{0, 1}}"
            )));
        }
        Ok(())
    }

    pub fn to_batch<B: Backend>(&self, device: &B::Device) -> Result<MortalityBatch<B>> {
        self.validate()?;

        let n = self.batch_size;
        let BatchShapes {
            max_seq_len: t,
            sensor_count: f,
            static_size: s,
        } = self.shapes;
        let labels: Vec<i64> = self.labels.iter().map(|&l| l as i64).collect();

        Ok(MortalityBatch {
            values: Tensor::from_data(TensorData::new(self.values.clone(), [n, f, t]), device),
            times: Tensor::from_data(TensorData::new(self.times.clone(), [n, t]), device),
            static_features: Tensor::from_data(
                TensorData::new(self.static_features.clone(), [n, s]),
                device,
            ),
            labels: Tensor::from_data(TensorData::new(labels, [n]), device),
            mask: Tensor::from_data(TensorData::new(self.mask.clone(), [n, f, t]), device),
            delta: Tensor::from_data(TensorData::new(self.delta.clone(), [n, f, t]), device),
        })
    }
}

/// The six-field batch every loader and model agrees on.
#[derive(Debug, Clone)]
pub struct MortalityBatch<B: Backend> {
    pub values: Tensor<B, 3>,
    pub times: Tensor<B, 2>,
    pub static_features: Tensor<B, 2>,
    pub labels: Tensor<B, 1, Int>,
    pub mask: Tensor<B, 3>,
    pub delta: Tensor<B, 3>,
}

impl<B: Backend> MortalityBatch<B> {
    pub fn shapes(&self) -> BatchShapes {
        let [_, sensor_count, max_seq_len] = self.values.dims();
        let [_, static_size] = self.static_features.dims();
        BatchShapes {
            max_seq_len,
            sensor_count,
            static_size,
        }
    }

    /// Moves the model inputs to `device`; labels stay where the loss is computed.
    pub fn inputs_to_device(self, device: &B::Device) -> Self {
        Self {
            values: self.values.to_device(device),
            times: self.times.to_device(device),
            static_features: self.static_features.to_device(device),
            labels: self.labels,
            mask: self.mask.to_device(device),
            delta: self.delta.to_device(device),
        }
    }

    /// Splits the batch into the model's named inputs and the labels.
    pub fn into_parts(self) -> (ModelInput<B>, Tensor<B, 1, Int>) {
        (
            ModelInput {
                x: self.values,
                static_features: self.static_features,
                time: self.times,
                sensor_mask: self.mask,
                delta: self.delta,
            },
            self.labels,
        )
    }
}

/// Named model inputs: `x`, `static`, `time`, `sensor_mask`, `delta`.
#[derive(Debug, Clone)]
pub struct ModelInput<B: Backend> {
    pub x: Tensor<B, 3>,
    pub static_features: Tensor<B, 2>,
    pub time: Tensor<B, 2>,
    pub sensor_mask: Tensor<B, 3>,
    pub delta: Tensor<B, 3>,
}
