pub mod batch;
pub mod dataloader;
pub mod dataset;

pub use batch::{BatchShapes, CollatedBatch, ModelInput, MortalityBatch};
pub use dataloader::{BatchIter, DataLoader};
pub use dataset::{BatchSource, MortalityDataset, PairedDataset, PatientRecord};
