use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};

use crate::error::{MortalityError, Result};

pub const CHECKPOINT_FILE: &str = "checkpoint.pt";

pub fn checkpoint_path(output_dir: &Path) -> PathBuf {
    output_dir.join(CHECKPOINT_FILE)
}

fn checkpoint_error(path: &Path, reason: impl Into<String>) -> MortalityError {
    MortalityError::Checkpoint {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Writes the full parameter state of `model` to `path`, replacing any
/// previous checkpoint only once the new one is completely on disk.
pub fn save_checkpoint<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<()> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::new();
    let bytes = Recorder::<B>::record(&recorder, model.clone().into_record(), ())
        .map_err(|e| checkpoint_error(path, format!("failed to encode record: {e:?}")))?;

    let staging = path.with_extension("pt.tmp");
    std::fs::write(&staging, bytes)?;
    std::fs::rename(&staging, path)?;
    log::debug!("Checkpoint written to {}", path.display());
    Ok(())
}

/// Overwrites the parameters of `model` with the checkpoint at `path`.
pub fn load_checkpoint<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    if !path.exists() {
        return Err(MortalityError::CheckpointMissing(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::new();
    let record = Recorder::<B>::load(&recorder, bytes, device)
        .map_err(|e| checkpoint_error(path, format!("failed to decode record: {e:?}")))?;
    Ok(model.load_record(record))
}
