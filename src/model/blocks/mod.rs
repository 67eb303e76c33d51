pub mod gru_cell;
pub mod masked;

pub use gru_cell::GruCell;
pub use masked::{masked_mean, observed_steps, step_features};
