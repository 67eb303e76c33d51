use std::fs::OpenOptions;
use std::ops::Range;
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{MortalityError, Result};

pub const TRAINING_LOG_FILE: &str = "training_log.csv";
pub const TRAINING_CURVES_FILE: &str = "train_curves.jpg";

const HEADER: [&str; 4] = ["epoch", "train_loss", "val_loss", "val_roc_auc_score"];
const CURVE_SIZE: (u32, u32) = (1000, 400);

/// One row of the training log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub val_roc_auc_score: f64,
}

/// Append-only CSV log of per-epoch results. The file is reopened for every
/// row so everything written before a crash stays readable.
#[derive(Debug, Clone)]
pub struct TrainingLog {
    path: PathBuf,
}

impl TrainingLog {
    /// Starts a fresh log containing only the header.
    pub fn create(output_dir: &Path) -> Result<Self> {
        let path = output_dir.join(TRAINING_LOG_FILE);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(Self { path })
    }

    /// Existing log of a finished or interrupted run.
    pub fn open(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(TRAINING_LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &EpochRecord) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_rows(&self) -> Result<Vec<EpochRecord>> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let rows = reader.deserialize().collect::<std::result::Result<Vec<EpochRecord>, _>>()?;
        Ok(rows)
    }
}

fn plot_error(err: impl std::fmt::Display) -> MortalityError {
    MortalityError::Plot(err.to_string())
}

fn value_range<'a>(values: impl Iterator<Item = &'a f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0..1.0;
    }
    let pad = ((hi - lo) * 0.05).max(1e-3);
    (lo - pad)..(hi + pad)
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    epochs: Range<f64>,
    curves: &[(Vec<(f64, f64)>, RGBColor)],
) -> Result<()> {
    let range = value_range(curves.iter().flat_map(|(points, _)| points.iter().map(|(_, y)| y)));
    area.draw(&Rectangle::new(
        [(0, 0), (area.dim_in_pixel().0 as i32 - 1, area.dim_in_pixel().1 as i32 - 1)],
        BLACK.stroke_width(1),
    ))
    .map_err(plot_error)?;

    let mut chart = ChartBuilder::on(area)
        .margin(20)
        .build_cartesian_2d(epochs, range)
        .map_err(plot_error)?;
    for (points, color) in curves {
        let finite = points.iter().copied().filter(|(_, y)| y.is_finite());
        chart
            .draw_series(LineSeries::new(finite, color.stroke_width(2)))
            .map_err(plot_error)?;
    }
    Ok(())
}

/// Renders the logged curves to `train_curves.jpg`: training (red) and
/// validation (blue) loss on the left, validation AUROC (green) on the right.
/// Drawn without text so no system fonts are needed.
pub fn render_training_curves(rows: &[EpochRecord], output_dir: &Path) -> Result<PathBuf> {
    let (width, height) = CURVE_SIZE;
    let mut buffer = vec![0u8; (width * height * 3) as usize];
    let epochs = match (rows.first(), rows.last()) {
        (Some(first), Some(last)) if last.epoch > first.epoch => first.epoch as f64..last.epoch as f64,
        (Some(first), _) => first.epoch as f64 - 0.5..first.epoch as f64 + 0.5,
        _ => 0.0..1.0,
    };
    let series = |value: fn(&EpochRecord) -> f64| -> Vec<(f64, f64)> {
        rows.iter().map(|r| (r.epoch as f64, value(r))).collect()
    };

    {
        let root = BitMapBackend::with_buffer(&mut buffer, CURVE_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(plot_error)?;
        let panels = root.split_evenly((1, 2));
        draw_panel(
            &panels[0],
            epochs.clone(),
            &[(series(|r| r.train_loss), RED), (series(|r| r.val_loss), BLUE)],
        )?;
        draw_panel(&panels[1], epochs, &[(series(|r| r.val_roc_auc_score), GREEN)])?;
        root.present().map_err(plot_error)?;
    }

    let image = image::RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| MortalityError::Plot("pixel buffer does not match image size".into()))?;
    let path = output_dir.join(TRAINING_CURVES_FILE);
    image.save(&path).map_err(plot_error)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(epoch: usize) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 1.0 / epoch as f64,
            val_loss: 1.2 / epoch as f64,
            val_roc_auc_score: 0.5 + 0.05 * epoch as f64,
        }
    }

    #[test]
    fn header_then_one_row_per_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrainingLog::create(dir.path()).unwrap();
        for epoch in 1..=3 {
            log.append(&row(epoch)).unwrap();
        }

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "epoch,train_loss,val_loss,val_roc_auc_score");
        assert_eq!(lines.len(), 4);
        assert!(lines[1..].iter().all(|l| l.split(',').count() == 4));

        assert_eq!(log.read_rows().unwrap(), vec![row(1), row(2), row(3)]);
    }

    #[test]
    fn create_truncates_a_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = TrainingLog::create(dir.path()).unwrap();
        log.append(&row(1)).unwrap();

        let log = TrainingLog::create(dir.path()).unwrap();
        assert!(log.read_rows().unwrap().is_empty());
    }

    #[test]
    fn renders_curves_to_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<EpochRecord> = (1..=5).map(row).collect();
        let path = render_training_curves(&rows, dir.path()).unwrap();

        assert_eq!(image::image_dimensions(&path).unwrap(), CURVE_SIZE);
    }

    #[test]
    fn renders_a_single_epoch() {
        let dir = tempfile::tempdir().unwrap();
        assert!(render_training_curves(&[row(1)], dir.path()).is_ok());
    }
}
