use serde::{Deserialize, Serialize};

use super::ClassifierError;

const MIN_STD: f32 = 1e-6;

/// Per-feature z-score transform fitted on training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Standardizer {
    /// Fit mean and population standard deviation per column.
    ///
    /// Constant columns get a unit deviation so they map to zero instead of dividing by zero.
    pub fn fit(rows: &[Vec<f32>], d: usize) -> Self {
        let mut mean = vec![0.0f64; d];
        for row in rows {
            for (acc, &v) in mean.iter_mut().zip(row) {
                *acc += v as f64;
            }
        }
        let n = rows.len().max(1) as f64;
        for v in &mut mean {
            *v /= n;
        }

        let mut var = vec![0.0f64; d];
        for row in rows {
            for i in 0..d.min(row.len()) {
                let diff = row[i] as f64 - mean[i];
                var[i] += diff * diff;
            }
        }
        let std = var
            .into_iter()
            .map(|v| {
                let s = (v / n).sqrt() as f32;
                if s.is_finite() && s > MIN_STD { s } else { 1.0 }
            })
            .collect();
        Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            std,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, row: &[f32]) -> Vec<f32> {
        self.mean
            .iter()
            .zip(&self.std)
            .enumerate()
            .map(|(i, (mean, std))| {
                let v = row.get(i).copied().unwrap_or(0.0);
                let z = (v - mean) / std.max(MIN_STD);
                if z.is_finite() { z } else { 0.0 }
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.mean.len() != self.std.len() {
            return Err(ClassifierError::InvalidModel(
                "standardizer mean/std length mismatch".to_string(),
            ));
        }
        if self
            .mean
            .iter()
            .chain(&self.std)
            .any(|v| !v.is_finite())
        {
            return Err(ClassifierError::InvalidModel(
                "standardizer contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}
