use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{GbdtStumpModel, Stump, softmax};
use crate::ml::{CancelToken, ClassifierError, TrainDataset};

/// Training hyperparameters for stump boosting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    /// Number of boosting rounds.
    pub rounds: usize,
    /// Learning rate applied per round.
    pub learning_rate: f32,
    /// Number of bins used for split search.
    pub bins: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            rounds: 60,
            learning_rate: 0.1,
            bins: 32,
        }
    }
}

/// Train a multi-class stump-GBDT model using softmax gradient boosting.
///
/// Each round fits one stump per class to the softmax residuals. Split search runs over
/// features in parallel. `cancel` is checked before every round.
pub fn train_gbdt_stump(
    dataset: &TrainDataset,
    options: &TrainOptions,
    cancel: &CancelToken,
) -> Result<GbdtStumpModel, ClassifierError> {
    dataset.validate()?;
    if options.rounds == 0 || !(options.learning_rate > 0.0) {
        return Err(ClassifierError::InvalidOptions(
            "gbdt_stump needs rounds > 0 and learning_rate > 0".to_string(),
        ));
    }
    let n_classes = dataset.classes.len();
    let binner = Binner::fit(&dataset.x, dataset.feature_len, options.bins.clamp(2, 256));
    let binned: Vec<Vec<u8>> = dataset.x.iter().map(|row| binner.bin_row(row)).collect();

    let init_raw = log_priors(&dataset.y, n_classes);
    let mut raw = vec![init_raw.clone(); dataset.len()];
    let mut rounds = Vec::with_capacity(options.rounds);
    for _ in 0..options.rounds {
        cancel.check()?;
        let probs: Vec<Vec<f32>> = raw.iter().map(|row_raw| softmax(row_raw)).collect();
        let round: Vec<Stump> = (0..n_classes)
            .map(|class_idx| {
                let residuals: Vec<f32> = probs
                    .iter()
                    .zip(&dataset.y)
                    .map(|(row_probs, &label)| {
                        let target = if label == class_idx { 1.0 } else { 0.0 };
                        target - row_probs[class_idx]
                    })
                    .collect();
                fit_stump(&binner, &binned, &dataset.x, &residuals)
            })
            .collect();
        for (row_raw, row) in raw.iter_mut().zip(&dataset.x) {
            for (value, stump) in row_raw.iter_mut().zip(&round) {
                *value += options.learning_rate * stump.predict(row);
            }
        }
        rounds.push(round);
    }
    debug!(
        "gbdt_stump finished {} rounds on {} rows",
        options.rounds,
        dataset.len()
    );

    let model = GbdtStumpModel {
        model_version: 1,
        feature_len: dataset.feature_len,
        classes: dataset.classes.clone(),
        learning_rate: options.learning_rate,
        init_raw,
        stumps: rounds,
    };
    model.validate()?;
    Ok(model)
}

fn log_priors(y: &[usize], n_classes: usize) -> Vec<f32> {
    let mut counts = vec![0usize; n_classes];
    for &label in y.iter().filter(|&&label| label < n_classes) {
        counts[label] += 1;
    }
    let total = y.len().max(1) as f32;
    counts
        .into_iter()
        .map(|count| (count as f32 / total).max(1e-6).ln())
        .collect()
}

/// Equal-width binning of each feature over its observed range.
#[derive(Debug)]
struct Binner {
    mins: Vec<f32>,
    spans: Vec<f32>,
    bins: usize,
}

impl Binner {
    fn fit(x: &[Vec<f32>], feature_len: usize, bins: usize) -> Self {
        let mut mins = vec![f32::INFINITY; feature_len];
        let mut maxs = vec![f32::NEG_INFINITY; feature_len];
        for row in x {
            for ((min, max), &value) in mins.iter_mut().zip(maxs.iter_mut()).zip(row) {
                if value.is_finite() {
                    *min = min.min(value);
                    *max = max.max(value);
                }
            }
        }
        let (mins, spans) = mins
            .into_iter()
            .zip(maxs)
            .map(|(min, max)| {
                if min.is_finite() && max > min {
                    (min, max - min)
                } else if min.is_finite() {
                    (min, 1.0)
                } else {
                    (0.0, 1.0)
                }
            })
            .unzip();
        Self { mins, spans, bins }
    }

    fn bin_row(&self, row: &[f32]) -> Vec<u8> {
        let top = (self.bins - 1) as f32;
        self.mins
            .iter()
            .zip(&self.spans)
            .enumerate()
            .map(|(feature, (&min, &span))| {
                let value = row.get(feature).copied().unwrap_or(0.0);
                let t = ((value - min) / span).clamp(0.0, 1.0);
                (t * top).round() as u8
            })
            .collect()
    }

    /// Raw-space threshold halfway between the centres of `split_bin` and the next bin.
    fn threshold(&self, feature: usize, split_bin: usize) -> f32 {
        let t = (split_bin as f32 + 0.5) / (self.bins - 1) as f32;
        self.mins[feature] + t * self.spans[feature]
    }
}

/// Count, sum and sum of squares of residuals falling into one side of a split.
#[derive(Debug, Default, Clone, Copy)]
struct Moments {
    count: u32,
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    fn merge(&mut self, other: &Moments) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }

    fn minus(&self, other: &Moments) -> Moments {
        Moments {
            count: self.count - other.count,
            sum: self.sum - other.sum,
            sum_sq: self.sum_sq - other.sum_sq,
        }
    }

    fn sse(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_sq - self.sum * self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    bin: usize,
    /// Reduction in squared error against not splitting.
    gain: f64,
}

fn best_split(binned: &[Vec<u8>], residuals: &[f32], feature: usize, bins: usize) -> Option<Split> {
    let mut histogram = vec![Moments::default(); bins];
    for (row, &residual) in binned.iter().zip(residuals) {
        let bin = row.get(feature).copied().unwrap_or(0) as usize;
        histogram[bin].push(residual as f64);
    }
    let mut total = Moments::default();
    histogram.iter().for_each(|bin| total.merge(bin));
    let parent_sse = total.sse();

    let mut left = Moments::default();
    let mut best: Option<Split> = None;
    for (bin, moments) in histogram.iter().enumerate().take(bins - 1) {
        left.merge(moments);
        let right = total.minus(&left);
        if left.count == 0 || right.count == 0 {
            continue;
        }
        let gain = parent_sse - left.sse() - right.sse();
        if best.is_none_or(|current| gain > current.gain) {
            best = Some(Split { feature, bin, gain });
        }
    }
    best
}

fn fit_stump(binner: &Binner, binned: &[Vec<u8>], x: &[Vec<f32>], residuals: &[f32]) -> Stump {
    let best = (0..binner.mins.len())
        .into_par_iter()
        .filter_map(|feature| best_split(binned, residuals, feature, binner.bins))
        .reduce_with(|a, b| {
            // Ties go to the lower feature index so results do not depend on scheduling.
            if b.gain > a.gain || (b.gain == a.gain && b.feature < a.feature) {
                b
            } else {
                a
            }
        });
    let Some(split) = best else {
        // No feature separates the rows: a constant stump carrying the mean residual.
        let mean = residuals.iter().sum::<f32>() / residuals.len().max(1) as f32;
        return Stump {
            feature_index: 0,
            threshold: f32::INFINITY,
            left_value: mean,
            right_value: mean,
            gain: 0.0,
        };
    };

    let threshold = binner.threshold(split.feature, split.bin);
    let mut left = Moments::default();
    let mut right = Moments::default();
    for (row, &residual) in x.iter().zip(residuals) {
        let value = row.get(split.feature).copied().unwrap_or(0.0);
        if value <= threshold {
            left.push(residual as f64);
        } else {
            right.push(residual as f64);
        }
    }
    let mean = |side: Moments| if side.count == 0 { 0.0 } else { (side.sum / side.count as f64) as f32 };
    Stump {
        feature_index: split.feature as u16,
        threshold,
        left_value: mean(left),
        right_value: mean(right),
        gain: split.gain.max(0.0) as f32,
    }
}
