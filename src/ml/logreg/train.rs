use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::LogRegModel;
use crate::ml::gbdt_stump::softmax;
use crate::ml::{CancelToken, ClassifierError, TrainDataset};

/// Training options for the logistic regression member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub batch_size: usize,
    pub balance_classes: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 60,
            learning_rate: 0.1,
            l2: 1e-4,
            batch_size: 32,
            balance_classes: true,
        }
    }
}

/// Fit a softmax regression with mini-batch SGD.
///
/// `cancel` is checked before every epoch.
pub fn train_logreg(
    dataset: &TrainDataset,
    options: &TrainOptions,
    seed: u64,
    cancel: &CancelToken,
) -> Result<LogRegModel, ClassifierError> {
    dataset.validate()?;
    if options.epochs == 0 || !(options.learning_rate > 0.0) {
        return Err(ClassifierError::InvalidOptions(
            "logreg needs epochs > 0 and learning_rate > 0".to_string(),
        ));
    }
    if dataset.feature_len == 0 {
        return Err(ClassifierError::InvalidOptions(
            "logreg needs at least one input feature".to_string(),
        ));
    }
    let dim = dataset.feature_len;
    let class_weights = if options.balance_classes {
        dataset.balanced_class_weights()
    } else {
        vec![1.0; dataset.classes.len()]
    };
    let l2 = options.l2.max(0.0);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut weights: Vec<f32> = (0..dataset.classes.len() * dim)
        .map(|_| (rng.random::<f32>() - 0.5) * 0.01)
        .collect();
    let mut bias = vec![0.0f32; dataset.classes.len()];
    let mut order: Vec<usize> = (0..dataset.len()).collect();

    for _ in 0..options.epochs {
        cancel.check()?;
        order.shuffle(&mut rng);
        for batch in order.chunks(options.batch_size.max(1)) {
            let mut weight_grad = vec![0.0f32; weights.len()];
            let mut bias_grad = vec![0.0f32; bias.len()];
            let mut batch_weight = 0.0f32;
            for &row_idx in batch {
                let label = dataset.y[row_idx];
                let sample_weight = class_weights[label];
                if sample_weight == 0.0 {
                    continue;
                }
                let input = &dataset.x[row_idx];
                let logits: Vec<f32> = weights
                    .chunks_exact(dim)
                    .zip(&bias)
                    .map(|(row, b)| b + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>())
                    .collect();
                let probs = softmax(&logits);
                for (class, ((grad_row, grad_b), prob)) in weight_grad
                    .chunks_exact_mut(dim)
                    .zip(bias_grad.iter_mut())
                    .zip(probs)
                    .enumerate()
                {
                    let target = if class == label { 1.0 } else { 0.0 };
                    let err = (prob - target) * sample_weight;
                    *grad_b += err;
                    for (g, x) in grad_row.iter_mut().zip(input) {
                        *g += err * x;
                    }
                }
                batch_weight += sample_weight;
            }
            if batch_weight == 0.0 {
                continue;
            }
            let step = options.learning_rate / batch_weight;
            for (w, g) in weights.iter_mut().zip(&weight_grad) {
                *w -= step * g + options.learning_rate * l2 * *w;
            }
            for (b, g) in bias.iter_mut().zip(&bias_grad) {
                *b -= step * g;
            }
        }
    }
    debug!("logreg finished {} epochs on {} rows", options.epochs, dataset.len());

    let model = LogRegModel {
        model_version: 1,
        feature_len: dim,
        classes: dataset.classes.clone(),
        weights,
        bias,
        temperature: 1.0,
    };
    model.validate()?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> TrainDataset {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..20 {
            let offset = i as f32 * 0.05;
            x.push(vec![1.0 + offset, 0.0]);
            y.push(0);
            x.push(vec![-1.0 - offset, 0.0]);
            y.push(1);
        }
        TrainDataset {
            classes: vec!["a".into(), "b".into()],
            feature_len: 2,
            x,
            y,
        }
    }

    #[test]
    fn learns_linearly_separable_classes() {
        let model = train_logreg(&separable(), &TrainOptions::default(), 3, &CancelToken::new())
            .unwrap();
        assert_eq!(model.predict_class_index(&[1.5, 0.0]), 0);
        assert_eq!(model.predict_class_index(&[-1.5, 0.0]), 1);
    }

    #[test]
    fn same_seed_gives_identical_weights() {
        let options = TrainOptions::default();
        let a = train_logreg(&separable(), &options, 11, &CancelToken::new()).unwrap();
        let b = train_logreg(&separable(), &options, 11, &CancelToken::new()).unwrap();
        assert_eq!(a.weights, b.weights);
    }

    #[test]
    fn cancelled_token_aborts_training() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = train_logreg(&separable(), &TrainOptions::default(), 0, &cancel);
        assert!(matches!(result, Err(ClassifierError::Cancelled)));
    }
}
