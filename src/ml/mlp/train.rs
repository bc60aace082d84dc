use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::MlpModel;
use crate::ml::{CancelToken, ClassifierError, TrainDataset, softmax};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub hidden_size: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub l2_penalty: f32,
    pub dropout: f32,
    pub label_smoothing: f32,
    pub balance_classes: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            hidden_size: 32,
            epochs: 40,
            batch_size: 32,
            learning_rate: 0.05,
            l2_penalty: 1e-4,
            dropout: 0.1,
            label_smoothing: 0.05,
            balance_classes: true,
        }
    }
}

/// Backpropagation with mini-batch SGD, inverted dropout and label smoothing.
///
/// Rows are expected to be standardized already. `cancel` is checked before every epoch.
pub fn train_mlp(
    dataset: &TrainDataset,
    options: &TrainOptions,
    seed: u64,
    cancel: &CancelToken,
) -> Result<MlpModel, ClassifierError> {
    dataset.validate()?;
    if options.epochs == 0 || !(options.learning_rate > 0.0) {
        return Err(ClassifierError::InvalidOptions(
            "mlp needs epochs > 0 and learning_rate > 0".to_string(),
        ));
    }
    if dataset.feature_len == 0 {
        return Err(ClassifierError::InvalidOptions(
            "mlp needs at least one input feature".to_string(),
        ));
    }
    let n_classes = dataset.classes.len();
    let hidden = options.hidden_size.max(1);
    let dropout = options.dropout.clamp(0.0, 0.9);
    let smoothing = options.label_smoothing.clamp(0.0, 0.2);
    let off_target = smoothing / (n_classes as f32 - 1.0);
    let l2 = options.l2_penalty.max(0.0);

    let mut rng = StdRng::seed_from_u64(seed);
    let he_scale = (2.0 / dataset.feature_len.max(1) as f32).sqrt();
    let mut hidden_layer = Dense::random(dataset.feature_len, hidden, he_scale, &mut rng);
    let mut output_layer = Dense::random(hidden, n_classes, 0.1, &mut rng);
    let class_weights = if options.balance_classes {
        dataset.balanced_class_weights()
    } else {
        vec![1.0; n_classes]
    };

    let mut order: Vec<usize> = (0..dataset.len()).collect();
    let mut pre_activation = vec![0.0f32; hidden];
    let mut activation = vec![0.0f32; hidden];
    let mut logits = vec![0.0f32; n_classes];
    let mut output_error = vec![0.0f32; n_classes];
    let mut hidden_error = vec![0.0f32; hidden];

    for _ in 0..options.epochs {
        cancel.check()?;
        order.shuffle(&mut rng);
        for batch in order.chunks(options.batch_size.max(1)) {
            let mut hidden_grad = hidden_layer.zeroed();
            let mut output_grad = output_layer.zeroed();
            let mut batch_weight = 0.0f32;

            for &row_idx in batch {
                let label = dataset.y[row_idx];
                let sample_weight = class_weights[label];
                if sample_weight == 0.0 {
                    continue;
                }
                let input = &dataset.x[row_idx];

                hidden_layer.forward(input, &mut pre_activation);
                for (act, &pre) in activation.iter_mut().zip(&pre_activation) {
                    let kept = dropout == 0.0 || rng.random::<f32>() > dropout;
                    *act = if kept { pre.max(0.0) / (1.0 - dropout) } else { 0.0 };
                }
                output_layer.forward(&activation, &mut logits);
                let probs = softmax(&logits);

                for (class, (err, prob)) in output_error.iter_mut().zip(&probs).enumerate() {
                    let target = if class == label { 1.0 - smoothing } else { off_target };
                    *err = (prob - target) * sample_weight;
                }
                output_layer.backward_input(&output_error, &mut hidden_error);
                output_grad.accumulate(&output_error, &activation);
                for (err, &act) in hidden_error.iter_mut().zip(&activation) {
                    // ReLU gate; dropped units carry no gradient either.
                    if act <= 0.0 {
                        *err = 0.0;
                    }
                }
                hidden_grad.accumulate(&hidden_error, input);
                batch_weight += sample_weight;
            }

            if batch_weight > 0.0 {
                let step = options.learning_rate / batch_weight;
                hidden_layer.descend(&hidden_grad, step, l2);
                output_layer.descend(&output_grad, step, l2);
            }
        }
    }
    debug!(
        "mlp finished {} epochs on {} rows (hidden {})",
        options.epochs,
        dataset.len(),
        hidden
    );

    let model = MlpModel {
        model_version: 1,
        feature_len: dataset.feature_len,
        classes: dataset.classes.clone(),
        hidden_size: hidden,
        weights1: hidden_layer.weights,
        bias1: hidden_layer.bias,
        weights2: output_layer.weights,
        bias2: output_layer.bias,
    };
    model.validate()?;
    Ok(model)
}

/// Fully connected layer with row-major `[outputs][inputs]` weights.
struct Dense {
    inputs: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Dense {
    fn random(inputs: usize, outputs: usize, scale: f32, rng: &mut StdRng) -> Self {
        Self {
            inputs,
            weights: (0..inputs * outputs)
                .map(|_| (rng.random::<f32>() - 0.5) * scale)
                .collect(),
            bias: vec![0.0; outputs],
        }
    }

    fn zeroed(&self) -> Self {
        Self {
            inputs: self.inputs,
            weights: vec![0.0; self.weights.len()],
            bias: vec![0.0; self.bias.len()],
        }
    }

    fn forward(&self, input: &[f32], out: &mut [f32]) {
        for ((value, row), bias) in out
            .iter_mut()
            .zip(self.weights.chunks_exact(self.inputs))
            .zip(&self.bias)
        {
            *value = bias + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>();
        }
    }

    /// Propagate output errors back to this layer's inputs.
    fn backward_input(&self, errors: &[f32], input_errors: &mut [f32]) {
        input_errors.iter_mut().for_each(|v| *v = 0.0);
        for (row, &err) in self.weights.chunks_exact(self.inputs).zip(errors) {
            for (slot, w) in input_errors.iter_mut().zip(row) {
                *slot += err * w;
            }
        }
    }

    /// Add the outer product `errors x input` into this gradient buffer.
    fn accumulate(&mut self, errors: &[f32], input: &[f32]) {
        for ((row, bias), &err) in self
            .weights
            .chunks_exact_mut(self.inputs)
            .zip(self.bias.iter_mut())
            .zip(errors)
        {
            if err == 0.0 {
                continue;
            }
            *bias += err;
            for (w, x) in row.iter_mut().zip(input) {
                *w += err * x;
            }
        }
    }

    fn descend(&mut self, grad: &Dense, step: f32, l2: f32) {
        for (w, g) in self.weights.iter_mut().zip(&grad.weights) {
            *w -= step * (g + l2 * *w);
        }
        for (b, g) in self.bias.iter_mut().zip(&grad.bias) {
            *b -= step * g;
        }
    }
}
