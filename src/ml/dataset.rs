use super::ClassifierError;

/// In-memory training matrix shared by every base model.
#[derive(Debug, Clone)]
pub struct TrainDataset {
    /// Ordered list of class identifiers.
    pub classes: Vec<String>,
    /// Number of `f32` values in each row.
    pub feature_len: usize,
    /// Feature matrix, row-major.
    pub x: Vec<Vec<f32>>,
    /// Class indices aligned with `x`.
    pub y: Vec<usize>,
}

impl TrainDataset {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Structural checks every trainer runs before fitting.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.x.len() != self.y.len() {
            return Err(ClassifierError::InvalidOptions(
                "Mismatched X/Y lengths".to_string(),
            ));
        }
        if self.x.is_empty() {
            return Err(ClassifierError::InsufficientData("Empty dataset".to_string()));
        }
        if self.classes.len() < 2 {
            return Err(ClassifierError::InsufficientData(
                "Need at least 2 classes".to_string(),
            ));
        }
        if self.x.iter().any(|row| row.len() != self.feature_len) {
            return Err(ClassifierError::InvalidOptions(
                "Inconsistent feature row length".to_string(),
            ));
        }
        if self.y.iter().any(|&label| label >= self.classes.len()) {
            return Err(ClassifierError::InvalidOptions(
                "Label index out of range".to_string(),
            ));
        }
        Ok(())
    }

    /// Inverse-frequency weights so every class contributes equally to the loss.
    pub fn balanced_class_weights(&self) -> Vec<f32> {
        let classes = self.classes.len();
        let mut counts = vec![0f32; classes];
        for &y in &self.y {
            if y < classes {
                counts[y] += 1.0;
            }
        }
        let total: f32 = counts.iter().sum();
        counts
            .into_iter()
            .map(|count| {
                if count == 0.0 {
                    0.0
                } else {
                    total / (classes as f32 * count)
                }
            })
            .collect()
    }
}
