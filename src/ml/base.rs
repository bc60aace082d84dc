//! Capability trait shared by every ensemble member.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CancelToken, ClassifierError, TrainDataset, gbdt_stump, logreg, mlp};
use crate::config::EnsembleSettings;

/// Built-in member families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseModelKind {
    LogReg,
    GbdtStump,
    Mlp,
}

impl BaseModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BaseModelKind::LogReg => "logreg",
            BaseModelKind::GbdtStump => "gbdt_stump",
            BaseModelKind::Mlp => "mlp",
        }
    }
}

impl fmt::Display for BaseModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classifier that can be fitted on a [`TrainDataset`] and queried for a class
/// distribution aligned with the dataset's class list.
pub trait BaseModel: Send + Sync + fmt::Debug {
    fn kind(&self) -> BaseModelKind;

    fn name(&self) -> &str {
        self.kind().as_str()
    }

    fn fit(&mut self, data: &TrainDataset, cancel: &CancelToken) -> Result<(), ClassifierError>;

    fn is_fitted(&self) -> bool;

    /// Class probabilities for one standardized row. Empty when unfitted or when the
    /// row length does not match.
    fn predict_proba(&self, features: &[f32]) -> Vec<f32>;

    /// Non-negative per-feature scores summing to one (or all zero).
    fn feature_importances(&self) -> Vec<f32>;

    /// Serialize the fitted parameters.
    fn to_json(&self) -> Result<serde_json::Value, ClassifierError>;
}

#[derive(Debug, Clone)]
pub struct LogRegMember {
    options: logreg::TrainOptions,
    seed: u64,
    model: Option<logreg::LogRegModel>,
}

impl LogRegMember {
    pub fn new(options: logreg::TrainOptions, seed: u64) -> Self {
        Self {
            options,
            seed,
            model: None,
        }
    }
}

impl BaseModel for LogRegMember {
    fn kind(&self) -> BaseModelKind {
        BaseModelKind::LogReg
    }

    fn fit(&mut self, data: &TrainDataset, cancel: &CancelToken) -> Result<(), ClassifierError> {
        self.model = Some(logreg::train_logreg(data, &self.options, self.seed, cancel)?);
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        self.model
            .as_ref()
            .map(|model| model.predict_proba(features))
            .unwrap_or_default()
    }

    fn feature_importances(&self) -> Vec<f32> {
        self.model
            .as_ref()
            .map(|model| model.feature_importances())
            .unwrap_or_default()
    }

    fn to_json(&self) -> Result<serde_json::Value, ClassifierError> {
        let model = self.model.as_ref().ok_or(ClassifierError::NotTrained)?;
        Ok(serde_json::to_value(model)?)
    }
}

#[derive(Debug, Clone)]
pub struct GbdtStumpMember {
    options: gbdt_stump::TrainOptions,
    model: Option<gbdt_stump::GbdtStumpModel>,
}

impl GbdtStumpMember {
    pub fn new(options: gbdt_stump::TrainOptions) -> Self {
        Self {
            options,
            model: None,
        }
    }
}

impl BaseModel for GbdtStumpMember {
    fn kind(&self) -> BaseModelKind {
        BaseModelKind::GbdtStump
    }

    fn fit(&mut self, data: &TrainDataset, cancel: &CancelToken) -> Result<(), ClassifierError> {
        self.model = Some(gbdt_stump::train_gbdt_stump(data, &self.options, cancel)?);
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        match &self.model {
            Some(model) if features.len() == model.feature_len => model.predict_proba(features),
            _ => Vec::new(),
        }
    }

    fn feature_importances(&self) -> Vec<f32> {
        self.model
            .as_ref()
            .map(|model| model.feature_importances())
            .unwrap_or_default()
    }

    fn to_json(&self) -> Result<serde_json::Value, ClassifierError> {
        let model = self.model.as_ref().ok_or(ClassifierError::NotTrained)?;
        Ok(serde_json::to_value(model)?)
    }
}

#[derive(Debug, Clone)]
pub struct MlpMember {
    options: mlp::TrainOptions,
    seed: u64,
    model: Option<mlp::MlpModel>,
}

impl MlpMember {
    pub fn new(options: mlp::TrainOptions, seed: u64) -> Self {
        Self {
            options,
            seed,
            model: None,
        }
    }
}

impl BaseModel for MlpMember {
    fn kind(&self) -> BaseModelKind {
        BaseModelKind::Mlp
    }

    fn fit(&mut self, data: &TrainDataset, cancel: &CancelToken) -> Result<(), ClassifierError> {
        self.model = Some(mlp::train_mlp(data, &self.options, self.seed, cancel)?);
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        self.model
            .as_ref()
            .map(|model| model.predict_proba(features))
            .unwrap_or_default()
    }

    fn feature_importances(&self) -> Vec<f32> {
        self.model
            .as_ref()
            .map(|model| model.feature_importances())
            .unwrap_or_default()
    }

    fn to_json(&self) -> Result<serde_json::Value, ClassifierError> {
        let model = self.model.as_ref().ok_or(ClassifierError::NotTrained)?;
        Ok(serde_json::to_value(model)?)
    }
}

/// Build an unfitted member. Seeds are derived per slot so members of the same kind
/// do not share an initialization.
pub fn build_member(
    kind: BaseModelKind,
    settings: &EnsembleSettings,
    slot: usize,
) -> Box<dyn BaseModel> {
    let seed = settings.seed.wrapping_add(slot as u64);
    match kind {
        BaseModelKind::LogReg => Box::new(LogRegMember::new(settings.logreg.clone(), seed)),
        BaseModelKind::GbdtStump => Box::new(GbdtStumpMember::new(settings.gbdt_stump.clone())),
        BaseModelKind::Mlp => Box::new(MlpMember::new(settings.mlp.clone(), seed)),
    }
}

/// Restore a fitted member from its serialized parameters.
pub fn member_from_json(
    kind: BaseModelKind,
    value: serde_json::Value,
) -> Result<Box<dyn BaseModel>, ClassifierError> {
    match kind {
        BaseModelKind::LogReg => {
            let model: logreg::LogRegModel = serde_json::from_value(value)?;
            model.validate()?;
            Ok(Box::new(LogRegMember {
                options: logreg::TrainOptions::default(),
                seed: 0,
                model: Some(model),
            }))
        }
        BaseModelKind::GbdtStump => {
            let model: gbdt_stump::GbdtStumpModel = serde_json::from_value(value)?;
            model.validate()?;
            Ok(Box::new(GbdtStumpMember {
                options: gbdt_stump::TrainOptions::default(),
                model: Some(model),
            }))
        }
        BaseModelKind::Mlp => {
            let model: mlp::MlpModel = serde_json::from_value(value)?;
            model.validate()?;
            Ok(Box::new(MlpMember {
                options: mlp::TrainOptions::default(),
                seed: 0,
                model: Some(model),
            }))
        }
    }
}
