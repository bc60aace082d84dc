//! Deterministic gradient-boosted decision-stump classifier.
//!
//! A lightweight tree member for the ensemble that supports:
//! - Multi-class classification via softmax boosting.
//! - Binned split search, so training cost is linear in rows per round.
//! - Split-gain feature importances and reproducible JSON export.

mod model;
mod train;

pub use model::{GbdtStumpModel, Stump, argmax, softmax};
pub use train::{TrainOptions, train_gbdt_stump};
