use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{EnsembleClassifier, Fitted, UncertaintyThresholds};
use crate::features::schema_id;
use crate::ml::ClassifierError;
use crate::ml::base::{BaseModelKind, member_from_json};
use crate::ml::normalize::Standardizer;

pub const ENSEMBLE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemberDocument {
    kind: BaseModelKind,
    weight: f32,
    params: serde_json::Value,
}

/// On-disk form of a trained ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnsembleDocument {
    format_version: u32,
    schema_id: String,
    classes: Vec<String>,
    standardizer: Standardizer,
    thresholds: UncertaintyThresholds,
    #[serde(default)]
    seed: u64,
    members: Vec<MemberDocument>,
}

impl EnsembleClassifier {
    /// Serialize the trained state. Fails with `NotTrained` before training.
    pub fn to_value(&self) -> Result<serde_json::Value, ClassifierError> {
        let fitted = self.fitted.as_ref().ok_or(ClassifierError::NotTrained)?;
        let members = self
            .members
            .iter()
            .map(|member| {
                Ok(MemberDocument {
                    kind: member.model.kind(),
                    weight: member.weight,
                    params: member.model.to_json()?,
                })
            })
            .collect::<Result<Vec<_>, ClassifierError>>()?;
        let document = EnsembleDocument {
            format_version: ENSEMBLE_FORMAT_VERSION,
            schema_id: fitted.schema_id.clone(),
            classes: fitted.classes.clone(),
            standardizer: fitted.standardizer.clone(),
            thresholds: self.thresholds,
            seed: self.seed,
            members,
        };
        Ok(serde_json::to_value(document)?)
    }

    /// Restore a trained ensemble, rejecting documents built for another feature schema.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ClassifierError> {
        let document: EnsembleDocument = serde_json::from_value(value)?;
        if document.format_version != ENSEMBLE_FORMAT_VERSION {
            return Err(ClassifierError::InvalidModel(format!(
                "unsupported ensemble format {}",
                document.format_version
            )));
        }
        let expected = schema_id();
        if document.schema_id != expected {
            return Err(ClassifierError::SchemaMismatch {
                expected: expected.to_string(),
                found: document.schema_id,
            });
        }
        document.standardizer.validate()?;
        if document.classes.len() < 2 {
            return Err(ClassifierError::InvalidModel(
                "ensemble needs at least two classes".to_string(),
            ));
        }
        let members = document
            .members
            .into_iter()
            .map(|member| Ok((member_from_json(member.kind, member.params)?, member.weight)))
            .collect::<Result<Vec<_>, ClassifierError>>()?;
        let mut ensemble = EnsembleClassifier::new(members, document.thresholds, document.seed)
            .map_err(|err| ClassifierError::InvalidModel(err.to_string()))?;
        ensemble.fitted = Some(Fitted {
            schema_id: document.schema_id,
            classes: document.classes,
            standardizer: document.standardizer,
        });
        Ok(ensemble)
    }

    /// Write the trained ensemble as JSON, replacing `path` atomically.
    pub fn save_json(&self, path: &Path) -> Result<(), ClassifierError> {
        let bytes = serde_json::to_vec_pretty(&self.to_value()?)?;
        write_atomic(path, &bytes).map_err(|source| ClassifierError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved ensemble to {}", path.display());
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self, ClassifierError> {
        let bytes = fs::read(path).map_err(|source| ClassifierError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(serde_json::from_slice(&bytes)?)
    }
}

/// Write to a sibling temp file then rename over `dest`.
pub(crate) fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.flush()?;
    drop(file);
    if let Err(err) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}
