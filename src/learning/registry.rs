//! Append-only log of trained model versions with a single active pointer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::LearningError;
use crate::app_dirs::{self, AppDirError};
use crate::config::PrimaryMetric;
use crate::features::schema_id;
use crate::ml::ensemble::write_atomic;
use crate::ml::{
    ClassificationMetrics, ClassifierError, EnsembleClassifier, FeatureImportance, MemberReport,
    TrainingReport,
};

const ACTIVE_FILE_NAME: &str = "active.json";

/// Immutable description of one promoted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: Uuid,
    /// 1-based position in the version log.
    pub sequence: u64,
    pub schema_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Samples across both splits.
    pub training_samples: usize,
    pub validated_samples: usize,
    pub validation_samples: usize,
    pub metrics: ClassificationMetrics,
    pub primary_metric: PrimaryMetric,
    pub primary_score: f32,
    pub member_accuracy: Vec<MemberReport>,
    pub feature_importances: Vec<FeatureImportance>,
}

impl ModelVersion {
    pub fn from_report(
        sequence: u64,
        report: &TrainingReport,
        validated_samples: usize,
        primary_metric: PrimaryMetric,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            schema_id: schema_id().to_string(),
            created_at: OffsetDateTime::now_utc(),
            training_samples: report.train_samples + report.validation_samples,
            validated_samples,
            validation_samples: report.validation_samples,
            metrics: report.metrics.clone(),
            primary_metric,
            primary_score: report.score(primary_metric),
            member_accuracy: report.members.clone(),
            feature_importances: report.feature_importances.clone(),
        }
    }

    /// Score under `metric`, which may differ from the metric recorded at promotion time.
    pub fn score(&self, metric: PrimaryMetric) -> f32 {
        crate::ml::ensemble::metric_value(&self.metrics, metric)
    }
}

/// A version together with the ensemble that serves it.
#[derive(Debug)]
pub struct VersionEntry {
    pub version: ModelVersion,
    pub ensemble: EnsembleClassifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionListing {
    pub version: ModelVersion,
    pub active: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid version file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    AppDir(#[from] AppDirError),
}

/// Versions recovered from a store, in sequence order.
#[derive(Debug, Default)]
pub struct StoredVersions {
    pub versions: Vec<VersionEntry>,
    pub active: Option<Uuid>,
}

/// Persistence collaborator for promoted versions.
pub trait VersionStore: Send + Sync {
    fn save_version(&self, entry: &VersionEntry) -> Result<(), StoreError>;

    fn set_active(&self, id: Uuid) -> Result<(), StoreError>;

    fn load_all(&self) -> Result<StoredVersions, StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionFile {
    version: ModelVersion,
    ensemble: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActiveFile {
    id: Uuid,
}

/// One JSON file per version plus `active.json`.
#[derive(Debug, Clone)]
pub struct DirectoryVersionStore {
    root: PathBuf,
}

impl DirectoryVersionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the application's models directory.
    pub fn at_default_location() -> Result<Self, StoreError> {
        Ok(Self::new(app_dirs::models_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_path(&self, version: &ModelVersion) -> PathBuf {
        self.root
            .join(format!("v{:06}-{}.json", version.sequence, version.id))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, &bytes).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StoreError> {
        let bytes = fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl VersionStore for DirectoryVersionStore {
    fn save_version(&self, entry: &VersionEntry) -> Result<(), StoreError> {
        let file = VersionFile {
            version: entry.version.clone(),
            ensemble: entry.ensemble.to_value()?,
        };
        self.write_json(&self.version_path(&entry.version), &file)
    }

    fn set_active(&self, id: Uuid) -> Result<(), StoreError> {
        self.write_json(&self.root.join(ACTIVE_FILE_NAME), &ActiveFile { id })
    }

    /// Versions whose ensemble was built for another feature schema are skipped.
    fn load_all(&self) -> Result<StoredVersions, StoreError> {
        if !self.root.exists() {
            return Ok(StoredVersions::default());
        }
        let entries = fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut versions = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| StoreError::Io {
                    path: self.root.clone(),
                    source,
                })?
                .path();
            let is_version = path.extension().is_some_and(|ext| ext == "json")
                && path.file_name().is_some_and(|name| name != ACTIVE_FILE_NAME);
            if !is_version {
                continue;
            }
            let file: VersionFile = Self::read_json(&path)?;
            match EnsembleClassifier::from_value(file.ensemble) {
                Ok(ensemble) => versions.push(VersionEntry {
                    version: file.version,
                    ensemble,
                }),
                Err(ClassifierError::SchemaMismatch { found, .. }) => {
                    warn!(
                        "Skipping model {} built for feature schema {found}",
                        path.display()
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        versions.sort_by_key(|entry| entry.version.sequence);

        let active_path = self.root.join(ACTIVE_FILE_NAME);
        let active = if active_path.exists() {
            Some(Self::read_json::<ActiveFile>(&active_path)?.id)
        } else {
            None
        };
        Ok(StoredVersions { versions, active })
    }
}

/// Retains every promoted version; readers share the active entry through an `Arc`.
pub struct ModelRegistry {
    versions: RwLock<Vec<Arc<VersionEntry>>>,
    active: RwLock<Option<Arc<VersionEntry>>>,
    store: Option<Box<dyn VersionStore>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("versions", &self.len())
            .field("active", &self.active_version().map(|version| version.id))
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// In-memory registry.
    pub fn new() -> Self {
        Self {
            versions: RwLock::new(Vec::new()),
            active: RwLock::new(None),
            store: None,
        }
    }

    /// Registry backed by `store`, restoring whatever it already holds.
    ///
    /// When the recorded active id is missing (or its schema is stale) the newest
    /// compatible version becomes active.
    pub fn open(store: Box<dyn VersionStore>) -> Result<Self, StoreError> {
        let stored = store.load_all()?;
        let versions: Vec<Arc<VersionEntry>> = stored.versions.into_iter().map(Arc::new).collect();
        let active = stored
            .active
            .and_then(|id| versions.iter().find(|entry| entry.version.id == id).cloned())
            .or_else(|| versions.last().cloned());
        if let Some(entry) = &active {
            info!(
                "Restored {} model versions, active v{}",
                versions.len(),
                entry.version.sequence
            );
        }
        Ok(Self {
            versions: RwLock::new(versions),
            active: RwLock::new(active),
            store: Some(store),
        })
    }

    pub fn len(&self) -> usize {
        self.read_versions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_sequence(&self) -> u64 {
        self.read_versions()
            .last()
            .map(|entry| entry.version.sequence + 1)
            .unwrap_or(1)
    }

    /// Snapshot of the serving entry; stays valid across later promotions.
    pub fn active(&self) -> Option<Arc<VersionEntry>> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn active_version(&self) -> Option<ModelVersion> {
        self.active().map(|entry| entry.version.clone())
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<VersionEntry>> {
        self.read_versions()
            .iter()
            .find(|entry| entry.version.id == id)
            .cloned()
    }

    pub fn list(&self) -> Vec<VersionListing> {
        let active_id = self.active_version().map(|version| version.id);
        self.read_versions()
            .iter()
            .map(|entry| VersionListing {
                version: entry.version.clone(),
                active: Some(entry.version.id) == active_id,
            })
            .collect()
    }

    /// Append `entry` and make it active. The store is written before the swap, so a
    /// failed write leaves the previous version serving.
    pub fn promote(&self, entry: VersionEntry) -> Result<Arc<VersionEntry>, StoreError> {
        if let Some(store) = &self.store {
            store.save_version(&entry)?;
            store.set_active(entry.version.id)?;
        }
        let entry = Arc::new(entry);
        self.write_versions().push(Arc::clone(&entry));
        self.swap_active(Arc::clone(&entry));
        info!(
            "Promoted model v{} ({} {:.3})",
            entry.version.sequence,
            metric_name(entry.version.primary_metric),
            entry.version.primary_score
        );
        Ok(entry)
    }

    /// Re-activate a retained version built for the current feature schema.
    pub fn rollback(&self, id: Uuid) -> Result<ModelVersion, LearningError> {
        let entry = self.get(id).ok_or(LearningError::UnknownVersion(id))?;
        let expected = schema_id();
        if entry.version.schema_id != expected {
            return Err(ClassifierError::SchemaMismatch {
                expected: expected.to_string(),
                found: entry.version.schema_id.clone(),
            }
            .into());
        }
        if let Some(store) = &self.store {
            store.set_active(id)?;
        }
        self.swap_active(Arc::clone(&entry));
        info!("Rolled back to model v{}", entry.version.sequence);
        Ok(entry.version.clone())
    }

    fn swap_active(&self, entry: Arc<VersionEntry>) {
        *self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(entry);
    }

    fn read_versions(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<VersionEntry>>> {
        self.versions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_versions(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<VersionEntry>>> {
        self.versions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn metric_name(metric: PrimaryMetric) -> &'static str {
    match metric {
        PrimaryMetric::MacroF1 => "macro F1",
        PrimaryMetric::WeightedF1 => "weighted F1",
        PrimaryMetric::Accuracy => "accuracy",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnsembleSettings, ModelSettings};
    use crate::features::{FEATURE_COUNT, FeatureVector};
    use crate::learning::{Priority, TrainingSample};
    use crate::ml::CancelToken;

    fn trained_entry(sequence: u64) -> VersionEntry {
        let samples: Vec<TrainingSample> = (0..24)
            .map(|idx| {
                let mut values = vec![0.0f32; FEATURE_COUNT];
                values[1] = if idx % 2 == 0 { -2.0 } else { 2.0 };
                values[4] = (idx % 5) as f32;
                let label = if idx % 2 == 0 { Priority::Low } else { Priority::Important };
                TrainingSample::feedback(
                    format!("m{idx}"),
                    FeatureVector::from_parts(schema_id(), values),
                    label,
                )
            })
            .collect();
        let mut ensemble =
            EnsembleClassifier::from_settings(&EnsembleSettings::default(), &ModelSettings::default())
                .unwrap();
        let report = ensemble.train(&samples, 0.25, &CancelToken::new()).unwrap();
        VersionEntry {
            version: ModelVersion::from_report(sequence, &report, 24, PrimaryMetric::MacroF1),
            ensemble,
        }
    }

    #[test]
    fn promotion_retains_superseded_versions() {
        let registry = ModelRegistry::new();
        let first = registry.promote(trained_entry(1)).unwrap();
        let held = registry.active().unwrap();
        let second = registry.promote(trained_entry(2)).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_version().unwrap().id, second.version.id);
        assert_eq!(held.version.id, first.version.id);
        let listing = registry.list();
        assert_eq!(listing.iter().filter(|item| item.active).count(), 1);
        assert_eq!(registry.next_sequence(), 3);
    }

    #[test]
    fn rollback_reactivates_retained_version() {
        let registry = ModelRegistry::new();
        let first = registry.promote(trained_entry(1)).unwrap();
        registry.promote(trained_entry(2)).unwrap();
        let restored = registry.rollback(first.version.id).unwrap();
        assert_eq!(restored.id, first.version.id);
        assert_eq!(registry.active_version().unwrap().id, first.version.id);
        assert!(matches!(
            registry.rollback(Uuid::new_v4()),
            Err(LearningError::UnknownVersion(_))
        ));
    }

    #[test]
    fn directory_store_round_trips_active_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            ModelRegistry::open(Box::new(DirectoryVersionStore::new(dir.path()))).unwrap();
        assert!(registry.is_empty());
        let first = registry.promote(trained_entry(1)).unwrap();
        registry.promote(trained_entry(2)).unwrap();
        registry.rollback(first.version.id).unwrap();

        let reopened =
            ModelRegistry::open(Box::new(DirectoryVersionStore::new(dir.path()))).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.active_version().unwrap().id, first.version.id);
        assert!(reopened.active().unwrap().ensemble.is_trained());
    }
}
