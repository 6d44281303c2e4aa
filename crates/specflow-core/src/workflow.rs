use serde::Serialize;
use thiserror::Error;

use crate::batch::{complete_batch_with, BatchResult};
use crate::config::SpecflowConfig;
use crate::matcher::IdMatcher;
use crate::next_task::{get_first_uncompleted_task, task_progress, TaskProgress};
use crate::stage::{current_stage, Stage, StageChange, StageError, StageRecord};
use crate::store::{document_digest, document_key, DocumentStore, StageStore, StoreError};
use crate::task::{parse_tasks_with, Task};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid feature name: {0:?}")]
    InvalidFeature(String),
    #[error("Feature {feature} is in the {current} stage; tasks can be completed once design is passed")]
    StageNotReached { feature: String, current: Stage },
    #[error("Tasks document for {0} changed while the batch was applied")]
    ConcurrentModification(String),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub stage: Stage,
    pub confirmed: bool,
    pub skipped: bool,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStatus {
    pub feature: String,
    pub stage: Stage,
    pub stages: Vec<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_task: Option<Task>,
}

/// Drives one store through the requirements, design and tasks stages.
pub struct Workflow<S> {
    store: S,
    config: SpecflowConfig,
    matcher: IdMatcher,
}

impl<S: DocumentStore + StageStore> Workflow<S> {
    pub fn new(store: S, config: SpecflowConfig) -> Self {
        let matcher = config.id_matcher();
        Self {
            store,
            config,
            matcher,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SpecflowConfig {
        &self.config
    }

    pub fn tasks_key(&self, feature: &str) -> String {
        document_key(feature, &self.config.tasks_document)
    }

    /// Creates the all-false stage record unless one already exists.
    pub fn init(&self, feature: &str) -> Result<StageRecord, WorkflowError> {
        validate_feature(feature)?;
        if self.store.has_stages(feature)? {
            return Ok(self.store.read_stages(feature)?);
        }
        let record = StageRecord::default();
        self.store.write_stages(feature, &record)?;
        tracing::info!(feature, "feature initialized");
        Ok(record)
    }

    pub fn stages(&self, feature: &str) -> Result<StageRecord, WorkflowError> {
        validate_feature(feature)?;
        Ok(self.store.read_stages(feature)?)
    }

    pub fn current_stage(&self, feature: &str) -> Result<Stage, WorkflowError> {
        Ok(current_stage(&self.stages(feature)?))
    }

    pub fn confirm(&self, feature: &str, stage: Stage) -> Result<StageChange, WorkflowError> {
        self.transition(feature, stage, StageRecord::confirm)
    }

    pub fn skip(&self, feature: &str, stage: Stage) -> Result<StageChange, WorkflowError> {
        self.transition(feature, stage, StageRecord::skip)
    }

    fn transition(
        &self,
        feature: &str,
        stage: Stage,
        apply: fn(&mut StageRecord, Stage) -> Result<StageChange, StageError>,
    ) -> Result<StageChange, WorkflowError> {
        let mut record = self.stages(feature)?;
        let change = apply(&mut record, stage)?;
        if change == StageChange::Applied {
            self.store.write_stages(feature, &record)?;
            tracing::info!(feature, %stage, next = %current_stage(&record), "stage passed");
        }
        Ok(change)
    }

    pub fn tasks(&self, feature: &str) -> Result<Vec<Task>, WorkflowError> {
        validate_feature(feature)?;
        let text = self.store.read(&self.tasks_key(feature))?;
        Ok(parse_tasks_with(&text, &self.matcher))
    }

    pub fn next_task(&self, feature: &str) -> Result<Option<Task>, WorkflowError> {
        let tasks = self.tasks(feature)?;
        Ok(get_first_uncompleted_task(&tasks).cloned())
    }

    pub fn status(&self, feature: &str) -> Result<FeatureStatus, WorkflowError> {
        let record = self.stages(feature)?;
        let stages = Stage::GATED
            .iter()
            .map(|stage| StageStatus {
                stage: *stage,
                confirmed: record.confirmed.get(*stage),
                skipped: record.skipped.get(*stage),
                passed: record.is_passed(*stage),
            })
            .collect();
        let (progress, next_task) = match self.tasks(feature) {
            Ok(tasks) => (
                Some(task_progress(&tasks)),
                get_first_uncompleted_task(&tasks).cloned(),
            ),
            Err(WorkflowError::Store(StoreError::NotFound(_))) => (None, None),
            Err(err) => return Err(err),
        };
        Ok(FeatureStatus {
            feature: feature.to_string(),
            stage: current_stage(&record),
            stages,
            progress,
            next_task,
        })
    }

    /// Runs a batch completion against the stored checklist and persists the
    /// result only when the batch succeeded and changed the text.
    pub fn complete_tasks<I: AsRef<str>>(
        &self,
        feature: &str,
        ids: &[I],
    ) -> Result<BatchResult, WorkflowError> {
        let current = self.current_stage(feature)?;
        if matches!(current, Stage::Requirements | Stage::Design) {
            return Err(WorkflowError::StageNotReached {
                feature: feature.to_string(),
                current,
            });
        }
        let key = self.tasks_key(feature);
        let text = self.store.read(&key)?;
        let digest = document_digest(&text);
        let result = complete_batch_with(&text, ids, &self.matcher);
        if !result.changed(&text) {
            return Ok(result);
        }
        if document_digest(&self.store.read(&key)?) != digest {
            tracing::warn!(feature, "tasks document changed underneath batch");
            return Err(WorkflowError::ConcurrentModification(feature.to_string()));
        }
        self.store.write(&key, &result.updated_text)?;
        tracing::info!(
            feature,
            completed = ?result.completed,
            auto_completed = ?result.auto_completed,
            "tasks completed"
        );
        Ok(result)
    }
}

fn validate_feature(feature: &str) -> Result<(), WorkflowError> {
    let ok = !feature.trim().is_empty()
        && feature
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        && !feature.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(WorkflowError::InvalidFeature(feature.to_string()))
    }
}
