use std::cell::Cell;
use std::fs;

use anyhow::Result;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use specflow_core::config::{load_config_or_default, write_config, SpecflowConfig};
use specflow_core::stage::{current_stage, Stage, StageChange, StageFlags, StageRecord};
use specflow_core::store::{DocumentStore, FsStore, MemoryStore, StageStore, StoreError};
use specflow_core::workflow::{Workflow, WorkflowError};

const TASKS: &str = "# Tasks\n\n- [ ] 1. Schema\n- [ ] 1.1 Tables\n- [ ] 1.2 Indexes\n- [ ] 2. API\n";

fn fs_workflow(temp: &TempDir) -> Workflow<FsStore> {
    Workflow::new(FsStore::new(temp.path()), SpecflowConfig::default())
}

#[test]
fn current_stage_follows_first_unpassed_stage() {
    let record = StageRecord {
        confirmed: StageFlags {
            requirements: true,
            design: false,
            tasks: false,
        },
        skipped: StageFlags::default(),
        updated_at: None,
    };
    assert_eq!(current_stage(&record), Stage::Design);
}

#[test]
fn feature_walks_all_stages_on_disk() -> Result<()> {
    let temp = TempDir::new()?;
    let flow = fs_workflow(&temp);
    flow.init("search")?;
    assert_eq!(flow.current_stage("search")?, Stage::Requirements);

    assert_eq!(flow.confirm("search", Stage::Requirements)?, StageChange::Applied);
    assert_eq!(flow.confirm("search", Stage::Requirements)?, StageChange::AlreadyPassed);
    assert_eq!(flow.skip("search", Stage::Design)?, StageChange::Applied);
    assert_eq!(flow.current_stage("search")?, Stage::Tasks);

    let raw = fs::read_to_string(temp.path().join("search").join("stages.json"))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(value["confirmed"]["requirements"], true);
    assert_eq!(value["skipped"]["design"], true);

    assert_eq!(flow.confirm("search", Stage::Tasks)?, StageChange::Applied);
    assert_eq!(flow.current_stage("search")?, Stage::Completed);
    assert!(matches!(
        flow.confirm("search", Stage::Completed),
        Err(WorkflowError::Stage(_))
    ));
    Ok(())
}

#[test]
fn completing_tasks_persists_only_on_success() -> Result<()> {
    let temp = TempDir::new()?;
    let flow = fs_workflow(&temp);
    flow.init("search")?;
    flow.skip("search", Stage::Requirements)?;
    flow.skip("search", Stage::Design)?;
    flow.store().write("search/tasks.md", TASKS)?;

    let blocked = flow.complete_tasks("search", &["1"])?;
    assert!(!blocked.success);
    assert_eq!(flow.store().read("search/tasks.md")?, TASKS);

    let result = flow.complete_tasks("search", &["1.1", "1.2"])?;
    assert!(result.success);
    assert_eq!(result.auto_completed, vec!["1"]);
    let stored = flow.store().read("search/tasks.md")?;
    assert_eq!(
        stored,
        "# Tasks\n\n- [x] 1. Schema\n- [x] 1.1 Tables\n- [x] 1.2 Indexes\n- [ ] 2. API\n"
    );

    let status = flow.status("search")?;
    assert_eq!(status.stage, Stage::Tasks);
    let progress = status.progress.expect("progress");
    assert_eq!((progress.completed, progress.total), (3, 4));
    assert_eq!(status.next_task.map(|task| task.id), Some("2".to_string()));

    let replay = flow.complete_tasks("search", &["1.1"])?;
    assert!(replay.success);
    assert!(replay.completed.is_empty());
    assert_eq!(flow.store().read("search/tasks.md")?, stored);
    Ok(())
}

#[test]
fn missing_tasks_document_is_reported() -> Result<()> {
    let flow = Workflow::new(MemoryStore::new(), SpecflowConfig::default());
    flow.skip("empty", Stage::Requirements)?;
    flow.skip("empty", Stage::Design)?;
    let err = flow.complete_tasks("empty", &["1"]).expect_err("missing");
    assert!(matches!(err, WorkflowError::Store(StoreError::NotFound(_))));
    Ok(())
}

#[test]
fn configured_document_name_and_matcher_are_used() -> Result<()> {
    let temp = TempDir::new()?;
    let mut config = SpecflowConfig::default();
    config.tasks_document = "checklist.md".to_string();
    config.matcher.trailing = ".".to_string();
    write_config(temp.path(), &config)?;

    let loaded = load_config_or_default(temp.path())?;
    let flow = Workflow::new(FsStore::new(temp.path()), loaded);
    flow.skip("ops", Stage::Requirements)?;
    flow.skip("ops", Stage::Design)?;
    flow.store()
        .write("ops/checklist.md", "- [ ] 1: Colon style\n- [ ] 2. Dot style\n")?;

    let tasks = flow.tasks("ops")?;
    let ids: Vec<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
    assert_eq!(ids, vec!["2"]);
    Ok(())
}

/// Rewrites the document on the second read, as a racing writer would.
struct RacingStore {
    inner: MemoryStore,
    reads: Cell<usize>,
}

impl DocumentStore for RacingStore {
    fn read(&self, key: &str) -> Result<String, StoreError> {
        let count = self.reads.get() + 1;
        self.reads.set(count);
        if count == 2 {
            self.inner.write(key, "- [ ] 1. Rewritten\n- [ ] 9. Added\n")?;
        }
        self.inner.read(key)
    }

    fn write(&self, key: &str, text: &str) -> Result<(), StoreError> {
        self.inner.write(key, text)
    }
}

impl StageStore for RacingStore {
    fn read_stages(&self, feature: &str) -> Result<StageRecord, StoreError> {
        self.inner.read_stages(feature)
    }

    fn write_stages(&self, feature: &str, record: &StageRecord) -> Result<(), StoreError> {
        self.inner.write_stages(feature, record)
    }

    fn has_stages(&self, feature: &str) -> Result<bool, StoreError> {
        self.inner.has_stages(feature)
    }
}

#[test]
fn concurrent_rewrite_is_not_overwritten() -> Result<()> {
    let store = RacingStore {
        inner: MemoryStore::new().with_document("race/tasks.md", "- [ ] 1. Original\n"),
        reads: Cell::new(0),
    };
    let flow = Workflow::new(store, SpecflowConfig::default());
    flow.skip("race", Stage::Requirements)?;
    flow.skip("race", Stage::Design)?;

    let err = flow.complete_tasks("race", &["1"]).expect_err("conflict");
    assert!(matches!(err, WorkflowError::ConcurrentModification(_)));
    assert_eq!(
        flow.store().inner.read("race/tasks.md")?,
        "- [ ] 1. Rewritten\n- [ ] 9. Added\n"
    );
    Ok(())
}
