//! `PlanStateStore`: the durable, single-writer record of every active step
//! (spec §4.1, component C1).
//!
//! Terminal records are removed on write, not tombstoned — the broker's
//! dead-letter queue is the audit trail of record for failed/dead-lettered
//! steps (spec §4.1, "Guarantees"; see `DESIGN.md`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use plan_contracts::error::{EngineError, EngineResult};
use plan_contracts::record::StepRecord;
use plan_contracts::state::StepState;

use crate::file::{atomic_write, read_if_exists};

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDiskState {
    version: u32,
    steps: Vec<StepRecord>,
}

type StepKey = (String, String);

fn key_for(plan_id: &str, step_id: &str) -> StepKey {
    (plan_id.to_string(), step_id.to_string())
}

/// Durable, atomic per-step state store.
///
/// All operations take a single in-process lock and persist the full
/// snapshot on every mutation. This is the same single-writer-plus-snapshot
/// shape as the teacher's in-memory audit writer, generalized to durable
/// storage per spec §4.1.
pub struct PlanStateStore {
    path: PathBuf,
    steps: Mutex<HashMap<StepKey, StepRecord>>,
}

impl PlanStateStore {
    /// Open (or create) the store at `path`. An absent or corrupt file is
    /// treated as an empty store; any other read error is fatal.
    pub fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let steps = match read_if_exists(&path)? {
            None => HashMap::new(),
            Some(contents) => match serde_json::from_str::<OnDiskState>(&contents) {
                Ok(on_disk) => on_disk
                    .steps
                    .into_iter()
                    .map(|r| (key_for(&r.plan_id, &r.step_id), r))
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "state file is corrupt, starting empty");
                    HashMap::new()
                }
            },
        };
        debug!(path = %path.display(), count = steps.len(), "plan state store opened");
        Ok(Self { path, steps: Mutex::new(steps) })
    }

    /// Create or overwrite the record for `record.plan_id`/`record.step_id`.
    pub fn remember(&self, record: StepRecord) -> EngineResult<()> {
        let mut steps = self.lock();
        let key = key_for(&record.plan_id, &record.step_id);
        debug!(plan_id = %record.plan_id, step_id = %record.step_id, state = %record.state, "remembering step");
        steps.insert(key, record);
        self.persist(&steps)
    }

    /// Transition a step to `state`, updating its summary/output/attempt.
    /// Terminal transitions remove the record from the store.
    pub fn set_state(
        &self,
        plan_id: &str,
        step_id: &str,
        state: StepState,
        summary: Option<String>,
        output: Option<serde_json::Value>,
        attempt: Option<u32>,
    ) -> EngineResult<()> {
        let mut steps = self.lock();
        let key = key_for(plan_id, step_id);

        let record = steps.get_mut(&key).ok_or_else(|| EngineError::StepNotFound {
            plan_id: plan_id.to_string(),
            step_id: step_id.to_string(),
        })?;

        if !record.state.can_transition_to(state) {
            return Err(EngineError::InvalidStateTransition {
                plan_id: plan_id.to_string(),
                step_id: step_id.to_string(),
                actual: record.state.to_string(),
                expected: state.to_string(),
            });
        }

        record.state = state;
        record.updated_at = Utc::now();
        if summary.is_some() {
            record.summary = summary;
        }
        if output.is_some() {
            record.output = output;
        }
        if let Some(attempt) = attempt {
            record.attempt = attempt;
        }

        debug!(plan_id, step_id, state = %state, "step transitioned");

        if state.is_terminal() {
            steps.remove(&key);
        }

        self.persist(&steps)
    }

    /// Record an approval decision against a step's capability map. Does not
    /// itself transition state — the engine reads the record back and
    /// applies the `WaitingApproval -> Approved|Rejected` edge.
    pub fn record_approval(
        &self,
        plan_id: &str,
        step_id: &str,
        capability: &str,
        granted: bool,
    ) -> EngineResult<()> {
        let mut steps = self.lock();
        let key = key_for(plan_id, step_id);

        let record = steps.get_mut(&key).ok_or_else(|| EngineError::StepNotFound {
            plan_id: plan_id.to_string(),
            step_id: step_id.to_string(),
        })?;

        record.approvals.insert(capability.to_string(), granted);
        record.updated_at = Utc::now();

        debug!(plan_id, step_id, capability, granted, "approval recorded");

        self.persist(&steps)
    }

    /// Unconditionally remove a step's record, if present.
    pub fn forget(&self, plan_id: &str, step_id: &str) -> EngineResult<()> {
        let mut steps = self.lock();
        steps.remove(&key_for(plan_id, step_id));
        self.persist(&steps)
    }

    /// Snapshot every active (non-terminal) record, for crash recovery.
    pub fn list_active(&self) -> Vec<StepRecord> {
        self.lock().values().cloned().collect()
    }

    /// Look up a single record.
    pub fn get_entry(&self, plan_id: &str, step_id: &str) -> Option<StepRecord> {
        self.lock().get(&key_for(plan_id, step_id)).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<StepKey, StepRecord>> {
        self.steps.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, steps: &HashMap<StepKey, StepRecord>) -> EngineResult<()> {
        let on_disk = OnDiskState {
            version: CURRENT_VERSION,
            steps: steps.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&on_disk).map_err(|e| EngineError::PersistFailed {
            reason: format!("failed to serialize state: {e}"),
        })?;
        atomic_write(&self.path, &bytes)
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_contracts::plan::PlanStep;
    use tempfile::tempdir;

    fn sample_step(id: &str) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            action: "do a thing".to_string(),
            tool: "some-tool".to_string(),
            capability: "repo.read".to_string(),
            capability_label: "Read repository".to_string(),
            labels: vec![],
            timeout_seconds: 30,
            approval_required: false,
            input: serde_json::json!({}),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn opening_a_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = PlanStateStore::open(dir.path().join("state.json")).unwrap();
        assert!(store.list_active().is_empty());
    }

    #[test]
    fn opening_a_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json").unwrap();
        let store = PlanStateStore::open(&path).unwrap();
        assert!(store.list_active().is_empty());
    }

    #[test]
    fn remember_then_get_entry_round_trips() {
        let dir = tempdir().unwrap();
        let store = PlanStateStore::open(dir.path().join("state.json")).unwrap();
        let record = StepRecord::new("p1", sample_step("s1"), "trace-1", StepState::Queued, HashMap::new());

        store.remember(record).unwrap();

        let fetched = store.get_entry("p1", "s1").unwrap();
        assert_eq!(fetched.state, StepState::Queued);
        assert_eq!(fetched.attempt, 0);
    }

    #[test]
    fn set_state_to_terminal_removes_the_record() {
        let dir = tempdir().unwrap();
        let store = PlanStateStore::open(dir.path().join("state.json")).unwrap();
        let record = StepRecord::new("p1", sample_step("s1"), "trace-1", StepState::Running, HashMap::new());
        store.remember(record).unwrap();

        store
            .set_state("p1", "s1", StepState::Completed, Some("done".to_string()), None, None)
            .unwrap();

        assert!(store.get_entry("p1", "s1").is_none());
    }

    #[test]
    fn set_state_rejects_an_invalid_edge() {
        let dir = tempdir().unwrap();
        let store = PlanStateStore::open(dir.path().join("state.json")).unwrap();
        let record = StepRecord::new("p1", sample_step("s1"), "trace-1", StepState::Queued, HashMap::new());
        store.remember(record).unwrap();

        let err = store
            .set_state("p1", "s1", StepState::Completed, None, None, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));

        let unchanged = store.get_entry("p1", "s1").unwrap();
        assert_eq!(unchanged.state, StepState::Queued);
    }

    #[test]
    fn set_state_on_missing_record_errors() {
        let dir = tempdir().unwrap();
        let store = PlanStateStore::open(dir.path().join("state.json")).unwrap();
        let err = store
            .set_state("p1", "missing", StepState::Running, None, None, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::StepNotFound { .. }));
    }

    #[test]
    fn record_approval_updates_the_map() {
        let dir = tempdir().unwrap();
        let store = PlanStateStore::open(dir.path().join("state.json")).unwrap();
        let record = StepRecord::new(
            "p1",
            sample_step("s1"),
            "trace-1",
            StepState::WaitingApproval,
            HashMap::new(),
        );
        store.remember(record).unwrap();

        store.record_approval("p1", "s1", "repo.write", true).unwrap();

        let fetched = store.get_entry("p1", "s1").unwrap();
        assert_eq!(fetched.approvals.get("repo.write"), Some(&true));
    }

    #[test]
    fn list_active_snapshots_all_records() {
        let dir = tempdir().unwrap();
        let store = PlanStateStore::open(dir.path().join("state.json")).unwrap();
        store
            .remember(StepRecord::new("p1", sample_step("s1"), "t1", StepState::Queued, HashMap::new()))
            .unwrap();
        store
            .remember(StepRecord::new("p1", sample_step("s2"), "t1", StepState::Running, HashMap::new()))
            .unwrap();

        assert_eq!(store.list_active().len(), 2);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = PlanStateStore::open(&path).unwrap();
            store
                .remember(StepRecord::new("p1", sample_step("s1"), "t1", StepState::Queued, HashMap::new()))
                .unwrap();
        }

        let reopened = PlanStateStore::open(&path).unwrap();
        let fetched = reopened.get_entry("p1", "s1").unwrap();
        assert_eq!(fetched.state, StepState::Queued);
    }

    #[test]
    fn forget_removes_even_without_prior_state_change() {
        let dir = tempdir().unwrap();
        let store = PlanStateStore::open(dir.path().join("state.json")).unwrap();
        store
            .remember(StepRecord::new("p1", sample_step("s1"), "t1", StepState::Queued, HashMap::new()))
            .unwrap();

        store.forget("p1", "s1").unwrap();

        assert!(store.get_entry("p1", "s1").is_none());
    }
}
