//! In-process task store

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::types::{Scope, TaskId, TaskRecord, TaskStatus};

use super::TaskStore;

#[derive(Default)]
struct MemoryState {
    records: HashMap<TaskId, TaskRecord>,
    by_scope: HashMap<Scope, HashSet<TaskId>>,
    by_status: HashMap<TaskStatus, HashSet<TaskId>>,
}

impl MemoryState {
    fn collect<'a>(&self, ids: impl Iterator<Item = &'a TaskId>) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = ids
            .filter_map(|id| self.records.get(id).cloned())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }
}

/// Task store backed by in-memory maps; contents are lost on restart
#[derive(Default)]
pub struct MemoryTaskStore {
    state: RwLock<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskStore for MemoryTaskStore {
    fn save(&self, record: &TaskRecord) -> Result<()> {
        let mut state = self.state.write();

        let previous = state.records.get(&record.id).map(|r| r.status);
        if let Some(ids) = previous.and_then(|status| state.by_status.get_mut(&status)) {
            ids.remove(&record.id);
        }

        state
            .by_scope
            .entry(record.scope.clone())
            .or_default()
            .insert(record.id);
        state
            .by_status
            .entry(record.status)
            .or_default()
            .insert(record.id);
        state.records.insert(record.id, record.clone());
        Ok(())
    }

    fn load(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.state.read().records.get(&id).cloned())
    }

    fn list_by_scope(&self, scope: &Scope, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>> {
        let state = self.state.read();
        let Some(ids) = state.by_scope.get(scope) else {
            return Ok(Vec::new());
        };

        let mut records = state.collect(ids.iter());
        if let Some(status) = status {
            records.retain(|r| r.status == status);
        }
        Ok(records)
    }

    fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<TaskRecord>> {
        let state = self.state.read();
        let ids = statuses
            .iter()
            .filter_map(|status| state.by_status.get(status))
            .flatten();
        Ok(state.collect(ids))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
