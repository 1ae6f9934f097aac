use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, SystemTime},
};

use lens_model::{Progress, TaskId, TaskPage, TaskQuery, TaskRecord, TaskResult, TaskStatus};
use tracing::trace;

use crate::StoreError;

/// In-memory task record storage.
///
/// The runner is the only writer. A terminal result is written at most once; after that the
/// record is frozen until it is removed or purged.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<RwLock<TaskStoreInner>>,
}

struct TaskStoreInner {
    /// Records indexed by TaskId.
    tasks: HashMap<TaskId, TaskRecord>,
    /// Index: tool name -> ids of its tasks, in creation order.
    by_tool: HashMap<String, Vec<TaskId>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TaskStoreInner {
                tasks: HashMap::new(),
                by_tool: HashMap::new(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TaskStoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskStoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new `working` task for `tool`.
    pub fn create_task(&self, tool: &str) -> TaskId {
        let id = TaskId::from(uuid::Uuid::new_v4().to_string());
        let now = SystemTime::now();
        let record = TaskRecord {
            id: id.clone(),
            tool: tool.to_string(),
            status: TaskStatus::Working,
            message: None,
            progress: None,
            created_at: now,
            updated_at: now,
            result: None,
        };

        let mut inner = self.write();
        inner.tasks.insert(id.clone(), record);
        inner.by_tool.entry(tool.to_string()).or_default().push(id.clone());
        trace!(task = %id, tool, "task created");
        id
    }

    /// Update the status line of a running task.
    ///
    /// Terminal states are only reachable through [`TaskStore::store_result`].
    pub fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        if status.is_terminal() {
            return Err(StoreError::TerminalWithoutResult {
                status: status.as_str(),
            });
        }
        self.with_running(id, |record| {
            record.status = status;
            if message.is_some() {
                record.message = message;
            }
        })
    }

    /// Record a progress notification. Values lower than the last one seen are ignored.
    pub fn update_progress(&self, id: &TaskId, progress: Progress) -> Result<(), StoreError> {
        self.with_running(id, |record| {
            let regress = record
                .progress
                .as_ref()
                .is_some_and(|p| progress.current < p.current);
            if !regress {
                record.progress = Some(progress);
            }
        })
    }

    /// Persist the terminal result. Fails if one was already stored.
    pub fn store_result(&self, id: &TaskId, result: TaskResult) -> Result<(), StoreError> {
        self.with_running(id, |record| {
            record.status = result.status();
            if let Some(err) = result.error() {
                record.message = Some(err.message.clone());
            }
            record.result = Some(result);
        })
    }

    fn with_running<F>(&self, id: &TaskId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut inner = self.write();
        let record = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if record.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id.clone()));
        }
        f(record);
        record.updated_at = SystemTime::now();
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.read().tasks.get(id).cloned()
    }

    /// Terminal result, once there is one.
    pub fn result(&self, id: &TaskId) -> Option<TaskResult> {
        self.read().tasks.get(id).and_then(|r| r.result.clone())
    }

    pub fn remove(&self, id: &TaskId) -> Option<TaskRecord> {
        let mut inner = self.write();
        let record = inner.tasks.remove(id)?;
        if let Some(ids) = inner.by_tool.get_mut(&record.tool) {
            ids.retain(|task_id| task_id != id);
            if ids.is_empty() {
                inner.by_tool.remove(&record.tool);
            }
        }
        Some(record)
    }

    pub fn list_all(&self) -> Vec<TaskRecord> {
        let mut all: Vec<TaskRecord> = self.read().tasks.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query records with combined filters and pagination, oldest first.
    ///
    /// `total` counts matches after filtering and before pagination.
    pub fn query(&self, q: &TaskQuery) -> TaskPage<TaskRecord> {
        let inner = self.read();

        let iter: Box<dyn Iterator<Item = &TaskRecord>> = match &q.tool {
            Some(tool) => match inner.by_tool.get(tool.as_str()) {
                Some(ids) => Box::new(ids.iter().filter_map(|id| inner.tasks.get(id))),
                None => {
                    return TaskPage {
                        items: vec![],
                        total: 0,
                    };
                }
            },
            None => Box::new(inner.tasks.values()),
        };

        let mut filtered: Vec<&TaskRecord> = match q.status {
            Some(status) => iter.filter(|r| r.status == status).collect(),
            None => iter.collect(),
        };
        filtered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let total = filtered.len();

        let items = filtered
            .into_iter()
            .skip(q.offset)
            .take(q.limit)
            .cloned()
            .collect();

        TaskPage { items, total }
    }

    /// Drop terminal records last updated more than `ttl` ago. Returns how many were removed.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        self.purge_expired_at(SystemTime::now(), ttl)
    }

    fn purge_expired_at(&self, now: SystemTime, ttl: Duration) -> usize {
        let expired: Vec<TaskId> = self
            .read()
            .tasks
            .values()
            .filter(|r| r.status.is_terminal())
            .filter(|r| now.duration_since(r.updated_at).is_ok_and(|age| age > ttl))
            .map(|r| r.id.clone())
            .collect();

        expired.iter().filter(|id| self.remove(id).is_some()).count()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}
