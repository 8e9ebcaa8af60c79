//! In-flight task registry
//!
//! Tracks every task a worker has claimed but not yet resolved, and
//! derives the number of free slots for the next poll from it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::queue::Task;

/// Identifies one claim of a task id
///
/// The same task id can be re-offered after a local eviction; removal is
/// always keyed by `(task_id, token)` so a stale executor or timer never
/// removes a newer claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(u64);

/// Why a claim was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRejected {
    /// The task id is already in flight
    Duplicate,
    /// Every slot is taken
    Full,
}

/// Point-in-time view of one in-flight task
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightTask {
    pub task_id: String,
    pub task_type: String,
    pub workflow_instance_id: String,
    pub claimed_at: DateTime<Utc>,
    pub has_deadline: bool,
}

struct InFlightEntry {
    task: Task,
    token: ClaimToken,
    claimed_at: DateTime<Utc>,
    deadline: Option<AbortHandle>,
}

/// Concurrency-safe registry of claimed tasks
///
/// The lock is only held for map operations, never across an `.await`.
pub struct TaskSlotTracker {
    capacity: usize,
    entries: Mutex<HashMap<String, InFlightEntry>>,
    next_token: AtomicU64,
}

impl TaskSlotTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a task if it is not already present and a slot is free
    pub fn claim(&self, task: &Task) -> Result<ClaimToken, ClaimRejected> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&task.task_id) {
            return Err(ClaimRejected::Duplicate);
        }
        if entries.len() >= self.capacity {
            return Err(ClaimRejected::Full);
        }

        let token = ClaimToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        entries.insert(
            task.task_id.clone(),
            InFlightEntry {
                task: task.clone(),
                token,
                claimed_at: Utc::now(),
                deadline: None,
            },
        );
        Ok(token)
    }

    /// Attach a deadline timer to a claim
    ///
    /// Returns `false` and aborts the timer when the claim is already gone.
    pub fn arm_deadline(&self, task_id: &str, token: ClaimToken, timer: AbortHandle) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(task_id) {
            Some(entry) if entry.token == token => {
                if let Some(previous) = entry.deadline.replace(timer) {
                    previous.abort();
                }
                true
            }
            _ => {
                timer.abort();
                false
            }
        }
    }

    /// Remove a claim and disarm its deadline
    ///
    /// Idempotent: `false` when the claim was already removed or replaced.
    pub fn release(&self, task_id: &str, token: ClaimToken) -> bool {
        match self.remove(task_id, token) {
            Some(entry) => {
                if let Some(timer) = entry.deadline {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Remove a claim from its own deadline timer
    ///
    /// Unlike [`release`](Self::release) the timer handle is dropped, not aborted.
    pub fn evict(&self, task_id: &str, token: ClaimToken) -> bool {
        self.remove(task_id, token).is_some()
    }

    fn remove(&self, task_id: &str, token: ClaimToken) -> Option<InFlightEntry> {
        let mut entries = self.entries.lock();
        match entries.get(task_id) {
            Some(entry) if entry.token == token => entries.remove(task_id),
            _ => None,
        }
    }

    /// Whether `token` is still the live claim for `task_id`
    pub fn is_current(&self, task_id: &str, token: ClaimToken) -> bool {
        self.entries
            .lock()
            .get(task_id)
            .is_some_and(|entry| entry.token == token)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.lock().contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Slots available for the next poll
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    pub fn snapshot(&self) -> Vec<InFlightTask> {
        let mut tasks: Vec<InFlightTask> = self
            .entries
            .lock()
            .values()
            .map(|entry| InFlightTask {
                task_id: entry.task.task_id.clone(),
                task_type: entry.task.task_type.clone(),
                workflow_instance_id: entry.task.workflow_instance_id.clone(),
                claimed_at: entry.claimed_at,
                has_deadline: entry.deadline.is_some(),
            })
            .collect();
        tasks.sort_by(|a, b| a.claimed_at.cmp(&b.claimed_at));
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(id: &str) -> Task {
        Task::new(id, "test", "wf-1")
    }

    #[test]
    fn test_claim_until_full() {
        let tracker = TaskSlotTracker::new(2);
        assert_eq!(tracker.free_slots(), 2);

        tracker.claim(&task("a")).unwrap();
        tracker.claim(&task("b")).unwrap();
        assert_eq!(tracker.free_slots(), 0);
        assert_eq!(tracker.claim(&task("c")), Err(ClaimRejected::Full));
    }

    #[test]
    fn test_zero_capacity_admits_nothing() {
        let tracker = TaskSlotTracker::new(0);
        assert_eq!(tracker.free_slots(), 0);
        assert_eq!(tracker.claim(&task("t-1")), Err(ClaimRejected::Full));
    }

    #[test]
    fn test_duplicate_claim_rejected() {
        let tracker = TaskSlotTracker::new(4);
        tracker.claim(&task("a")).unwrap();
        assert_eq!(tracker.claim(&task("a")), Err(ClaimRejected::Duplicate));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let tracker = TaskSlotTracker::new(1);
        let token = tracker.claim(&task("a")).unwrap();

        assert!(tracker.release("a", token));
        assert!(!tracker.release("a", token));
        assert!(!tracker.release("missing", token));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_stale_token_cannot_remove_newer_claim() {
        let tracker = TaskSlotTracker::new(1);
        let first = tracker.claim(&task("a")).unwrap();
        assert!(tracker.evict("a", first));

        let second = tracker.claim(&task("a")).unwrap();
        assert_ne!(first, second);
        assert!(!tracker.release("a", first));
        assert!(tracker.contains("a"));
        assert!(tracker.is_current("a", second));
        assert!(!tracker.is_current("a", first));
    }

    #[tokio::test]
    async fn test_release_aborts_deadline() {
        let tracker = TaskSlotTracker::new(1);
        let token = tracker.claim(&task("a")).unwrap();

        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)));
        assert!(tracker.arm_deadline("a", token, timer.abort_handle()));
        assert!(tracker.snapshot()[0].has_deadline);

        assert!(tracker.release("a", token));
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_arm_after_release_aborts_timer() {
        let tracker = TaskSlotTracker::new(1);
        let token = tracker.claim(&task("a")).unwrap();
        tracker.release("a", token);

        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)));
        assert!(!tracker.arm_deadline("a", token, timer.abort_handle()));
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
