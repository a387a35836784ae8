//! Timer queue
//!
//! Pending delayed tasks ordered by fire time. Cancelling a task removes its
//! body; the heap entry is left behind and skipped when it reaches the top.

use super::Task;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tokio::time::Instant;

/// Delayed tasks keyed by fire time
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: HashMap<u64, Task>,
    next_id: u64,
}

impl TimerQueue {
    /// Insert a task to fire at `at`, returning its id
    pub fn insert(&mut self, at: Instant, task: Task) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse((at, id)));
        self.tasks.insert(id, task);
        id
    }

    /// Drop a pending task. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: u64) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Earliest fire time among live tasks
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if self.tasks.contains_key(&id) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Remove and return every live task due at or before `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<Task> {
        let mut due = Vec::new();
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            if let Some(task) = self.tasks.remove(&id) {
                due.push(task);
            }
        }
        due
    }

    /// Drop every pending task
    pub fn clear(&mut self) {
        self.heap.clear();
        self.tasks.clear();
    }

    /// Number of live pending tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn recording_task(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = Arc::clone(log);
        Box::pin(async move {
            log.lock().unwrap().push(name);
        })
    }

    #[tokio::test]
    async fn test_pop_due_in_fire_time_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TimerQueue::default();
        let base = Instant::now();

        queue.insert(base + Duration::from_secs(3), recording_task(&log, "third"));
        queue.insert(base + Duration::from_secs(1), recording_task(&log, "first"));
        queue.insert(base + Duration::from_secs(2), recording_task(&log, "second"));
        queue.insert(base + Duration::from_secs(10), recording_task(&log, "later"));

        assert_eq!(queue.next_deadline(), Some(base + Duration::from_secs(1)));

        let due = queue.pop_due(base + Duration::from_secs(3));
        assert_eq!(due.len(), 3);
        for task in due {
            task.await;
        }
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TimerQueue::default();
        let base = Instant::now();

        let early = queue.insert(base + Duration::from_secs(1), recording_task(&log, "early"));
        queue.insert(base + Duration::from_secs(5), recording_task(&log, "late"));

        assert!(queue.cancel(early));
        assert!(!queue.cancel(early));
        assert_eq!(queue.next_deadline(), Some(base + Duration::from_secs(5)));
        assert!(queue.pop_due(base + Duration::from_secs(2)).is_empty());
    }

    #[tokio::test]
    async fn test_clear_empties_queue() {
        let mut queue = TimerQueue::default();
        let base = Instant::now();
        queue.insert(base, Box::pin(async {}));
        queue.insert(base, Box::pin(async {}));

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
    }
}
