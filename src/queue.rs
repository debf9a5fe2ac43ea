//! Cooperative task queue for the host thread.
//!
//! Work is split into chunks; each turn runs exactly one chunk of the task
//! at the head of the queue, so the caller decides how much time to give
//! the queue between its own events. Not thread-safe: the queue lives on
//! the thread that drives it.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::mem;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::trace;

pub type QueueTaskId = u64;

/// One unit of work. Runs to completion once started.
pub type Chunk = Box<dyn FnOnce()>;

/// Re-evaluated on every sort, so a task's priority may change over time
pub type Priority = Rc<dyn Fn() -> f64>;

struct QueueTask {
    id: QueueTaskId,
    priority: Option<Priority>,
    chunks: VecDeque<Chunk>,
    canceled: bool,
}

impl QueueTask {
    fn is_live(&self) -> bool {
        !self.canceled && !self.chunks.is_empty()
    }

    fn priority(&self) -> f64 {
        match self.priority.as_ref().map(|p| p()) {
            Some(p) if !p.is_nan() => p,
            _ => 0.0,
        }
    }
}

#[derive(Default)]
struct Inner {
    tasks: VecDeque<QueueTask>,
    next_id: QueueTaskId,
}

#[derive(Default)]
pub struct TaskQueue {
    inner: RefCell<Inner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task; it runs after everything already queued until the
    /// next [`sort_tasks`](Self::sort_tasks)
    pub fn enqueue_task(&self, priority: Option<Priority>, chunks: Vec<Chunk>) -> QueueTaskId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        trace!(id, chunks = chunks.len(), "task queued");
        inner.tasks.push_back(QueueTask {
            id,
            priority,
            chunks: chunks.into(),
            canceled: false,
        });
        id
    }

    /// Stable sort by descending priority. Tasks without a priority (or a
    /// NaN one) count as 0.
    pub fn sort_tasks(&self) {
        // Priority callbacks run without the queue borrowed
        let tasks = mem::take(&mut self.inner.borrow_mut().tasks);
        let mut keyed: Vec<(f64, QueueTask)> =
            tasks.into_iter().map(|t| (t.priority(), t)).collect();
        keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let mut inner = self.inner.borrow_mut();
        let added = mem::take(&mut inner.tasks);
        inner.tasks = keyed.into_iter().map(|(_, t)| t).chain(added).collect();
    }

    /// Mark a task canceled. It is dropped lazily once it reaches the head.
    /// Returns false for unknown or finished tasks.
    pub fn cancel_task(&self, id: QueueTaskId) -> bool {
        let mut inner = self.inner.borrow_mut();
        match inner.tasks.iter_mut().find(|t| t.id == id && t.is_live()) {
            Some(task) => {
                task.canceled = true;
                trace!(id, "task canceled");
                true
            }
            None => false,
        }
    }

    /// Tasks that still have chunks to run
    pub fn len(&self) -> usize {
        self.inner.borrow().tasks.iter().filter(|t| t.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop dead tasks at the head, then run one chunk of the new head.
    /// Returns false if there was nothing to run.
    pub fn run_turn(&self) -> bool {
        let chunk = {
            let mut inner = self.inner.borrow_mut();
            while inner.tasks.front().is_some_and(|t| !t.is_live()) {
                inner.tasks.pop_front();
            }
            match inner.tasks.front_mut().and_then(|t| t.chunks.pop_front()) {
                Some(chunk) => chunk,
                None => return false,
            }
        };
        // Chunks may enqueue or cancel tasks
        chunk();
        true
    }

    /// Run turns until `budget` is spent or nothing is left. At least one
    /// turn runs. Returns whether work remains.
    pub fn run_for(&self, budget: Duration) -> bool {
        let start = Instant::now();
        let mut turns = 0usize;
        while self.run_turn() {
            turns += 1;
            if start.elapsed() >= budget {
                break;
            }
        }
        trace!(turns, elapsed = ?start.elapsed(), "queue slice");
        !self.is_empty()
    }
}
