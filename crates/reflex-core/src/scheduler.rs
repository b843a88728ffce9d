//! Deferred task scheduling
//!
//! Producers never notify subscribers from inside `dispatch`. They hand a
//! flush task to a [`Scheduler`], which runs it at the next tick boundary.
//! Every dispatch in between coalesces into that single flush.
//!
//! [`TickScheduler`] is the stock implementation: tasks queue up until the
//! host calls [`TickScheduler::run_pending`], typically once per frame. Tests
//! inject their own instance and tick it by hand.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A deferred unit of work
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks on a later tick
pub trait Scheduler {
    /// Queue `task` for the next tick and return a handle that can cancel it
    fn defer(&self, task: Task) -> TaskHandle;
}

/// Cancellation handle for a deferred task
#[derive(Clone, Default)]
pub struct TaskHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TaskHandle {
    /// Create a fresh, live handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running; no-op if it already ran
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Whether `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Queue-based scheduler driven by the host loop
#[derive(Default)]
pub struct TickScheduler {
    queue: RefCell<VecDeque<(TaskHandle, Task)>>,
    tick: Cell<u64>,
}

impl TickScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every task that was queued before this call
    ///
    /// Tasks deferred while the batch runs land in the next tick. Returns the
    /// number of tasks that actually ran.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<_> = self.queue.borrow_mut().drain(..).collect();
        self.tick.set(self.tick.get() + 1);

        let mut ran = 0;
        for (handle, task) in batch {
            // An earlier task in this batch may have cancelled this one
            if handle.is_cancelled() {
                continue;
            }
            task();
            ran += 1;
        }
        ran
    }

    /// Number of queued tasks that have not been cancelled
    pub fn pending(&self) -> usize {
        self.queue
            .borrow()
            .iter()
            .filter(|(handle, _)| !handle.is_cancelled())
            .count()
    }

    /// Number of completed `run_pending` calls
    pub fn tick(&self) -> u64 {
        self.tick.get()
    }
}

impl Scheduler for TickScheduler {
    fn defer(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        self.queue.borrow_mut().push_back((handle.clone(), task));
        handle
    }
}

thread_local! {
    static LOCAL: Rc<TickScheduler> = Rc::new(TickScheduler::new());
}

/// The calling thread's default scheduler
pub fn local() -> Rc<TickScheduler> {
    LOCAL.with(Rc::clone)
}

/// Run the tasks queued on the thread's default scheduler
pub fn run_deferred() -> usize {
    local().run_pending()
}
