use crate::lifecycle::{FaultRecord, LineTable, WorkerId};
use crate::logging::{JsonlLogger, LogEvent};
use crate::task::{Task, TaskQueue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub(crate) struct PauseGate {
    pub requested: bool,
    pub epoch: u64,
    pub quiesced_sent: bool,
}

/// Everything guarded by the one coarse lock.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub tasks: TaskQueue,
    pub lines: LineTable,
    pub live: usize,
    pub active: usize,
    pub pause: PauseGate,
    pub faults: BTreeMap<WorkerId, FaultRecord>,
    pub next_worker: u64,
}

impl State {
    /// Queues the pause cycle's `Done(true)` the first time active hits zero.
    pub fn note_quiescence(&mut self) {
        if self.pause.requested && self.active == 0 && self.live > 0 && !self.pause.quiesced_sent {
            self.pause.quiesced_sent = true;
            self.tasks.push(Task::Done { quiesced: true });
        }
    }
}

pub(crate) struct Shared {
    state: Mutex<State>,
    task_ready: Condvar,
    resumed: Condvar,
    stop: AtomicBool,
    width: AtomicUsize,
    logger: Option<JsonlLogger>,
}

impl Shared {
    pub fn new(logger: Option<JsonlLogger>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            task_ready: Condvar::new(),
            resumed: Condvar::new(),
            stop: AtomicBool::new(false),
            width: AtomicUsize::new(80),
            logger,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, task: Task) {
        let mut state = self.lock();
        state.tasks.push(task);
        drop(state);
        self.task_ready.notify_one();
    }

    /// Wakes the render actor after tasks were pushed under an existing guard.
    pub fn notify_tasks(&self) {
        self.task_ready.notify_one();
    }

    pub fn next_task(&self) -> Task {
        let mut state = self.lock();
        loop {
            if let Some(task) = state.tasks.pop() {
                return task;
            }
            state = self
                .task_ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn wait_resumed<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.resumed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sets the stop gate for good and wakes anyone parked in a pause.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _state = self.lock();
        self.resumed.notify_all();
    }

    /// Returns false when a pause cycle is already in progress.
    pub fn request_pause(&self) -> bool {
        let mut state = self.lock();
        if state.pause.requested {
            return false;
        }
        state.pause.requested = true;
        state.pause.quiesced_sent = false;
        true
    }

    pub fn release_pause(&self) {
        let mut state = self.lock();
        state.pause.requested = false;
        state.pause.epoch += 1;
        drop(state);
        self.resumed.notify_all();
    }

    /// Last terminal width the render actor saw.
    pub fn width(&self) -> usize {
        self.width.load(Ordering::Relaxed)
    }

    pub fn set_width(&self, width: usize) {
        self.width.store(width, Ordering::Relaxed);
    }

    pub fn counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.live, state.active)
    }

    pub fn log(&self, level: &str, event_type: &str, payload: Value) {
        if let Some(logger) = &self.logger {
            let _ = logger.append(&LogEvent {
                level,
                event_type,
                payload,
            });
        }
    }

    #[cfg(test)]
    pub fn drain_tasks(&self) -> Vec<Task> {
        let mut state = self.lock();
        std::iter::from_fn(|| state.tasks.pop()).collect()
    }
}
