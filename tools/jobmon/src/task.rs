use nix::sys::signal::Signal;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// New content for a worker's status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Text(String),
    /// Drop the bold emphasis but keep the last text.
    Settle,
}

/// Work item for the render actor. `None` as a signal means the user asked
/// for the action from the keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Status { line: usize, update: StatusUpdate },
    Redraw,
    Suspend(Signal),
    Exit(Option<Signal>),
    Done { quiesced: bool },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::Status { .. } => "status",
            Task::Redraw => "redraw",
            Task::Suspend(_) => "suspend",
            Task::Exit(_) => "exit",
            Task::Done { quiesced: true } => "quiesced",
            Task::Done { quiesced: false } => "finished",
        }
    }

    /// Lower keys are served first: exit, suspend, redraw, status by line, done.
    pub fn priority(&self) -> (u8, usize) {
        match self {
            Task::Exit(_) => (0, 0),
            Task::Suspend(_) => (1, 0),
            Task::Redraw => (2, 0),
            Task::Status { line, .. } => (3, *line),
            Task::Done { .. } => (4, 0),
        }
    }
}

#[derive(Debug)]
struct Queued {
    key: (u8, usize),
    seq: u64,
    task: Task,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Priority queue of tasks. Ties inside a priority class fall back to
/// insertion order.
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Reverse<Queued>>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Queued {
            key: task.priority(),
            seq,
            task,
        }));
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|Reverse(queued)| queued.task)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
