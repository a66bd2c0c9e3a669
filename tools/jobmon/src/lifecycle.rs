use crate::errors::MonitorError;
use crate::monitor::{Monitor, Worker};
use crate::state::Shared;
use crate::task::{StatusUpdate, Task};
use serde_json::json;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub u64);

impl WorkerId {
    pub fn thread_name(self) -> String {
        format!("worker-{}", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRecord {
    pub worker: WorkerId,
    pub summary: String,
    pub trace: String,
}

/// Screen line indices handed out to live workers, lowest free first.
#[derive(Debug, Default)]
pub struct LineTable {
    used: BTreeSet<usize>,
}

impl LineTable {
    pub fn claim(&mut self) -> usize {
        let line = (0..)
            .find(|idx| !self.used.contains(idx))
            .unwrap_or(self.used.len());
        self.used.insert(line);
        line
    }

    pub fn release(&mut self, line: usize) {
        self.used.remove(&line);
    }

    pub fn in_use(&self) -> usize {
        self.used.len()
    }
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Panics on worker threads are recorded instead of printed over the screen.
fn install_panic_capture() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let trace = format!("{info}\n{}", Backtrace::force_capture());
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

pub(crate) fn spawn_worker<F>(shared: &Arc<Shared>, work: F) -> Result<WorkerId, MonitorError>
where
    F: FnOnce(&Worker) -> Result<(), MonitorError> + Send + 'static,
{
    install_panic_capture();
    let (id, line) = register(shared);
    let worker = Worker::new(id, line, Monitor::from_shared(Arc::clone(shared)));
    let spawned = thread::Builder::new()
        .name(id.thread_name())
        .spawn(move || run_worker(worker, work));
    if let Err(error) = spawned {
        unregister(shared, line);
        return Err(MonitorError::Io(format!("spawn {id}: {error}")));
    }
    shared.log("info", "worker_spawned", json!({ "worker": id.0, "line": line }));
    Ok(id)
}

fn register(shared: &Shared) -> (WorkerId, usize) {
    let mut state = shared.lock();
    state.next_worker += 1;
    let id = WorkerId(state.next_worker);
    let line = state.lines.claim();
    state.live += 1;
    state.active += 1;
    (id, line)
}

fn unregister(shared: &Shared, line: usize) {
    let mut state = shared.lock();
    state.lines.release(line);
    state.live = state.live.saturating_sub(1);
    state.active = state.active.saturating_sub(1);
    if state.live == 0 {
        state.tasks.push(Task::Done { quiesced: false });
    } else {
        state.note_quiescence();
    }
    drop(state);
    shared.notify_tasks();
}

fn run_worker<F>(worker: Worker, work: F)
where
    F: FnOnce(&Worker) -> Result<(), MonitorError>,
{
    CAPTURING.with(|flag| flag.set(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&worker)));
    let fault = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(error)) if error.is_stop() => None,
        Ok(Err(error)) => Some((error.to_string(), error_trace(&error))),
        Err(payload) => {
            let trace = LAST_PANIC
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| "backtrace unavailable".to_string());
            Some((panic_message(payload.as_ref()), trace))
        }
    };

    let shared = worker.monitor().shared();
    if let Some((summary, trace)) = fault {
        shared.log(
            "error",
            "worker_fault",
            json!({ "worker": worker.id().0, "summary": summary }),
        );
        let banner = format!("*** Uncaught error: {summary}");
        shared
            .lock()
            .faults
            .entry(worker.id())
            .or_insert(FaultRecord {
                worker: worker.id(),
                summary,
                trace,
            });
        shared.push(Task::Status {
            line: worker.line(),
            update: StatusUpdate::Text(banner),
        });
    }
    shared.log("info", "worker_exited", json!({ "worker": worker.id().0 }));
    unregister(shared, worker.line());
}

fn error_trace(error: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![format!("{error:?}")];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    lines.join("\n")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return format!("panic: {text}");
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return format!("panic: {text}");
    }
    "panic with non-string payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::{spawn_worker, LineTable};
    use crate::errors::MonitorError;
    use crate::state::Shared;
    use crate::task::{StatusUpdate, Task};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    fn wait_for_done(shared: &Shared) -> Vec<Task> {
        let mut seen = Vec::new();
        loop {
            let task = shared.next_task();
            let done = task == Task::Done { quiesced: false };
            seen.push(task);
            if done {
                return seen;
            }
        }
    }

    #[test]
    fn lowest_free_line_is_reused_after_release() {
        let mut table = LineTable::default();
        assert_eq!(table.claim(), 0);
        assert_eq!(table.claim(), 1);
        assert_eq!(table.claim(), 2);
        table.release(0);
        assert_eq!(table.claim(), 0);
        table.release(1);
        assert_eq!(table.claim(), 1);
        assert_eq!(table.claim(), 3);
        assert_eq!(table.in_use(), 4);
    }

    #[test]
    fn worker_b_takes_line_zero_after_worker_a_exits() {
        let shared = Arc::new(Shared::new(None));
        let (tx, rx) = mpsc::channel();
        let a_tx = tx.clone();
        spawn_worker(&shared, move |worker| {
            a_tx.send(worker.line()).expect("send a");
            Ok(())
        })
        .expect("worker a");
        let a_line = rx.recv_timeout(Duration::from_secs(5)).expect("a line");
        wait_for_done(&shared);

        spawn_worker(&shared, move |worker| {
            tx.send(worker.line()).expect("send b");
            Ok(())
        })
        .expect("worker b");
        let b_line = rx.recv_timeout(Duration::from_secs(5)).expect("b line");
        wait_for_done(&shared);

        assert_eq!(a_line, 0);
        assert_eq!(b_line, 0);
        assert_eq!(shared.lock().lines.in_use(), 0);
    }

    #[test]
    fn returned_error_is_recorded_once_and_shown_on_its_line() {
        let shared = Arc::new(Shared::new(None));
        let id = spawn_worker(&shared, |_| Err(MonitorError::worker("disk on fire")))
            .expect("spawn");
        let tasks = wait_for_done(&shared);

        assert!(tasks.contains(&Task::Status {
            line: 0,
            update: StatusUpdate::Text("*** Uncaught error: disk on fire".to_string()),
        }));
        let state = shared.lock();
        assert_eq!(state.faults.len(), 1);
        assert_eq!(state.faults[&id].summary, "disk on fire");
        assert_eq!(state.live, 0);
        assert_eq!(state.active, 0);
    }

    #[test]
    fn panics_are_captured_with_a_trace() {
        let shared = Arc::new(Shared::new(None));
        let id = spawn_worker(&shared, |_| panic!("boom")).expect("spawn");
        wait_for_done(&shared);

        let state = shared.lock();
        let fault = &state.faults[&id];
        assert_eq!(fault.summary, "panic: boom");
        assert!(fault.trace.contains("boom"));
    }

    #[test]
    fn stop_is_a_clean_exit() {
        let shared = Arc::new(Shared::new(None));
        spawn_worker(&shared, |_| Err(MonitorError::Stopped)).expect("spawn");
        wait_for_done(&shared);
        assert!(shared.lock().faults.is_empty());
    }
}
