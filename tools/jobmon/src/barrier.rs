//! Pause/stop checkpoint shared by every worker.
//!
//! The participant count is never fixed: a pause cycle is complete when the
//! active count falls to zero, however many workers happen to be alive.

use crate::errors::MonitorError;
use crate::state::Shared;
use crate::task::{StatusUpdate, Task};

pub(crate) fn checkpoint(shared: &Shared, line: usize) -> Result<(), MonitorError> {
    if shared.stop_requested() {
        shared.push(Task::Status {
            line,
            update: StatusUpdate::Settle,
        });
        return Err(MonitorError::Stopped);
    }

    let mut state = shared.lock();
    if !state.pause.requested {
        return Ok(());
    }

    state.active = state.active.saturating_sub(1);
    state.note_quiescence();
    state.tasks.push(Task::Status {
        line,
        update: StatusUpdate::Settle,
    });
    shared.notify_tasks();

    let epoch = state.pause.epoch;
    while state.pause.requested && state.pause.epoch == epoch && !shared.stop_requested() {
        state = shared.wait_resumed(state);
    }
    state.active += 1;
    drop(state);

    if shared.stop_requested() {
        return Err(MonitorError::Stopped);
    }
    Ok(())
}
