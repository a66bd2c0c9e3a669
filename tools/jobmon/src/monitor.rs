use crate::barrier;
use crate::config::MonitorConfig;
use crate::errors::MonitorError;
use crate::input::spawn_input_thread;
use crate::lifecycle::{self, FaultRecord, WorkerId};
use crate::logging::{structured_fallback_line, JsonlLogger};
use crate::render::RenderActor;
use crate::runtime::MonitorRuntime;
use crate::signals::SignalBridge;
use crate::state::Shared;
use crate::task::{StatusUpdate, Task};
use nix::sys::signal::Signal;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

/// Handle on a running monitor. Cheap to clone and safe to move between
/// worker threads.
#[derive(Clone)]
pub struct Monitor {
    shared: Arc<Shared>,
}

impl Monitor {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Registers another cooperating worker and starts it on its own thread.
    pub fn spawn_worker<F>(&self, work: F) -> Result<WorkerId, MonitorError>
    where
        F: FnOnce(&Worker) -> Result<(), MonitorError> + Send + 'static,
    {
        lifecycle::spawn_worker(&self.shared, work)
    }

    pub fn is_sole_active_worker(&self) -> bool {
        self.shared.counts().1 == 1
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }

    pub fn screen_width(&self) -> usize {
        self.shared.width()
    }
}

/// The calling worker's view of the monitor: its identity, its screen line,
/// and the checkpoint it must visit between units of work.
pub struct Worker {
    id: WorkerId,
    line: usize,
    monitor: Monitor,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, line: usize, monitor: Monitor) -> Self {
        Self { id, line, monitor }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn report_status(&self, text: impl Into<String>) {
        self.monitor.shared.push(Task::Status {
            line: self.line,
            update: StatusUpdate::Text(text.into()),
        });
    }

    /// Blocks while a pause is in progress. Returns `Err(Stopped)` once the
    /// run is shutting down; propagate it with `?`.
    pub fn checkpoint(&self) -> Result<(), MonitorError> {
        barrier::checkpoint(&self.monitor.shared, self.line)
    }

    pub fn spawn_worker<F>(&self, work: F) -> Result<WorkerId, MonitorError>
    where
        F: FnOnce(&Worker) -> Result<(), MonitorError> + Send + 'static,
    {
        self.monitor.spawn_worker(work)
    }

    pub fn is_sole_active_worker(&self) -> bool {
        self.monitor.is_sole_active_worker()
    }

    pub fn screen_width(&self) -> usize {
        self.monitor.screen_width()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// One entry per faulting worker, ordered by worker id.
    pub faults: Vec<FaultRecord>,
    /// Signal handed back to the process after teardown.
    pub exit_signal: Option<Signal>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.faults.is_empty() {
            0
        } else {
            1
        }
    }

    pub fn write_faults(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for fault in &self.faults {
            writeln!(
                out,
                "{}",
                structured_fallback_line(&fault.worker.to_string(), "fault", &fault.summary)
            )?;
            for line in fault.trace.lines() {
                writeln!(out, "    {line}")?;
            }
        }
        out.flush()
    }
}

/// Runs `entry` as the first worker on the live terminal and blocks until
/// every worker has exited.
pub fn start<F>(config: &MonitorConfig, entry: F) -> Result<RunReport, MonitorError>
where
    F: FnOnce(&Worker) -> Result<(), MonitorError> + Send + 'static,
{
    start_with(config, MonitorRuntime::production()?, entry)
}

pub fn start_with<F>(
    config: &MonitorConfig,
    runtime: MonitorRuntime,
    entry: F,
) -> Result<RunReport, MonitorError>
where
    F: FnOnce(&Worker) -> Result<(), MonitorError> + Send + 'static,
{
    let MonitorRuntime {
        mut display,
        keyboard,
        signal_control,
        signals,
        mut diagnostics,
    } = runtime;

    let shared = Arc::new(Shared::new(JsonlLogger::from_config(&config.log)));
    shared.log(
        "info",
        "run_started",
        json!({ "title": config.banner.title, "signals": signals.len() }),
    );

    let mut bridge = SignalBridge::install(&signals)?;
    let keyboard = Arc::new(keyboard);
    let input = spawn_input_thread(Arc::clone(&shared), Arc::clone(&keyboard), bridge.reader())?;

    let outcome = {
        let mut actor = RenderActor::new(
            &shared,
            display.as_mut(),
            signal_control.as_ref(),
            &bridge,
            &keyboard,
            &config.banner.title,
            &config.banner.help,
            &config.banner.pausing,
        );
        actor
            .enter()
            .and_then(|()| lifecycle::spawn_worker(&shared, entry))
            .and_then(|_| actor.run())
    };

    // Teardown runs on every path: terminal, then signals, then the input
    // thread, which sees the bridge hang up.
    let left = display.leave();
    bridge.teardown();
    let _ = input.join();
    drop(keyboard);

    // The fault list goes out on every path, including an actor or display
    // failure during shutdown.
    let faults = shared.lock().faults.values().cloned().collect::<Vec<_>>();
    let report = RunReport {
        faults,
        exit_signal: outcome.as_ref().ok().copied().flatten(),
    };
    let failure = outcome.as_ref().err().or(left.as_ref().err());
    shared.log(
        "info",
        "run_finished",
        json!({
            "faults": report.faults.len(),
            "signal": report.exit_signal.map(Signal::as_str),
            "error": failure.map(ToString::to_string),
        }),
    );
    let written = report
        .write_faults(diagnostics.as_mut())
        .map_err(|e| MonitorError::Io(e.to_string()));

    outcome?;
    left?;
    written?;

    if let Some(signal) = report.exit_signal {
        signal_control.deliver_default(signal)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::RunReport;
    use crate::lifecycle::{FaultRecord, WorkerId};

    #[test]
    fn exit_code_reflects_faults() {
        let mut report = RunReport {
            faults: Vec::new(),
            exit_signal: None,
        };
        assert_eq!(report.exit_code(), 0);
        report.faults.push(FaultRecord {
            worker: WorkerId(2),
            summary: "disk on fire".to_string(),
            trace: "Worker(\"disk on fire\")\ncaused by: nothing".to_string(),
        });
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn faults_are_written_with_their_traces() {
        let report = RunReport {
            faults: vec![FaultRecord {
                worker: WorkerId(2),
                summary: "disk on fire".to_string(),
                trace: "first\nsecond".to_string(),
            }],
            exit_signal: None,
        };
        let mut out = Vec::new();
        report.write_faults(&mut out).expect("write");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "worker=worker-2 state=fault message=disk on fire\n    first\n    second\n"
        );
    }
}
