//! The render actor: sole owner of the terminal and sole consumer of the
//! task queue. Pause and exit decisions are made here and pushed back to
//! the workers through the gates in [`Shared`].

use crate::errors::MonitorError;
use crate::input::{discard_pending, Keyboard};
use crate::runtime::{Display, SignalControl};
use crate::screen::VirtualScreen;
use crate::signals::SignalBridge;
use crate::state::Shared;
use crate::task::Task;
use nix::sys::signal::Signal;
use serde_json::json;
use std::os::fd::AsRawFd;

enum Flow {
    Continue,
    /// Every worker is gone. Carries the signal to re-deliver, if any.
    Finished(Option<Signal>),
}

pub(crate) struct RenderActor<'a> {
    shared: &'a Shared,
    display: &'a mut dyn Display,
    signal_control: &'a dyn SignalControl,
    bridge: &'a SignalBridge,
    keyboard: &'a Keyboard,
    screen: VirtualScreen,
    pausing_text: String,
    saved_help: Option<String>,
    pending_suspend: Option<Signal>,
    exit_signal: Option<Signal>,
    exiting: bool,
}

impl<'a> RenderActor<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shared: &'a Shared,
        display: &'a mut dyn Display,
        signal_control: &'a dyn SignalControl,
        bridge: &'a SignalBridge,
        keyboard: &'a Keyboard,
        title: &str,
        help: &str,
        pausing_text: &str,
    ) -> Self {
        Self {
            shared,
            display,
            signal_control,
            bridge,
            keyboard,
            screen: VirtualScreen::new(title, help),
            pausing_text: pausing_text.to_string(),
            saved_help: None,
            pending_suspend: None,
            exit_signal: None,
            exiting: false,
        }
    }

    pub fn enter(&mut self) -> Result<(), MonitorError> {
        self.display.enter()?;
        self.redraw()
    }

    /// Serves tasks until the last worker exits. Returns the signal that
    /// should be re-delivered once the caller has finished tearing down.
    pub fn run(&mut self) -> Result<Option<Signal>, MonitorError> {
        loop {
            let task = self.shared.next_task();
            self.shared.log("debug", "task", json!({ "kind": task.kind() }));
            match self.handle(task) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished(redeliver)) => return Ok(redeliver),
                Err(error) if self.shared.stop_requested() => {
                    self.shared
                        .log("error", "actor_failed", json!({ "error": error.to_string() }));
                    return Err(error);
                }
                Err(error) => self.crash(&error),
            }
        }
    }

    fn handle(&mut self, task: Task) -> Result<Flow, MonitorError> {
        match task {
            Task::Status { line, update } => {
                if self.screen.apply(line, update).is_some() {
                    self.display.present(&self.screen, false)?;
                }
            }
            Task::Redraw => self.redraw()?,
            Task::Suspend(signal) => self.suspend(signal)?,
            Task::Exit(signal) => self.exit(signal)?,
            Task::Done { quiesced: true } => self.stop_process()?,
            Task::Done { quiesced: false } => {
                self.display.leave()?;
                let redeliver = self.exit_signal.filter(|sig| *sig != Signal::SIGINT);
                return Ok(Flow::Finished(redeliver));
            }
        }
        Ok(Flow::Continue)
    }

    fn redraw(&mut self) -> Result<(), MonitorError> {
        let (width, height) = self.display.geometry()?;
        self.screen.resize(width, height);
        self.shared.set_width(usize::from(width));
        self.display.present(&self.screen, true)
    }

    fn suspend(&mut self, signal: Signal) -> Result<(), MonitorError> {
        // One pause cycle at a time, and none once shutdown has begun.
        if self.exiting || self.pending_suspend.is_some() || !self.shared.request_pause() {
            self.shared
                .log("info", "suspend_ignored", json!({ "signal": signal.as_str() }));
            return Ok(());
        }
        self.shared
            .log("info", "pause_requested", json!({ "signal": signal.as_str() }));
        self.pending_suspend = Some(signal);
        self.saved_help = Some(self.screen.help().to_string());
        self.screen.set_help(self.pausing_text.clone());
        self.screen.emphasize_all();
        self.display.present(&self.screen, true)
    }

    fn exit(&mut self, signal: Option<Signal>) -> Result<(), MonitorError> {
        if self.exit_signal.is_none() {
            self.exit_signal = signal;
        }
        if !self.exiting {
            self.exiting = true;
            self.shared.log(
                "info",
                "exit_requested",
                json!({ "signal": signal.map(Signal::as_str) }),
            );
            self.shared.request_stop();
        }
        if self.pending_suspend.take().is_some() {
            self.saved_help = None;
            self.shared.release_pause();
        }
        let text = match self.exit_signal {
            Some(sig) => format!("Shutting down (signal {}).", sig as i32),
            None => "Shutting down.".to_string(),
        };
        self.screen.set_help(text);
        self.screen.emphasize_all();
        self.display.present(&self.screen, true)
    }

    /// Every active worker is parked: hand the terminal back, stop for real,
    /// and pick everything up again once the shell continues us.
    fn stop_process(&mut self) -> Result<(), MonitorError> {
        let Some(signal) = self.pending_suspend.take() else {
            self.shared.log("info", "late_quiescence_ignored", json!({}));
            return Ok(());
        };
        if self.exiting {
            return Ok(());
        }
        self.shared
            .log("info", "pause_granted", json!({ "signal": signal.as_str() }));
        self.display.leave()?;
        self.signal_control.deliver_default(signal)?;
        self.bridge.reinstall(signal)?;
        discard_pending(self.keyboard.raw());
        discard_pending(self.bridge.reader().as_raw_fd());
        self.display.enter()?;

        self.shared.release_pause();
        if let Some(help) = self.saved_help.take() {
            self.screen.set_help(help);
        }
        self.shared.log("info", "resumed", json!({ "signal": signal.as_str() }));
        self.redraw()
    }

    fn crash(&mut self, error: &MonitorError) {
        self.shared
            .log("error", "actor_crash", json!({ "error": error.to_string() }));
        self.screen.set_help(format!("*** {error} *** Crashing."));
        self.screen.emphasize_all();
        self.exiting = true;
        self.shared.request_stop();
        if self.pending_suspend.take().is_some() {
            self.shared.release_pause();
        }
        // The display may be half torn down; get it back if we can.
        let _ = self.display.enter();
        let _ = self.display.present(&self.screen, true);
    }
}
