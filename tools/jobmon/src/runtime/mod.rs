use crate::errors::MonitorError;
use crate::input::Keyboard;
use crate::screen::VirtualScreen;
use crate::signals::HANDLED_SIGNALS;
use crossterm::cursor::{Hide, Show};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use nix::sys::signal::{raise, signal, SigHandler, SigSet, Signal};
use nix::sys::termios::{
    tcgetattr, tcsetattr, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices, Termios,
};
use ratatui::backend::{CrosstermBackend, TestBackend};
use ratatui::buffer::Buffer;
use ratatui::Terminal;
use std::io::{Stdout, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// The terminal as seen by the render actor. Only that actor calls these.
pub trait Display: Send {
    fn enter(&mut self) -> Result<(), MonitorError>;
    fn leave(&mut self) -> Result<(), MonitorError>;
    /// Current (columns, rows) as reported by the OS.
    fn geometry(&mut self) -> Result<(u16, u16), MonitorError>;
    fn present(&mut self, screen: &VirtualScreen, full: bool) -> Result<(), MonitorError>;
}

pub trait SignalControl: Send + Sync {
    /// Resets `signal` to its default disposition and delivers it to this
    /// process. Returns once the process continues, if it does.
    fn deliver_default(&self, signal: Signal) -> Result<(), MonitorError>;
}

fn terminal_error(error: impl std::fmt::Display) -> MonitorError {
    MonitorError::Terminal(error.to_string())
}

#[derive(Default)]
pub struct CrosstermDisplay {
    terminal: Option<Terminal<CrosstermBackend<Stdout>>>,
    saved_mode: Option<Termios>,
}

impl CrosstermDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter_cbreak(&mut self) -> Result<(), MonitorError> {
        let stdin = std::io::stdin();
        // Not a tty: nothing to switch, keys arrive as plain bytes anyway.
        let Ok(saved) = tcgetattr(&stdin) else {
            return Ok(());
        };
        let mut mode = saved.clone();
        mode.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        mode.input_flags.remove(InputFlags::ICRNL);
        mode.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        mode.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        tcsetattr(&stdin, SetArg::TCSANOW, &mode).map_err(terminal_error)?;
        self.saved_mode = Some(saved);
        Ok(())
    }

    fn restore_mode(&mut self) -> Result<(), MonitorError> {
        if let Some(saved) = self.saved_mode.take() {
            tcsetattr(std::io::stdin(), SetArg::TCSANOW, &saved).map_err(terminal_error)?;
        }
        Ok(())
    }
}

impl Display for CrosstermDisplay {
    fn enter(&mut self) -> Result<(), MonitorError> {
        if self.terminal.is_some() {
            return Ok(());
        }
        self.enter_cbreak()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen, Hide).map_err(terminal_error)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout)).map_err(terminal_error)?;
        self.terminal = Some(terminal);
        Ok(())
    }

    fn leave(&mut self) -> Result<(), MonitorError> {
        let Some(mut terminal) = self.terminal.take() else {
            return Ok(());
        };
        let shown = execute!(terminal.backend_mut(), Show, LeaveAlternateScreen);
        drop(terminal);
        self.restore_mode()?;
        shown.map_err(terminal_error)
    }

    fn geometry(&mut self) -> Result<(u16, u16), MonitorError> {
        crossterm::terminal::size().map_err(terminal_error)
    }

    fn present(&mut self, screen: &VirtualScreen, full: bool) -> Result<(), MonitorError> {
        let terminal = self
            .terminal
            .as_mut()
            .ok_or_else(|| MonitorError::Terminal("display is not active".to_string()))?;
        if full {
            terminal.clear().map_err(terminal_error)?;
        }
        terminal
            .draw(|frame| frame.render_widget(screen, frame.area()))
            .map_err(terminal_error)?;
        Ok(())
    }
}

impl Drop for CrosstermDisplay {
    fn drop(&mut self) {
        let _ = self.leave();
    }
}

struct FakeDisplayState {
    terminal: Terminal<TestBackend>,
    geometry: (u16, u16),
    active: bool,
    enters: usize,
    leaves: usize,
    full_redraws: usize,
    frames: Vec<String>,
    fail_next_present: Option<MonitorError>,
}

/// In-memory display for tests. Clones share the same recorded state.
#[derive(Clone)]
pub struct FakeDisplay {
    state: Arc<Mutex<FakeDisplayState>>,
}

impl FakeDisplay {
    pub fn new(width: u16, height: u16) -> Result<Self, MonitorError> {
        let terminal = Terminal::new(TestBackend::new(width, height)).map_err(terminal_error)?;
        Ok(Self {
            state: Arc::new(Mutex::new(FakeDisplayState {
                terminal,
                geometry: (width, height),
                active: false,
                enters: 0,
                leaves: 0,
                full_redraws: 0,
                frames: Vec::new(),
                fail_next_present: None,
            })),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeDisplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes what the next `geometry` call reports, like a window resize.
    pub fn set_geometry(&self, width: u16, height: u16) {
        self.lock().geometry = (width, height);
    }

    pub fn fail_next_present(&self, error: MonitorError) {
        self.lock().fail_next_present = Some(error);
    }

    pub fn enters(&self) -> usize {
        self.lock().enters
    }

    pub fn leaves(&self) -> usize {
        self.lock().leaves
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn full_redraws(&self) -> usize {
        self.lock().full_redraws
    }

    pub fn frames(&self) -> Vec<String> {
        self.lock().frames.clone()
    }

    pub fn last_frame(&self) -> Option<String> {
        self.lock().frames.last().cloned()
    }
}

impl Display for FakeDisplay {
    fn enter(&mut self) -> Result<(), MonitorError> {
        let mut state = self.lock();
        if !state.active {
            state.active = true;
            state.enters += 1;
        }
        Ok(())
    }

    fn leave(&mut self) -> Result<(), MonitorError> {
        let mut state = self.lock();
        if state.active {
            state.active = false;
            state.leaves += 1;
        }
        Ok(())
    }

    fn geometry(&mut self) -> Result<(u16, u16), MonitorError> {
        Ok(self.lock().geometry)
    }

    fn present(&mut self, screen: &VirtualScreen, full: bool) -> Result<(), MonitorError> {
        let mut state = self.lock();
        if let Some(error) = state.fail_next_present.take() {
            return Err(error);
        }
        if !state.active {
            return Err(MonitorError::Terminal("display is not active".to_string()));
        }
        let (width, height) = state.geometry;
        state.terminal.backend_mut().resize(width, height);
        if full {
            state.full_redraws += 1;
            state.terminal.clear().map_err(terminal_error)?;
        }
        state
            .terminal
            .draw(|frame| frame.render_widget(screen, frame.area()))
            .map_err(terminal_error)?;
        let frame = buffer_text(state.terminal.backend().buffer());
        state.frames.push(frame);
        Ok(())
    }
}

fn buffer_text(buffer: &Buffer) -> String {
    let area = buffer.area;
    (0..area.height)
        .map(|y| {
            let row = (0..area.width)
                .map(|x| buffer[(x, y)].symbol())
                .collect::<String>();
            row.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ProcessSignals;

impl SignalControl for ProcessSignals {
    fn deliver_default(&self, sig: Signal) -> Result<(), MonitorError> {
        let signal_error = |e: nix::errno::Errno| MonitorError::Signal(format!("{sig}: {e}"));
        // SAFETY: installs the default disposition, no handler code involved.
        unsafe { signal(sig, SigHandler::SigDfl) }.map_err(signal_error)?;
        let mut mask = SigSet::empty();
        mask.add(sig);
        mask.thread_unblock().map_err(signal_error)?;
        raise(sig).map_err(signal_error)
    }
}

#[derive(Default, Clone)]
pub struct FakeSignals {
    delivered: Arc<Mutex<Vec<Signal>>>,
}

impl FakeSignals {
    pub fn delivered(&self) -> Vec<Signal> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SignalControl for FakeSignals {
    fn deliver_default(&self, signal: Signal) -> Result<(), MonitorError> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(signal);
        Ok(())
    }
}

/// Everything a run touches outside the process's own memory.
pub struct MonitorRuntime {
    pub display: Box<dyn Display>,
    pub keyboard: Keyboard,
    pub signal_control: Box<dyn SignalControl>,
    pub signals: Vec<Signal>,
    pub diagnostics: Box<dyn Write + Send>,
}

impl MonitorRuntime {
    pub fn production() -> Result<Self, MonitorError> {
        Ok(Self {
            display: Box::new(CrosstermDisplay::new()),
            keyboard: Keyboard::from_stdin()?,
            signal_control: Box::new(ProcessSignals),
            signals: HANDLED_SIGNALS.to_vec(),
            diagnostics: Box::new(std::io::stderr()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Display, FakeDisplay, FakeSignals, SignalControl};
    use crate::screen::VirtualScreen;
    use crate::task::StatusUpdate;
    use nix::sys::signal::Signal;

    #[test]
    fn fake_display_renders_frames_and_counts_transitions() {
        let fake = FakeDisplay::new(30, 3).expect("fake");
        let mut display: Box<dyn Display> = Box::new(fake.clone());
        let mut screen = VirtualScreen::new("Batch", "Press ESC to stop.");
        screen.resize(30, 3);
        screen.apply(0, StatusUpdate::Text("job 1".into()));

        assert!(display.present(&screen, true).is_err(), "inactive display");
        display.enter().expect("enter");
        display.present(&screen, true).expect("present");
        display.leave().expect("leave");
        display.leave().expect("second leave is a no-op");

        assert_eq!(fake.enters(), 1);
        assert_eq!(fake.leaves(), 1);
        assert_eq!(fake.full_redraws(), 1);
        assert_eq!(
            fake.last_frame().as_deref(),
            Some("  Batch. Press ESC to stop.\n\njob 1")
        );
    }

    #[test]
    fn fake_display_follows_geometry_changes() {
        let fake = FakeDisplay::new(30, 3).expect("fake");
        let mut display = fake.clone();
        display.enter().expect("enter");
        fake.set_geometry(20, 2);
        assert_eq!(display.geometry().expect("geometry"), (20, 2));

        let mut screen = VirtualScreen::new("", "help");
        screen.resize(20, 2);
        screen.apply(0, StatusUpdate::Text("bottom".into()));
        display.present(&screen, false).expect("present");
        assert_eq!(fake.last_frame().as_deref(), Some("        help\nbottom"));
    }

    #[test]
    fn fake_signals_record_deliveries() {
        let signals = FakeSignals::default();
        signals.deliver_default(Signal::SIGTSTP).expect("tstp");
        signals.deliver_default(Signal::SIGTERM).expect("term");
        assert_eq!(signals.delivered(), vec![Signal::SIGTSTP, Signal::SIGTERM]);
    }
}
