use crate::errors::MonitorError;
use crate::signals::decode_signal;
use crate::state::Shared;
use crate::task::Task;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use nix::unistd::{dup, read};
use serde_json::json;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const ESC: u8 = 0x1b;
const FORM_FEED: u8 = 0x0c;

/// Non-blocking handle on the keyboard. The descriptor's original flags are
/// put back when the last holder drops it.
pub struct Keyboard {
    fd: OwnedFd,
    original_flags: Option<OFlag>,
}

impl Keyboard {
    pub fn from_stdin() -> Result<Self, MonitorError> {
        let stdin = std::io::stdin();
        let fd = dup(stdin.as_raw_fd()).map_err(|e| MonitorError::Io(format!("dup stdin: {e}")))?;
        // SAFETY: dup returned a fresh descriptor that nothing else owns.
        Self::new(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    pub fn new(fd: OwnedFd) -> Result<Self, MonitorError> {
        let bits = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)
            .map_err(|e| MonitorError::Io(format!("F_GETFL: {e}")))?;
        let original = OFlag::from_bits_truncate(bits);
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(original | OFlag::O_NONBLOCK))
            .map_err(|e| MonitorError::Io(format!("F_SETFL: {e}")))?;
        Ok(Self {
            fd,
            original_flags: Some(original),
        })
    }

    pub fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Keyboard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for Keyboard {
    fn drop(&mut self) {
        if let Some(flags) = self.original_flags.take() {
            let _ = fcntl(self.fd.as_raw_fd(), FcntlArg::F_SETFL(flags));
        }
    }
}

/// Escape, `q`/`Q` and end-of-input stop the run; form feed repaints.
pub fn key_task(byte: Option<u8>) -> Option<Task> {
    match byte {
        None | Some(ESC) | Some(b'q') | Some(b'Q') => Some(Task::Exit(None)),
        Some(FORM_FEED) => Some(Task::Redraw),
        Some(_) => None,
    }
}

pub fn signal_task(signal: Signal) -> Task {
    match signal {
        Signal::SIGWINCH => Task::Redraw,
        Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU => Task::Suspend(signal),
        other => Task::Exit(Some(other)),
    }
}

enum Drained {
    Open,
    Closed,
}

/// Reads every byte currently available, feeding each to `each`.
fn drain(fd: RawFd, mut each: impl FnMut(Option<u8>)) -> Drained {
    let mut buf = [0u8; 64];
    loop {
        match read(fd, &mut buf) {
            Ok(0) => {
                each(None);
                return Drained::Closed;
            }
            Ok(n) => buf[..n].iter().for_each(|b| each(Some(*b))),
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => return Drained::Open,
            // A hung-up tty reads as EIO; treat any hard error as end-of-input.
            Err(_) => {
                each(None);
                return Drained::Closed;
            }
        }
    }
}

/// Throws away whatever is buffered on a descriptor.
pub fn discard_pending(fd: RawFd) {
    let _ = drain(fd, |_| {});
}

pub(crate) fn spawn_input_thread(
    shared: Arc<Shared>,
    keyboard: Arc<Keyboard>,
    signals: Arc<OwnedFd>,
) -> Result<JoinHandle<()>, MonitorError> {
    thread::Builder::new()
        .name("monitor-input".to_string())
        .spawn(move || input_loop(&shared, &keyboard, &signals))
        .map_err(|e| MonitorError::Io(format!("spawn input thread: {e}")))
}

fn input_loop(shared: &Shared, keyboard: &Keyboard, signals: &OwnedFd) {
    let mut keyboard_open = true;
    loop {
        let mut fds = vec![PollFd::new(signals.as_fd(), PollFlags::POLLIN)];
        if keyboard_open {
            fds.push(PollFd::new(keyboard.as_fd(), PollFlags::POLLIN));
        }
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            // EBADF and friends only happen while the monitor is torn down.
            Err(_) => return,
        }

        let signal_events = fds[0].revents().unwrap_or(PollFlags::empty());
        let keyboard_events = fds
            .get(1)
            .and_then(|fd| fd.revents())
            .unwrap_or(PollFlags::empty());
        drop(fds);

        if keyboard_events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
            let state = drain(keyboard.raw(), |byte| {
                if let Some(task) = key_task(byte) {
                    shared.push(task);
                }
            });
            if let Drained::Closed = state {
                shared.log("info", "keyboard_closed", json!({}));
                keyboard_open = false;
            }
        }
        if keyboard_events.contains(PollFlags::POLLNVAL) {
            keyboard_open = false;
        }

        if signal_events.contains(PollFlags::POLLIN) {
            let state = drain(signals.as_raw_fd(), |byte| {
                if let Some(signal) = byte.and_then(decode_signal) {
                    shared.log("info", "signal", json!({ "signal": signal.as_str() }));
                    shared.push(signal_task(signal));
                }
            });
            if let Drained::Closed = state {
                return;
            }
        } else if signal_events.intersects(PollFlags::POLLHUP | PollFlags::POLLNVAL | PollFlags::POLLERR) {
            return;
        }
    }
}
