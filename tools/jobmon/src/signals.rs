//! Self-pipe signal bridge.
//!
//! The installed handler does nothing but write the signal number as one
//! byte to a non-blocking pipe; every decision about the signal is made by
//! whoever polls the read end.

use crate::errors::MonitorError;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::pipe2;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Every signal the monitor takes over while it runs.
pub const HANDLED_SIGNALS: [Signal; 16] = [
    Signal::SIGALRM,
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGPIPE,
    Signal::SIGPWR,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGVTALRM,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
    Signal::SIGWINCH,
];

/// Process-wide wakeup target read by the handler. -1 when unset.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

/// Handlers between loading `WAKE_FD` and finishing their write. Teardown
/// waits for this to reach zero before closing the descriptor.
static RELAYS_IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

extern "C" fn relay_signal(signum: libc::c_int) {
    RELAYS_IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let saved = Errno::last_raw();
        let byte = signum as u8;
        // SAFETY: write(2) is async-signal-safe and `byte` outlives the call.
        unsafe {
            libc::write(fd, (&byte as *const u8).cast(), 1);
        }
        Errno::set_raw(saved);
    }
    RELAYS_IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
}

pub struct SignalBridge {
    read: Arc<OwnedFd>,
    write: Option<OwnedFd>,
    previous_target: RawFd,
    previous_actions: Vec<(Signal, SigAction)>,
}

impl SignalBridge {
    pub fn install(signals: &[Signal]) -> Result<Self, MonitorError> {
        let (read, write) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)
            .map_err(|e| MonitorError::Signal(format!("pipe2: {e}")))?;

        let previous_target = WAKE_FD.load(Ordering::SeqCst);
        if previous_target >= 0 {
            return Err(MonitorError::Signal(
                "a signal bridge is already installed".to_string(),
            ));
        }
        WAKE_FD.store(write.as_raw_fd(), Ordering::SeqCst);

        let mut bridge = Self {
            read: Arc::new(read),
            write: Some(write),
            previous_target,
            previous_actions: Vec::with_capacity(signals.len()),
        };
        for &signal in signals {
            let previous = install_relay(signal)?;
            bridge.previous_actions.push((signal, previous));
        }
        Ok(bridge)
    }

    pub fn reader(&self) -> Arc<OwnedFd> {
        Arc::clone(&self.read)
    }

    pub fn handles(&self, signal: Signal) -> bool {
        self.previous_actions.iter().any(|(sig, _)| *sig == signal)
    }

    /// Puts the relay handler back after the signal was handed to its
    /// default disposition.
    pub fn reinstall(&self, signal: Signal) -> Result<(), MonitorError> {
        if !self.handles(signal) {
            return Ok(());
        }
        install_relay(signal).map(|_| ())
    }

    /// Restores prior dispositions and wakeup target, then closes the write
    /// end so a poller on the read end sees hang-up.
    pub fn teardown(&mut self) {
        if self.write.is_none() {
            return;
        }
        for (signal, previous) in self.previous_actions.drain(..).rev() {
            // SAFETY: restoring an action previously returned by sigaction.
            let _ = unsafe { sigaction(signal, &previous) };
        }
        WAKE_FD.store(self.previous_target, Ordering::SeqCst);
        // A handler that loaded the old target on another thread may still
        // be writing to it.
        while RELAYS_IN_FLIGHT.load(Ordering::SeqCst) != 0 {
            std::hint::spin_loop();
        }
        self.write.take();
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn install_relay(signal: Signal) -> Result<SigAction, MonitorError> {
    let action = SigAction::new(
        SigHandler::Handler(relay_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only touches an atomic and calls write(2).
    unsafe { sigaction(signal, &action) }
        .map_err(|e| MonitorError::Signal(format!("sigaction {signal}: {e}")))
}

/// Serializes unit tests that install a bridge.
#[cfg(test)]
pub(crate) static BRIDGE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Maps one byte read from the bridge back to its signal.
pub fn decode_signal(byte: u8) -> Option<Signal> {
    Signal::try_from(i32::from(byte)).ok()
}
