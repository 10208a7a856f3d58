//! Signals to a downloader and the helpers it spawns.
//!
//! On Unix the child leads its own process group, so every signal goes to the
//! whole group (yt-dlp plus any ffmpeg it started). Elsewhere suspension is
//! unavailable and termination falls back to killing the child handle.

use std::io;

/// What to deliver to a running downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop in place (SIGSTOP).
    Suspend,
    /// Continue after `Suspend` (SIGCONT).
    Resume,
    /// Ask to exit (SIGCONT then SIGTERM, so a stopped group can act on it).
    Terminate,
    /// Force exit (SIGKILL).
    Kill,
}

/// Whether [`Signal::Suspend`] can work on this platform.
pub fn suspend_supported() -> bool {
    cfg!(unix)
}

/// Signal target for one spawned downloader.
#[derive(Debug, Clone, Copy)]
pub struct ProcessSignals {
    pid: Option<u32>,
}

impl ProcessSignals {
    pub(crate) fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Deliver `signal`. A process that is already gone is not an error.
    pub fn send(&self, signal: Signal) -> io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        imp::send(pid, signal)
    }
}

#[cfg(unix)]
mod imp {
    use super::Signal;
    use std::io;

    fn kill_group(pid: u32, sig: libc::c_int) -> io::Result<()> {
        let pgid = pid as libc::pid_t;
        // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
        // addresses the process group the child was spawned into.
        let rc = unsafe { libc::kill(-pgid, sig) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    pub(super) fn send(pid: u32, signal: Signal) -> io::Result<()> {
        match signal {
            Signal::Suspend => kill_group(pid, libc::SIGSTOP),
            Signal::Resume => kill_group(pid, libc::SIGCONT),
            Signal::Terminate => {
                kill_group(pid, libc::SIGCONT)?;
                kill_group(pid, libc::SIGTERM)
            }
            Signal::Kill => kill_group(pid, libc::SIGKILL),
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::Signal;
    use std::io;

    pub(super) fn send(_pid: u32, signal: Signal) -> io::Result<()> {
        match signal {
            Signal::Suspend | Signal::Resume => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "process suspension is not supported on this platform",
            )),
            // The supervisor kills the child handle directly.
            Signal::Terminate | Signal::Kill => Ok(()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_process_is_not_an_error() {
        // No such process group; ESRCH is swallowed.
        let signals = ProcessSignals::new(Some(i32::MAX as u32 - 7));
        signals.send(Signal::Terminate).unwrap();
        ProcessSignals::new(None).send(Signal::Kill).unwrap();
    }

    #[test]
    fn suspend_is_available_on_unix() {
        assert!(suspend_supported());
    }
}
