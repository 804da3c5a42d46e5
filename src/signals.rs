//! Signal routing.
//!
//! The handlers installed here only touch atomics or make async-signal-safe
//! calls (`kill`, `write`, `_exit`). Reaping and every job-table update run on
//! the main flow in [`reap`], driven by the `CHILD_PENDING` fact the SIGCHLD
//! handler records.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, error};

use crate::error::{Result, ShellError};
use crate::executor::ProcessGroup;
use crate::job::{JobState, JobTable};

/// Process-group id of the foreground job, 0 when there is none.
static FOREGROUND: AtomicI32 = AtomicI32::new(0);
static CHILD_PENDING: AtomicBool = AtomicBool::new(false);

const QUIT_MESSAGE: &[u8] = b"Terminating after receipt of SIGQUIT signal\n";
const NO_FOREGROUND_MESSAGE: &[u8] = b"There are no foreground jobs currently\n";

/// The signals whose handlers read or lead to changes of the job table.
pub fn job_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTSTP);
    set
}

pub fn install() -> Result<()> {
    let handlers: [(Signal, extern "C" fn(libc::c_int)); 4] = [
        (Signal::SIGINT, on_interrupt),
        (Signal::SIGTSTP, on_stop),
        (Signal::SIGCHLD, on_child),
        (Signal::SIGQUIT, on_quit),
    ];
    for (sig, handler) in handlers {
        let action = SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, SigSet::empty());
        unsafe { signal::sigaction(sig, &action) }.map_err(ShellError::syscall("Signal"))?;
    }
    Ok(())
}

/// Mirror the table's foreground job for the interrupt and stop handlers.
pub fn publish_foreground(pid: Option<Pid>) {
    FOREGROUND.store(pid.map_or(0, Pid::as_raw), Ordering::SeqCst);
}

pub fn take_child_pending() -> bool {
    CHILD_PENDING.swap(false, Ordering::SeqCst)
}

extern "C" fn on_child(_sig: libc::c_int) {
    CHILD_PENDING.store(true, Ordering::SeqCst);
}

extern "C" fn on_interrupt(_sig: libc::c_int) {
    forward_to_foreground(Signal::SIGINT);
}

extern "C" fn on_stop(_sig: libc::c_int) {
    forward_to_foreground(Signal::SIGTSTP);
}

extern "C" fn on_quit(_sig: libc::c_int) {
    raw_write(QUIT_MESSAGE);
    unsafe { libc::_exit(1) }
}

/// Unbuffered write to stdout; safe to call from a handler.
fn raw_write(msg: &[u8]) {
    unsafe {
        libc::write(libc::STDOUT_FILENO, msg.as_ptr().cast(), msg.len());
    }
}

fn forward_to_foreground(sig: Signal) {
    let saved = Errno::last_raw();
    match FOREGROUND.load(Ordering::SeqCst) {
        // Reported right away, even while the main flow sits in `read`.
        0 => raw_write(NO_FOREGROUND_MESSAGE),
        pgid => {
            // The resulting exit or stop is picked up by `reap`.
            let _ = ProcessGroup::led_by(Pid::from_raw(pgid)).signal(sig);
        }
    }
    Errno::set_raw(saved);
}

/// Blocks [`job_signals`] until released or dropped, then restores the
/// previous mask.
pub struct SignalMask {
    previous: SigSet,
    active: bool,
}

impl SignalMask {
    pub fn block_job_signals() -> Result<Self> {
        let mut previous = SigSet::empty();
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&job_signals()), Some(&mut previous))
            .map_err(ShellError::syscall("Sigprocmask"))?;
        Ok(Self { previous, active: true })
    }

    /// Sleep until a handled signal arrives, with the pre-block mask in place.
    pub fn suspend(&self) -> Result<()> {
        let res = unsafe { libc::sigsuspend(self.previous.as_ref()) };
        match Errno::result(res) {
            Ok(_) | Err(Errno::EINTR) => Ok(()),
            Err(e) => Err(ShellError::Syscall { op: "Sigsuspend", source: e }),
        }
    }

    /// Restore the previous mask. Also used by a freshly forked child.
    pub fn restore(&mut self) -> Result<()> {
        if self.active {
            signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None)
                .map_err(ShellError::syscall("Sigprocmask"))?;
            self.active = false;
        }
        Ok(())
    }

    pub fn release(mut self) -> Result<()> {
        self.restore()
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            // continuing with job signals stuck blocked is not safe
            error!("{e}");
            std::process::exit(1);
        }
    }
}

/// Something that reports child state changes without blocking.
pub trait ChildStatusSource {
    /// The next pending change, or `None` when nothing is pending.
    fn next_change(&mut self) -> Result<Option<WaitStatus>>;
}

/// `waitpid(-1, WNOHANG | WUNTRACED)`.
pub struct Waitpid;

impl ChildStatusSource for Waitpid {
    fn next_change(&mut self) -> Result<Option<WaitStatus>> {
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED;
        loop {
            match waitpid(None::<Pid>, Some(flags)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return Ok(None),
                Ok(status) => return Ok(Some(status)),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ShellError::Syscall { op: "waitpid", source: e }),
            }
        }
    }
}

/// A reaped state change the main flow reports to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Terminated { jid: usize, pid: Pid, signal: Signal },
    Stopped { jid: usize, pid: Pid, signal: Signal },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Terminated { jid, pid, signal } => {
                write!(f, "Job [{}] ({}) terminated by signal {}", jid, pid, *signal as i32)
            }
            Notice::Stopped { jid, pid, signal } => {
                write!(f, "Job [{}] ({}) stopped by signal {}", jid, pid, *signal as i32)
            }
        }
    }
}

/// Drain every pending child state change into the job table.
///
/// Exited jobs are deleted, jobs killed by a signal are reported and deleted,
/// stopped jobs are reported and kept as `Stopped`. Children the table does
/// not know are reaped and ignored.
pub fn reap(jobs: &mut JobTable, source: &mut impl ChildStatusSource) -> Result<Vec<Notice>> {
    let mut notices = Vec::new();
    while let Some(status) = source.next_change()? {
        match status {
            WaitStatus::Exited(pid, code) => {
                if jobs.delete(pid).is_err() {
                    debug!("untracked child {} exited with {}", pid, code);
                }
            }
            WaitStatus::Signaled(pid, signal, _) => match jobs.delete(pid) {
                Ok(job) => notices.push(Notice::Terminated { jid: job.jid, pid, signal }),
                Err(_) => debug!("untracked child {} killed by {}", pid, signal),
            },
            WaitStatus::Stopped(pid, signal) => match jobs.lookup_by_pid_mut(pid) {
                Some(job) => {
                    job.state = JobState::Stopped;
                    notices.push(Notice::Stopped { jid: job.jid, pid, signal });
                }
                None => debug!("untracked child {} stopped by {}", pid, signal),
            },
            other => debug!("ignoring child status {:?}", other),
        }
    }
    Ok(notices)
}
