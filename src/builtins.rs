use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::debug;

use crate::error::{BuiltinError, Result};
use crate::executor::ProcessGroup;
use crate::job::{JobState, JobTable};
use crate::shell::Shell;
use crate::signals::SignalMask;

pub enum BuiltinResult {
    Handled,
    NotHandled,
}

/// What `fg`/`bg` was pointed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobRef {
    Jid(usize),
    Pid(Pid),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resume {
    Foreground,
    Background,
}

impl Resume {
    fn name(self) -> &'static str {
        match self {
            Resume::Foreground => "fg",
            Resume::Background => "bg",
        }
    }
}

pub fn try_builtin(tokens: &[String], shell: &mut Shell) -> Result<BuiltinResult> {
    if tokens.is_empty() {
        return Ok(BuiltinResult::NotHandled);
    }
    match tokens[0].as_str() {
        "quit" => builtin_quit(),
        "jobs" => builtin_jobs(shell.jobs()),
        "fg" => do_bgfg(Resume::Foreground, &tokens[1..], shell)?,
        "bg" => do_bgfg(Resume::Background, &tokens[1..], shell)?,
        _ => return Ok(BuiltinResult::NotHandled),
    }
    Ok(BuiltinResult::Handled)
}

fn builtin_quit() -> ! {
    std::process::exit(0);
}

fn builtin_jobs(jobs: &JobTable) {
    for job in jobs.list() {
        println!("{}", job);
    }
}

/// Parse `%<jid>` or `<pid>`.
pub fn parse_job_ref(cmd: &'static str, args: &[String]) -> std::result::Result<JobRef, BuiltinError> {
    let arg = args.first().ok_or(BuiltinError::MissingTarget { cmd })?;
    let bad = BuiltinError::BadTarget { cmd };
    match arg.strip_prefix('%') {
        Some(jid) if !jid.bytes().all(|b| b.is_ascii_digit()) => Err(bad),
        Some(jid) => match jid.parse::<usize>() {
            Ok(jid) if jid > 0 => Ok(JobRef::Jid(jid)),
            _ => Err(bad),
        },
        None if !arg.bytes().all(|b| b.is_ascii_digit()) => Err(bad),
        None => match arg.parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(JobRef::Pid(Pid::from_raw(pid))),
            _ => Err(bad),
        },
    }
}

/// The live job `target` names, or the matching not-found error.
pub fn resolve(jobs: &JobTable, target: JobRef) -> std::result::Result<Pid, BuiltinError> {
    match target {
        JobRef::Jid(jid) => jobs.lookup_by_jid(jid).map(|j| j.pid).ok_or(BuiltinError::NoSuchJob(jid)),
        JobRef::Pid(pid) => jobs.lookup_by_pid(pid).map(|j| j.pid).ok_or(BuiltinError::NoSuchProcess(pid.as_raw())),
    }
}

fn do_bgfg(how: Resume, args: &[String], shell: &mut Shell) -> Result<()> {
    let target = parse_job_ref(how.name(), args)?;

    let mask = SignalMask::block_job_signals()?;
    let pid = resolve(shell.jobs(), target)?;

    // Continue the whole group even if the job is already running.
    let group = ProcessGroup::led_by(pid);
    if let Err(e) = group.signal(Signal::SIGCONT) {
        debug!("SIGCONT to group {}: {}", group.id(), e);
    }

    match how {
        Resume::Foreground => {
            shell.set_state(pid, JobState::Foreground)?;
            mask.release()?;
            shell.wait_foreground(pid)
        }
        Resume::Background => {
            shell.set_state(pid, JobState::Background)?;
            if let Some(job) = shell.jobs().lookup_by_pid(pid) {
                println!("{}", job.announcement());
            }
            mask.release()
        }
    }
}
