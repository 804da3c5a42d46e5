use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::debug;

use crate::builtins::{try_builtin, BuiltinResult};
use crate::error::Result;
use crate::executor::{self, ProcessGroup, Program};
use crate::job::{JobState, JobTable};
use crate::parser::tokenize;
use crate::signals::{self, ChildStatusSource, SignalMask, Waitpid};

/// Owns the job table. Every table mutation happens here on the main flow;
/// the signal handlers only see the published foreground pid.
#[derive(Default)]
pub struct Shell {
    jobs: JobTable,
}

impl Shell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    #[cfg(test)]
    pub(crate) fn jobs_mut(&mut self) -> &mut JobTable {
        &mut self.jobs
    }

    /// Run one input line: a builtin, or an external program.
    pub fn eval(&mut self, line: &str) -> Result<()> {
        let command = tokenize(line);
        if command.argv.is_empty() {
            return Ok(());
        }
        if let BuiltinResult::Handled = try_builtin(&command.argv, self)? {
            return Ok(());
        }

        let cmdline = line.trim_end_matches(['\n', '\r']);
        let program = Program::prepare(&command.argv)?;
        let state = if command.background { JobState::Background } else { JobState::Foreground };

        let mut mask = SignalMask::block_job_signals()?;
        let pid = executor::spawn(&program, &mut mask)?;
        if let Err(e) = self.jobs.add(pid, state, cmdline) {
            // nobody would ever reap or signal it
            let _ = ProcessGroup::led_by(pid).signal(Signal::SIGKILL);
            mask.release()?;
            return Err(e.into());
        }
        self.publish_foreground();
        mask.release()?;

        if command.background {
            if let Some(job) = self.jobs.lookup_by_pid(pid) {
                println!("{}", job.announcement());
            }
            Ok(())
        } else {
            self.wait_foreground(pid)
        }
    }

    /// Block until `pid` is no longer the foreground job: it exited, was
    /// killed, was stopped, or is gone already.
    pub fn wait_foreground(&mut self, pid: Pid) -> Result<()> {
        let mask = SignalMask::block_job_signals()?;
        loop {
            self.reap_with(&mut Waitpid)?;
            match self.jobs.lookup_by_pid(pid) {
                Some(job) if job.state == JobState::Foreground => mask.suspend()?,
                _ => break,
            }
        }
        mask.release()
    }

    /// Apply and report whatever the signal handlers recorded since last time.
    pub fn drain(&mut self) -> Result<()> {
        if signals::take_child_pending() {
            let mask = SignalMask::block_job_signals()?;
            self.reap_with(&mut Waitpid)?;
            mask.release()?;
        }
        Ok(())
    }

    pub(crate) fn set_state(&mut self, pid: Pid, state: JobState) -> Result<()> {
        self.jobs.set_state(pid, state)?;
        self.publish_foreground();
        Ok(())
    }

    fn reap_with(&mut self, source: &mut impl ChildStatusSource) -> Result<()> {
        let notices = signals::reap(&mut self.jobs, source)?;
        self.publish_foreground();
        for notice in notices {
            println!("{}", notice);
        }
        Ok(())
    }

    fn publish_foreground(&self) {
        let fg = self.jobs.foreground_pid();
        debug!(foreground = ?fg, jobs = self.jobs.len(), "job table updated");
        signals::publish_foreground(fg);
    }
}
