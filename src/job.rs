use std::fmt;

use nix::unistd::Pid;
use tracing::debug;

use crate::error::JobError;

/// Maximum number of jobs alive at any point in time.
pub const MAX_JOBS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Only an empty slot is undefined; a live job never is.
    Undefined,
    Foreground,
    Background,
    Stopped,
}

impl JobState {
    /// Name shown by `jobs`.
    pub fn name(self) -> &'static str {
        match self {
            JobState::Background => "Running",
            JobState::Foreground => "Foreground",
            JobState::Stopped => "Stopped",
            JobState::Undefined => "Undefined",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub pid: Pid,
    pub jid: usize,
    pub state: JobState,
    pub cmdline: String,
}

impl Job {
    /// `[jid] (pid) cmdline`, printed when a job is sent to the background.
    pub fn announcement(&self) -> Announcement<'_> {
        Announcement(self)
    }
}

/// `[jid] (pid) State cmdline`, one line of `jobs` output.
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({}) {} {}", self.jid, self.pid, self.state.name(), self.cmdline)
    }
}

pub struct Announcement<'a>(&'a Job);

impl fmt::Display for Announcement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({}) {}", self.0.jid, self.0.pid, self.0.cmdline)
    }
}

/// Fixed-capacity job registry. An empty slot is `None`; deleting a job
/// clears its slot entirely so it can be reused.
pub struct JobTable {
    slots: [Option<Job>; MAX_JOBS],
    next_jid: usize, // starts at 1; wraps past MAX_JOBS; re-derived on delete
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self { slots: std::array::from_fn(|_| None), next_jid: 1 }
    }

    /// Register a freshly launched process group and return its job id.
    pub fn add(&mut self, pid: Pid, state: JobState, cmdline: &str) -> Result<usize, JobError> {
        if pid.as_raw() < 1 {
            return Err(JobError::InvalidPid(pid.as_raw()));
        }
        if state == JobState::Undefined {
            return Err(JobError::InvalidState);
        }
        if state == JobState::Foreground {
            if let Some(fg) = self.foreground_pid() {
                return Err(JobError::ForegroundTaken(fg.as_raw()));
            }
        }
        let jid = self.allocate_jid();
        let slot = self.slots.iter_mut().find(|s| s.is_none()).ok_or(JobError::TableFull)?;
        *slot = Some(Job { pid, jid, state, cmdline: cmdline.to_string() });

        self.next_jid = jid + 1;
        if self.next_jid > MAX_JOBS {
            self.next_jid = 1;
        }
        debug!("Added job [{}] {} {}", jid, pid, cmdline);
        Ok(jid)
    }

    pub fn delete(&mut self, pid: Pid) -> Result<Job, JobError> {
        if pid.as_raw() < 1 {
            return Err(JobError::InvalidPid(pid.as_raw()));
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|j| j.pid == pid))
            .ok_or(JobError::NotFound(pid.as_raw()))?;
        let job = slot.take().ok_or(JobError::NotFound(pid.as_raw()))?;
        self.next_jid = self.max_jid() + 1;
        Ok(job)
    }

    pub fn lookup_by_pid(&self, pid: Pid) -> Option<&Job> {
        if pid.as_raw() < 1 {
            return None;
        }
        self.iter().find(|j| j.pid == pid)
    }

    pub fn lookup_by_pid_mut(&mut self, pid: Pid) -> Option<&mut Job> {
        if pid.as_raw() < 1 {
            return None;
        }
        self.slots.iter_mut().flatten().find(|j| j.pid == pid)
    }

    pub fn lookup_by_jid(&self, jid: usize) -> Option<&Job> {
        if jid < 1 {
            return None;
        }
        self.iter().find(|j| j.jid == jid)
    }

    /// Pid of the one `Foreground` job, if any.
    pub fn foreground_pid(&self) -> Option<Pid> {
        self.iter().find(|j| j.state == JobState::Foreground).map(|j| j.pid)
    }

    /// Live jobs in slot order. Call again to restart.
    pub fn list(&self) -> impl Iterator<Item = &Job> + '_ {
        self.iter()
    }

    /// Move a job to `state`, demoting any other foreground job so at most
    /// one job is ever `Foreground`.
    pub fn set_state(&mut self, pid: Pid, state: JobState) -> Result<(), JobError> {
        if state == JobState::Undefined {
            return Err(JobError::InvalidState);
        }
        if self.lookup_by_pid(pid).is_none() {
            return Err(JobError::NotFound(pid.as_raw()));
        }
        if state == JobState::Foreground {
            for job in self.slots.iter_mut().flatten() {
                if job.pid != pid && job.state == JobState::Foreground {
                    job.state = JobState::Background;
                }
            }
        }
        if let Some(job) = self.lookup_by_pid_mut(pid) {
            job.state = state;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    fn iter(&self) -> impl Iterator<Item = &Job> + '_ {
        self.slots.iter().flatten()
    }

    fn max_jid(&self) -> usize {
        self.iter().map(|j| j.jid).max().unwrap_or(0)
    }

    fn allocate_jid(&self) -> usize {
        let mut jid = self.next_jid;
        // Bounded: a full table is rejected by the caller, so at most
        // MAX_JOBS - 1 ids are taken and one of 1..=MAX_JOBS is free.
        for _ in 0..=MAX_JOBS {
            if self.lookup_by_jid(jid).is_none() {
                return jid;
            }
            jid += 1;
            if jid > MAX_JOBS {
                jid = 1;
            }
        }
        jid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    #[test]
    fn add_assigns_sequential_jids_in_first_free_slot() {
        let mut jobs = JobTable::new();
        assert_eq!(jobs.add(pid(100), JobState::Background, "sleep 5 &").unwrap(), 1);
        assert_eq!(jobs.add(pid(101), JobState::Foreground, "sleep 9").unwrap(), 2);
        assert_eq!(jobs.lookup_by_jid(2).unwrap().pid, pid(101));
        assert_eq!(jobs.foreground_pid(), Some(pid(101)));
    }

    #[test]
    fn add_rejects_non_positive_pid() {
        let mut jobs = JobTable::new();
        assert_eq!(jobs.add(pid(0), JobState::Background, "x"), Err(JobError::InvalidPid(0)));
        assert_eq!(jobs.add(pid(-3), JobState::Background, "x"), Err(JobError::InvalidPid(-3)));
        assert_eq!(jobs.add(pid(5), JobState::Undefined, "x"), Err(JobError::InvalidState));
        assert_eq!(jobs.len(), 0);
    }

    #[test]
    fn second_foreground_job_is_rejected() {
        let mut jobs = JobTable::new();
        jobs.add(pid(10), JobState::Foreground, "sleep 9").unwrap();
        assert_eq!(jobs.add(pid(11), JobState::Foreground, "sleep 8"), Err(JobError::ForegroundTaken(10)));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs.foreground_pid(), Some(pid(10)));
        // background jobs are still accepted alongside it
        assert_eq!(jobs.add(pid(11), JobState::Background, "sleep 8 &").unwrap(), 2);
    }

    #[test]
    fn seventeenth_job_fails_and_leaves_table_intact() {
        let mut jobs = JobTable::new();
        for i in 0..MAX_JOBS as i32 {
            jobs.add(pid(1000 + i), JobState::Background, "sleep 100 &").unwrap();
        }
        let before: Vec<Job> = jobs.list().cloned().collect();

        assert_eq!(jobs.add(pid(5000), JobState::Background, "one too many"), Err(JobError::TableFull));

        let after: Vec<Job> = jobs.list().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn delete_clears_slot_and_rederives_next_jid() {
        let mut jobs = JobTable::new();
        jobs.add(pid(10), JobState::Background, "a").unwrap();
        jobs.add(pid(11), JobState::Background, "b").unwrap();
        jobs.add(pid(12), JobState::Background, "c").unwrap();

        let gone = jobs.delete(pid(12)).unwrap();
        assert_eq!(gone.jid, 3);
        assert!(jobs.lookup_by_pid(pid(12)).is_none());
        // max live jid is 2, so the next one is 3 again
        assert_eq!(jobs.add(pid(13), JobState::Background, "d").unwrap(), 3);
        // the freed slot was the third one
        assert_eq!(jobs.list().nth(2).unwrap().pid, pid(13));
    }

    #[test]
    fn delete_unknown_pid_reports_not_found() {
        let mut jobs = JobTable::new();
        jobs.add(pid(10), JobState::Background, "a").unwrap();
        assert_eq!(jobs.delete(pid(99)), Err(JobError::NotFound(99)));
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn lookups_treat_non_positive_ids_as_invalid() {
        let mut jobs = JobTable::new();
        jobs.add(pid(10), JobState::Background, "a").unwrap();
        assert!(jobs.lookup_by_pid(pid(0)).is_none());
        assert!(jobs.lookup_by_pid(pid(-10)).is_none());
        assert!(jobs.lookup_by_jid(0).is_none());
    }

    #[test]
    fn wrapped_jid_skips_ids_still_alive() {
        let mut jobs = JobTable::new();
        for i in 0..MAX_JOBS as i32 {
            jobs.add(pid(100 + i), JobState::Background, "x").unwrap();
        }
        // keep jids 1 and 16 alive
        for i in 1..(MAX_JOBS as i32 - 1) {
            jobs.delete(pid(100 + i)).unwrap();
        }
        assert_eq!(jobs.add(pid(500), JobState::Background, "y").unwrap(), 17);
        // next_jid wrapped to 1, which is taken
        assert_eq!(jobs.add(pid(501), JobState::Background, "z").unwrap(), 2);
    }

    #[test]
    fn set_state_keeps_a_single_foreground_job() {
        let mut jobs = JobTable::new();
        jobs.add(pid(10), JobState::Foreground, "a").unwrap();
        jobs.add(pid(11), JobState::Stopped, "b").unwrap();
        jobs.set_state(pid(11), JobState::Foreground).unwrap();
        assert_eq!(jobs.foreground_pid(), Some(pid(11)));
        assert_eq!(jobs.lookup_by_pid(pid(10)).unwrap().state, JobState::Background);
        assert_eq!(jobs.set_state(pid(77), JobState::Stopped), Err(JobError::NotFound(77)));
        assert_eq!(jobs.set_state(pid(11), JobState::Undefined), Err(JobError::InvalidState));
    }

    #[test]
    fn list_renders_state_names() {
        let mut jobs = JobTable::new();
        jobs.add(pid(10), JobState::Background, "sleep 5 &").unwrap();
        jobs.add(pid(11), JobState::Stopped, "sleep 6").unwrap();
        let lines: Vec<String> = jobs.list().map(|j| j.to_string()).collect();
        assert_eq!(lines, vec!["[1] (10) Running sleep 5 &", "[2] (11) Stopped sleep 6"]);
        // restartable
        assert_eq!(jobs.list().count(), 2);
        assert_eq!(jobs.lookup_by_jid(1).unwrap().announcement().to_string(), "[1] (10) sleep 5 &");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            Add(i32, u8),
            Delete(i32),
            Promote(i32),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1..40i32, 0..3u8).prop_map(|(p, s)| Op::Add(p, s)),
                (1..40i32).prop_map(Op::Delete),
                (1..40i32).prop_map(Op::Promote),
            ]
        }

        proptest! {
            #[test]
            fn table_invariants_hold(ops in prop::collection::vec(op(), 0..200)) {
                let mut jobs = JobTable::new();
                for op in ops {
                    match op {
                        Op::Add(p, s) => {
                            if jobs.lookup_by_pid(pid(p)).is_some() {
                                continue;
                            }
                            let state = match s {
                                0 => JobState::Background,
                                1 => JobState::Stopped,
                                _ => JobState::Foreground,
                            };
                            let fg_taken = state == JobState::Foreground && jobs.foreground_pid().is_some();
                            let full = jobs.len() == MAX_JOBS;
                            prop_assert_eq!(jobs.add(pid(p), state, "cmd").is_err(), full || fg_taken);
                        }
                        Op::Delete(p) => { let _ = jobs.delete(pid(p)); }
                        Op::Promote(p) => { let _ = jobs.set_state(pid(p), JobState::Foreground); }
                    }

                    let fg = jobs.list().filter(|j| j.state == JobState::Foreground).count();
                    prop_assert!(fg <= 1);

                    let mut jids: Vec<usize> = jobs.list().map(|j| j.jid).collect();
                    let mut pids: Vec<i32> = jobs.list().map(|j| j.pid.as_raw()).collect();
                    let n = jids.len();
                    jids.sort_unstable();
                    jids.dedup();
                    pids.sort_unstable();
                    pids.dedup();
                    prop_assert_eq!(jids.len(), n);
                    prop_assert_eq!(pids.len(), n);
                }
            }
        }
    }
}
