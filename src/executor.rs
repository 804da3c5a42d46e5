use std::env;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{execve, fork, setpgid, ForkResult, Pid};
use tracing::debug;

use crate::error::{LaunchError, Result, ShellError};
use crate::signals::SignalMask;

/// A job's process group. Its id is the leader's pid, so signaling the group
/// reaches the leader and everything it spawned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessGroup(Pid);

impl ProcessGroup {
    pub fn led_by(leader: Pid) -> Self {
        ProcessGroup(leader)
    }

    pub fn id(self) -> Pid {
        self.0
    }

    /// Deliver `sig` to every process in the group. Async-signal-safe.
    pub fn signal(self, sig: Signal) -> nix::Result<()> {
        killpg(self.0, sig)
    }
}

/// Everything the child needs, built before forking so the child does not
/// allocate between `fork` and `execve`.
pub struct Program {
    path: CString,
    argv: Vec<CString>,
    env: Vec<CString>,
    not_found: Vec<u8>,
}

impl Program {
    pub fn prepare(argv: &[String]) -> std::result::Result<Self, LaunchError> {
        let name = argv.first().ok_or_else(|| LaunchError::BadArgument(String::new()))?;
        let bad = || LaunchError::BadArgument(name.clone());

        let path = resolve_path(name).ok_or_else(bad)?;
        let argv = argv
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| bad())?;
        let env = env::vars_os()
            .filter_map(|(k, v)| {
                let mut pair = k.as_bytes().to_vec();
                pair.push(b'=');
                pair.extend_from_slice(v.as_bytes());
                CString::new(pair).ok()
            })
            .collect();
        let not_found = format!("{}: Command not found\n", name).into_bytes();

        Ok(Program { path, argv, env, not_found })
    }
}

/// Look `name` up in `PATH` unless it already names a path.
fn resolve_path(name: &str) -> Option<CString> {
    if !name.contains('/') {
        if let Some(path) = env::var_os("PATH") {
            for dir in env::split_paths(&path) {
                let full_path = dir.join(name);
                if Path::new(&full_path).is_file() {
                    return CString::new(full_path.as_os_str().as_bytes()).ok();
                }
            }
        }
    }
    // Fallback to the name itself; a miss is reported by the child.
    CString::new(name).ok()
}

/// Fork a child that leads its own process group and execs `program`.
///
/// The caller must hold `mask` (job signals blocked) and keep holding it
/// until the returned pid is in the job table.
pub fn spawn(program: &Program, mask: &mut SignalMask) -> Result<Pid> {
    // SAFETY: the shell is single-threaded and the child only makes
    // async-signal-safe calls before execve or _exit.
    match unsafe { fork() }.map_err(ShellError::syscall("fork"))? {
        ForkResult::Child => {
            let _ = mask.restore();
            let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
            let _ = execve(&program.path, &program.argv, &program.env);
            // execve only returns on failure
            unsafe {
                libc::write(libc::STDOUT_FILENO, program.not_found.as_ptr().cast(), program.not_found.len());
                libc::_exit(1);
            }
        }
        ForkResult::Parent { child } => {
            // Also set from this side so the group exists before anyone
            // signals it. EACCES means the child already exec'd.
            match setpgid(child, child) {
                Ok(()) | Err(Errno::EACCES) => {}
                Err(e) => debug!("setpgid({}) from parent: {}", child, e),
            }
            Ok(child)
        }
    }
}
