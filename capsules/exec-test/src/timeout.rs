use std::io;
use std::process::{Child, ExitStatus};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Time a process group gets between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Request timeout when present and nonzero, otherwise the harness default.
pub fn effective_timeout_seconds(requested: Option<u64>, default_seconds: u64) -> u64 {
    match requested {
        Some(seconds) if seconds > 0 => seconds,
        _ => default_seconds,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    timeout_seconds: u64,
    grace: Duration,
}

impl Deadline {
    pub fn new(timeout_seconds: u64, grace: Duration) -> Self {
        Self {
            timeout_seconds,
            grace,
        }
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }
}

#[derive(Debug)]
pub enum WaitOutcome {
    Exited(ExitStatus),
    Expired,
}

/// Block until `child` exits or the deadline passes, counting from now.
pub fn wait_with_deadline(child: &mut Child, deadline: &Deadline) -> io::Result<WaitOutcome> {
    match child.wait_timeout(deadline.timeout())? {
        Some(status) => Ok(WaitOutcome::Exited(status)),
        None => Ok(WaitOutcome::Expired),
    }
}

/// Terminate the process group led by `child` and reap the leader.
///
/// SIGTERM goes to the whole group first. After `grace`, SIGKILL is sent to
/// the group regardless of whether the leader exited, so members that ignored
/// SIGTERM do not outlive the call. Descendants that moved themselves into
/// another group or session are out of reach.
pub fn terminate_group(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    let pgid = child.id();
    signal_group(child, GroupSignal::Terminate);

    match child.wait_timeout(grace) {
        Ok(Some(status)) => debug!(pgid, %status, "process group leader exited after SIGTERM"),
        Ok(None) => warn!(
            pgid,
            grace_ms = grace.as_millis() as u64,
            "process group leader ignored SIGTERM"
        ),
        Err(err) => warn!(pgid, error = %err, "waiting on terminated process group failed"),
    }

    signal_group(child, GroupSignal::Kill);
    child.wait()
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: GroupSignal) {
    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    // ESRCH just means the group is already gone.
    unsafe {
        let _ = libc::kill(-pgid, signal);
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, signal: GroupSignal) {
    if let GroupSignal::Kill = signal {
        let _ = child.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Instant;

    #[test]
    fn request_timeout_overrides_default() {
        assert_eq!(effective_timeout_seconds(Some(5), 300), 5);
        assert_eq!(effective_timeout_seconds(Some(0), 300), 300);
        assert_eq!(effective_timeout_seconds(None, 300), 300);
    }

    #[test]
    fn deadline_reports_seconds() {
        let deadline = Deadline::new(3, Duration::from_millis(250));
        assert_eq!(deadline.timeout(), Duration::from_secs(3));
        assert_eq!(deadline.timeout_seconds(), 3);
        assert_eq!(deadline.grace(), Duration::from_millis(250));
    }

    #[cfg(unix)]
    #[test]
    fn expired_group_is_terminated() {
        use std::os::unix::process::CommandExt;

        let mut child = Command::new("/bin/sh")
            .args(["-c", "sleep 30"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();

        let deadline = Deadline::new(1, Duration::from_millis(200));
        let start = Instant::now();
        let outcome = wait_with_deadline(&mut child, &deadline).unwrap();
        assert!(matches!(outcome, WaitOutcome::Expired));

        let status = terminate_group(&mut child, deadline.grace()).unwrap();
        assert!(!status.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn fast_exit_beats_deadline() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "exit 3"])
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        let deadline = Deadline::new(10, DEFAULT_TERMINATION_GRACE);
        match wait_with_deadline(&mut child, &deadline).unwrap() {
            WaitOutcome::Exited(status) => assert_eq!(status.code(), Some(3)),
            WaitOutcome::Expired => panic!("expected exit before deadline"),
        }
    }
}
