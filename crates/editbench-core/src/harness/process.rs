//! Process teardown shared by the adapters.

use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

/// How long a child gets to exit after SIGTERM before it is SIGKILLed.
pub(crate) const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Who a termination signal is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    /// The child alone.
    Process,
    /// The process group the child leads, so grandchildren go too.
    Group,
}

/// SIGTERM, wait up to [`TERMINATE_GRACE`], then SIGKILL.
pub(crate) async fn terminate(child: &mut Child, target: Target) {
    let pid = child.id();

    if let Some(pid) = pid {
        if !send_signal(pid, target, Signal::Term) {
            warn!(pid, ?target, "SIGTERM failed, proceeding to SIGKILL");
        }
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(?pid, %status, "agent exited after SIGTERM");
            // The leader is gone but members that ignored SIGTERM may remain.
            if let (Some(pid), Target::Group) = (pid, target) {
                send_signal(pid, Target::Group, Signal::Kill);
            }
        }
        _ => {
            debug!(?pid, "agent did not exit after SIGTERM, sending SIGKILL");
            if let Some(pid) = pid {
                send_signal(pid, target, Signal::Kill);
            }
            let _ = child.kill().await;
        }
    }
}

/// SIGKILL whatever is left in the group led by `pgid`.
///
/// Called after the leader exited on its own. Returns whether anything was
/// still running.
pub(crate) fn kill_group(pgid: u32) -> bool {
    let killed = send_signal(pgid, Target::Group, Signal::Kill);
    if killed {
        debug!(pgid, "killed processes left behind by agent");
    }
    killed
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, target: Target, signal: Signal) -> bool {
    let signal = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill/killpg only deliver a signal; pid is a child we spawned.
    let ret = unsafe {
        match target {
            Target::Process => libc::kill(pid, signal),
            Target::Group => libc::killpg(pid, signal),
        }
    };
    ret == 0
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _target: Target, _signal: Signal) -> bool {
    false
}
