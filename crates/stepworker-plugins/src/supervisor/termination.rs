//! Child termination: SIGTERM, a grace period, then SIGKILL.

use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use super::SUPERVISOR_TARGET;

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Asks `child` to stop and kills it if it outlives `grace`. Always reaps.
pub(super) fn terminate(name: &str, child: &mut Child, grace: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(target: SUPERVISOR_TARGET, plugin = name, ?status, "plugin already exited");
            return;
        }
        Ok(None) => {}
        Err(error) => {
            warn!(
                target: SUPERVISOR_TARGET,
                plugin = name,
                error = %error,
                "failed to check plugin status, killing"
            );
            kill_and_reap(name, child);
            return;
        }
    }

    send_sigterm(name, child);
    if let Some(status) = wait_for_exit(child, grace) {
        info!(target: SUPERVISOR_TARGET, plugin = name, ?status, "plugin terminated");
        return;
    }
    warn!(
        target: SUPERVISOR_TARGET,
        plugin = name,
        grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
        "plugin ignored SIGTERM, killing"
    );
    kill_and_reap(name, child);
}

/// Kills `child` without a grace period and reaps it.
pub(super) fn kill_and_reap(name: &str, child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!(target: SUPERVISOR_TARGET, plugin = name, error = %error, "kill failed");
    }
    match child.wait() {
        Ok(status) => debug!(target: SUPERVISOR_TARGET, plugin = name, ?status, "plugin reaped"),
        Err(error) => warn!(
            target: SUPERVISOR_TARGET,
            plugin = name,
            error = %error,
            "failed to reap plugin"
        ),
    }
}

/// Polls `child` until it exits or `timeout` elapses.
pub(super) fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
            Ok(None) | Err(_) => return None,
        }
    }
}

fn send_sigterm(name: &str, child: &Child) {
    let Ok(raw) = i32::try_from(child.id()) else {
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => debug!(target: SUPERVISOR_TARGET, plugin = name, pid = raw, "sent SIGTERM"),
        Err(errno) => debug!(
            target: SUPERVISOR_TARGET,
            plugin = name,
            pid = raw,
            error = %errno,
            "SIGTERM failed"
        ),
    }
}
