use log::{info, warn};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
/// Signal plumbing for userbox
///
/// Forced process-group termination for timed-out runs, signal naming for
/// results, and an async-safe shutdown flag so front ends can stop taking
/// work while in-flight runs still release their accounts.
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Global shutdown flag (async-safe atomic)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Last signal received (async-safe atomic)
static SIGNAL_RECEIVED: AtomicI32 = AtomicI32::new(0);

/// Outcome of a forced termination
#[derive(Debug, Default, Clone)]
pub struct KillReport {
    pub group_killed: bool,
    pub leader_killed: bool,
    pub notes: Vec<String>,
}

/// SIGKILL a whole process group, falling back to the leader alone.
///
/// Never a graceful signal: the caller has already decided the run is over.
pub fn kill_process_group(pgid: i32) -> KillReport {
    let mut report = KillReport::default();
    if pgid <= 1 {
        report.notes.push(format!("refusing to signal pgid {}", pgid));
        return report;
    }

    // SAFETY: plain kill(2); a negative pid targets the group created for this run
    let group_rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if group_rc == 0 {
        report.group_killed = true;
        return report;
    }
    report.notes.push(format!(
        "group SIGKILL failed: {}",
        std::io::Error::last_os_error()
    ));

    // SAFETY: as above, single pid
    let leader_rc = unsafe { libc::kill(pgid, libc::SIGKILL) };
    if leader_rc == 0 {
        report.leader_killed = true;
    } else {
        report.notes.push(format!(
            "leader SIGKILL failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    report
}

/// `SIGSEGV`-style name for a signal number
pub fn signal_name(signo: i32) -> String {
    match Signal::try_from(signo) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("SIG{}", signo),
    }
}

/// Signal handler state
pub struct SignalHandler;

impl SignalHandler {
    /// Install SIGINT/SIGTERM/SIGHUP handlers that only raise the shutdown flag.
    /// Call early in main() before any threads are spawned.
    pub fn init() -> Result<Self, String> {
        let action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
            // SAFETY: the handler only touches atomics
            unsafe { signal::sigaction(sig, &action) }
                .map_err(|e| format!("Failed to install {} handler: {}", sig, e))?;
        }

        info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(Self)
    }

    /// Only atomic stores: no allocation, no locks, no I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    /// Signal that was received (0 if none)
    pub fn get_signal(&self) -> i32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }
}

/// Returns false once a shutdown signal has arrived
pub fn should_continue() -> bool {
    let keep_going = !SHUTDOWN_REQUESTED.load(Ordering::SeqCst);
    if !keep_going {
        warn!(
            "Shutdown requested by {}, not starting new work",
            signal_name(SIGNAL_RECEIVED.load(Ordering::SeqCst))
        );
    }
    keep_going
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
        assert_eq!(signal_name(libc::SIGSEGV), "SIGSEGV");
        assert_eq!(signal_name(libc::SIGXFSZ), "SIGXFSZ");
        assert_eq!(signal_name(200), "SIG200");
    }

    #[test]
    fn test_refuses_init_and_own_group_zero() {
        let report = kill_process_group(1);
        assert!(!report.group_killed && !report.leader_killed);
        assert_eq!(report.notes.len(), 1);
        assert!(!kill_process_group(0).group_killed);
    }

    #[test]
    fn test_kill_process_group_reaches_grandchildren() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "sleep 30 & sleep 30; wait"])
            .process_group(0)
            .spawn()
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));

        let report = kill_process_group(child.id() as i32);
        assert!(report.group_killed);

        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_shutdown_flag() {
        let handler = SignalHandler::init().unwrap();
        assert!(!handler.shutdown_requested());
        assert_eq!(handler.get_signal(), 0);
        assert!(should_continue());
    }
}
