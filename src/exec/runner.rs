//! Sandbox runner.
//!
//! Launches the generated script as the disposable account, inside a
//! transient scope when one is available, under a wall-clock deadline.
//! stdout and stderr share one socket so the collector sees a single
//! combined stream.

use crate::config::config::{EngineConfig, ScopeConfig};
use crate::config::types::{
    ExecPhase, GeneratedScript, RawExecResult, ResourceLimits, Result, SandboxError,
    SandboxIdentity,
};
use crate::judge::script::{PHASE_FD, RUN_PHASE_TOKEN};
use crate::kernel::scope::{
    available_scope, scoped_command, unscoped_command, CgroupVersion, LaunchCommand,
};
use crate::kernel::signal::kill_process_group;
use crate::utils::output::{CombinedOutputCollector, OutputIntegrity, OutputLimits};
use log::{debug, info, warn};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Seam between the orchestrator and process launching
pub trait SandboxLauncher: Send + Sync {
    fn run(
        &self,
        identity: &SandboxIdentity,
        script: &GeneratedScript,
        limits: &ResourceLimits,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<RawExecResult>;
}

pub struct SandboxRunner {
    shell: PathBuf,
    scope: ScopeConfig,
    cgroup: Option<CgroupVersion>,
    output: OutputLimits,
}

struct Reaped {
    status: libc::c_int,
    usage: libc::rusage,
}

impl SandboxRunner {
    pub fn new(config: &EngineConfig) -> Self {
        let cgroup = available_scope(&config.scope);
        if config.scope.enabled && cgroup.is_none() {
            warn!(
                "Execution scope unavailable ({} or no cgroup hierarchy); runs are guarded by ulimit only",
                config.scope.systemd_run.display()
            );
        }

        Self {
            shell: config.shell.clone(),
            scope: config.scope.clone(),
            cgroup,
            output: OutputLimits {
                limit_bytes: config.output_limit_bytes,
                drain_grace: config.output_drain_grace(),
            },
        }
    }

    /// Program and arguments used for one run
    pub fn launch_command(
        &self,
        identity: &SandboxIdentity,
        script: &GeneratedScript,
        limits: &ResourceLimits,
    ) -> LaunchCommand {
        match self.cgroup {
            Some(version) => scoped_command(
                &self.scope,
                version,
                identity,
                limits,
                &self.shell,
                &script.path,
            ),
            None => unscoped_command(identity, &self.shell, &script.path),
        }
    }

    fn build_command(
        &self,
        identity: &SandboxIdentity,
        launch: &LaunchCommand,
        phase_fd: RawFd,
    ) -> Command {
        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .current_dir(identity.working_directory())
            .env_clear()
            .env("HOME", identity.home_directory())
            .env("USER", identity.account_name())
            .env("LOGNAME", identity.account_name())
            .env("PATH", SANDBOX_PATH)
            .env("LANG", "C.UTF-8")
            .process_group(0);
        if let Some((uid, gid)) = launch.credentials {
            command.uid(uid).gid(gid);
        }
        // SAFETY: the hook only calls async-signal-safe fcntl/dup2
        unsafe {
            command.pre_exec(move || inherit_fd(phase_fd, PHASE_FD));
        }
        command
    }
}

impl SandboxLauncher for SandboxRunner {
    fn run(
        &self,
        identity: &SandboxIdentity,
        script: &GeneratedScript,
        limits: &ResourceLimits,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<RawExecResult> {
        let launch = self.launch_command(identity, script, limits);
        let (mut phase_reader, phase_writer) = UnixStream::pair()?;
        let mut command = self.build_command(identity, &launch, phase_writer.as_raw_fd());

        let (reader, writer) = UnixStream::pair()?;
        let writer_err = writer.try_clone()?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::from(OwnedFd::from(writer)))
            .stderr(Stdio::from(OwnedFd::from(writer_err)));

        info!(
            "Launching {} as {} ({})",
            script.path.display(),
            identity.account_name(),
            if launch.credentials.is_some() { "unscoped" } else { "scoped" }
        );
        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            SandboxError::Launch(format!("spawn {}: {}", launch.program.display(), e))
        })?;
        // Drop our copies of the write ends so EOF tracks the child's lifetime
        drop(command);
        drop(phase_writer);

        let pid = child.id() as libc::pid_t;
        let collector = CombinedOutputCollector::spawn(reader, self.output.limit_bytes);

        // A program that never reads stdin must not block the runner
        if let Some(mut pipe) = child.stdin.take() {
            let data = stdin.unwrap_or("").as_bytes().to_vec();
            thread::spawn(move || {
                if let Err(e) = pipe.write_all(&data) {
                    debug!("stdin not fully consumed: {}", e);
                }
            });
        }

        let mut timed_out = false;
        let reaped = loop {
            if let Some(reaped) = wait4(pid, libc::WNOHANG)? {
                break reaped;
            }
            if started.elapsed() >= timeout {
                timed_out = true;
                let report = kill_process_group(pid);
                warn!(
                    "{} exceeded {:?}, killed process group {} ({:?})",
                    identity.account_name(),
                    timeout,
                    pid,
                    report
                );
                match wait4(pid, 0)? {
                    Some(reaped) => break reaped,
                    None => continue,
                }
            }
            thread::sleep(POLL_INTERVAL);
        };
        let wall_time_ms = started.elapsed().as_millis() as u64;

        let output = collector.finish(self.output.drain_grace);
        let phase = read_phase(&mut phase_reader);

        let (exit_code, signal) = decode_status(reaped.status);
        debug!(
            "{} finished: exit={:?} signal={:?} timed_out={} phase={:?} output={}B",
            identity.account_name(),
            exit_code,
            signal,
            timed_out,
            phase,
            output.total_bytes
        );

        Ok(RawExecResult {
            truncated: output.truncated(),
            output_incomplete: matches!(
                output.integrity,
                OutputIntegrity::StreamStillOpen | OutputIntegrity::ReadError
            ),
            output: output.bytes,
            exit_code,
            signal,
            timed_out,
            phase,
            wall_time_ms,
            wall_limit_ms: timeout.as_millis() as u64,
            cpu_time_ms: Some(cpu_time_ms(&reaped.usage)),
            memory_peak_kb: Some(reaped.usage.ru_maxrss.max(0) as u64),
        })
    }
}

/// Child-side: make `fd` available as `target` across exec
fn inherit_fd(fd: RawFd, target: RawFd) -> io::Result<()> {
    // SAFETY: plain descriptor syscalls on descriptors owned by this process
    unsafe {
        if fd == target {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
        } else if libc::dup2(fd, target) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Run phase only if the script reported it before handing over to user code
fn read_phase(reader: &mut UnixStream) -> ExecPhase {
    let mut token = [0u8; 8];
    let read = reader
        .set_nonblocking(true)
        .and_then(|_| reader.read(&mut token));
    match read {
        Ok(n) if token[..n].starts_with(RUN_PHASE_TOKEN) => ExecPhase::Run,
        _ => ExecPhase::Compile,
    }
}

fn wait4(pid: libc::pid_t, flags: libc::c_int) -> io::Result<Option<Reaped>> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; wait4 fills it
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: pointers reference live locals for the duration of the call
        let rc = unsafe { libc::wait4(pid, &mut status, flags, &mut usage) };
        if rc == pid {
            return Ok(Some(Reaped { status, usage }));
        }
        if rc == 0 {
            return Ok(None);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn decode_status(status: libc::c_int) -> (Option<i32>, Option<i32>) {
    if libc::WIFEXITED(status) {
        (Some(libc::WEXITSTATUS(status)), None)
    } else if libc::WIFSIGNALED(status) {
        (None, Some(libc::WTERMSIG(status)))
    } else {
        (None, None)
    }
}

fn cpu_time_ms(usage: &libc::rusage) -> u64 {
    let millis = |tv: libc::timeval| (tv.tv_sec as u64) * 1000 + (tv.tv_usec as u64) / 1000;
    millis(usage.ru_utime) + millis(usage.ru_stime)
}
