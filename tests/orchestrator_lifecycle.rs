//! Integration tests for the request lifecycle
//!
//! The account database and the launcher are replaced with in-process fakes
//! so these run unprivileged. Homes live in a temp dir owned by the test user.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use userbox::config::types::{
    AccountError, AccountResult, ExecPhase, GeneratedScript, RawExecResult, Result,
    SandboxIdentity,
};
use userbox::exec::runner::SandboxLauncher;
use userbox::kernel::accounts::{AccountDirectory, AccountRecord};
use userbox::{
    EngineConfig, ExecutionRequest, Executor, OutcomeKind, ResourceLimits, SandboxError,
};

#[derive(Default)]
struct FakeAccounts {
    home_root: PathBuf,
    live: Mutex<HashMap<String, AccountRecord>>,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    /// Put a regular file where the home directory should be
    broken_home: bool,
    fail_destroy: bool,
}

impl FakeAccounts {
    fn new(home_root: &Path) -> Self {
        Self {
            home_root: home_root.to_path_buf(),
            ..Self::default()
        }
    }

    fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

impl AccountDirectory for FakeAccounts {
    fn lookup(&self, name: &str) -> AccountResult<Option<AccountRecord>> {
        Ok(self.live.lock().unwrap().get(name).cloned())
    }

    fn create_account(&self, name: &str) -> AccountResult<AccountRecord> {
        let home = self.home_root.join(name);
        if self.broken_home {
            std::fs::write(&home, b"not a directory")?;
        } else {
            std::fs::create_dir(&home)?;
        }
        let record = AccountRecord {
            name: name.to_string(),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            home,
        };
        self.live.lock().unwrap().insert(name.to_string(), record.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    fn kill_account_processes(&self, _name: &str) -> AccountResult<()> {
        Ok(())
    }

    fn destroy_account(&self, name: &str) -> AccountResult<()> {
        if self.fail_destroy {
            return Err(AccountError::CommandFailed {
                command: "userdel".to_string(),
                status: Some(8),
                stderr: "user is currently used by process".to_string(),
            });
        }
        if let Some(record) = self.live.lock().unwrap().remove(name) {
            if record.home.is_dir() {
                std::fs::remove_dir_all(&record.home)?;
            } else {
                let _ = std::fs::remove_file(&record.home);
            }
        }
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_accounts(&self) -> AccountResult<Vec<String>> {
        Ok(self.live.lock().unwrap().keys().cloned().collect())
    }
}

type Behavior = Box<dyn Fn(&SandboxIdentity, &GeneratedScript) -> Result<RawExecResult> + Send + Sync>;

struct FakeLauncher {
    behavior: Behavior,
    seen: Mutex<Vec<(String, PathBuf, String)>>,
}

impl FakeLauncher {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn printing(output: &'static str) -> Self {
        Self::new(Box::new(move |_, _| Ok(raw(output, Some(0), None, false))))
    }
}

impl SandboxLauncher for FakeLauncher {
    fn run(
        &self,
        identity: &SandboxIdentity,
        script: &GeneratedScript,
        _limits: &ResourceLimits,
        _stdin: Option<&str>,
        _timeout: Duration,
    ) -> Result<RawExecResult> {
        let source = std::fs::read_to_string(&script.source_path)?;
        self.seen.lock().unwrap().push((
            identity.account_name().to_string(),
            identity.working_directory().to_path_buf(),
            source,
        ));
        (self.behavior)(identity, script)
    }
}

fn raw(output: &str, exit_code: Option<i32>, signal: Option<i32>, timed_out: bool) -> RawExecResult {
    RawExecResult {
        output: output.as_bytes().to_vec(),
        truncated: false,
        output_incomplete: false,
        exit_code,
        signal,
        timed_out,
        phase: ExecPhase::Run,
        wall_time_ms: 5,
        wall_limit_ms: 15_000,
        cpu_time_ms: Some(1),
        memory_peak_kb: Some(1024),
    }
}

fn test_config(home_root: &Path) -> EngineConfig {
    EngineConfig {
        home_root: home_root.to_path_buf(),
        acquire_settle_ms: 0,
        release_settle_ms: 0,
        ..EngineConfig::default()
    }
}

#[test]
fn test_success_creates_and_destroys_exactly_one_account() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Executor::new(
        test_config(dir.path()),
        FakeAccounts::new(dir.path()),
        FakeLauncher::printing("hi\n"),
    )
    .unwrap();

    let result = executor
        .execute(&ExecutionRequest::new("print(\"hi\")", "python"))
        .unwrap();

    assert_eq!(result.outcome, OutcomeKind::Success);
    assert_eq!(result.output, "hi\n");
    let accounts = executor.identities().accounts();
    assert_eq!(accounts.created.load(Ordering::SeqCst), 1);
    assert_eq!(accounts.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(accounts.live_count(), 0);

    let id = result.execution_id.unwrap();
    assert!(id.starts_with("ubx"));
    assert!(!dir.path().join(&id).exists());
}

#[test]
fn test_source_reaches_workspace_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Executor::new(
        test_config(dir.path()),
        FakeAccounts::new(dir.path()),
        FakeLauncher::printing(""),
    )
    .unwrap();
    let source = "print('$HOME `id` \"EOF\"\\n')\nEOF\n";

    executor
        .execute(&ExecutionRequest::new(source, "python"))
        .unwrap();

    let seen = executor.launcher().seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].2, source);
}

#[test]
fn test_unsupported_language_touches_no_account() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Executor::new(
        test_config(dir.path()),
        FakeAccounts::new(dir.path()),
        FakeLauncher::printing(""),
    )
    .unwrap();

    let err = executor
        .execute(&ExecutionRequest::new("puts 1", "ruby"))
        .unwrap_err();

    assert!(matches!(err, SandboxError::UnsupportedLanguage(_)));
    assert_eq!(executor.identities().accounts().created.load(Ordering::SeqCst), 0);
    assert!(executor.launcher().seen.lock().unwrap().is_empty());
}

#[test]
fn test_workspace_failure_still_releases_account() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = FakeAccounts {
        broken_home: true,
        ..FakeAccounts::new(dir.path())
    };
    let executor = Executor::new(test_config(dir.path()), accounts, FakeLauncher::printing("")).unwrap();

    let err = executor
        .execute(&ExecutionRequest::new("int main() {}", "cpp"))
        .unwrap_err();

    assert!(matches!(err, SandboxError::Workspace(_)));
    let accounts = executor.identities().accounts();
    assert_eq!(accounts.created.load(Ordering::SeqCst), 1);
    assert_eq!(accounts.destroyed.load(Ordering::SeqCst), 1);
    assert!(executor.launcher().seen.lock().unwrap().is_empty());
}

#[test]
fn test_launch_failure_still_releases_account() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Box::new(|_, _| {
        Err(SandboxError::Launch("systemd-run: not found".to_string()))
    }));
    let executor = Executor::new(test_config(dir.path()), FakeAccounts::new(dir.path()), launcher).unwrap();

    let err = executor
        .execute(&ExecutionRequest::new("console.log(1)", "javascript"))
        .unwrap_err();

    assert!(matches!(err, SandboxError::Launch(_)));
    let accounts = executor.identities().accounts();
    assert_eq!(accounts.created.load(Ordering::SeqCst), 1);
    assert_eq!(accounts.destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_timeout_is_classified_and_released() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Box::new(|_, _| Ok(raw("tick\n", None, Some(9), true))));
    let executor = Executor::new(test_config(dir.path()), FakeAccounts::new(dir.path()), launcher).unwrap();

    let result = executor
        .execute(&ExecutionRequest::new("while(true){}", "js"))
        .unwrap();

    assert_eq!(result.outcome, OutcomeKind::Timeout);
    assert!(result.output.starts_with("Time Limit Exceeded"));
    assert!(result.output.contains("tick"));
    assert_eq!(executor.identities().accounts().destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cleanup_failure_does_not_change_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = FakeAccounts {
        fail_destroy: true,
        ..FakeAccounts::new(dir.path())
    };
    let audit_path = dir.path().join("audit.jsonl");
    let config = EngineConfig {
        audit_log: Some(audit_path.clone()),
        ..test_config(dir.path())
    };
    let executor = Executor::new(config, accounts, FakeLauncher::printing("ok\n")).unwrap();

    let result = executor
        .execute(&ExecutionRequest::new("print('ok')", "python"))
        .unwrap();

    assert_eq!(result.outcome, OutcomeKind::Success);
    let trail = std::fs::read_to_string(&audit_path).unwrap();
    assert!(trail.contains("\"event\":\"cleanup_failure\""));
    assert!(!trail.contains("\"event\":\"identity_released\""));
}

#[test]
fn test_concurrent_requests_get_distinct_identities() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(Box::new(|_, _| {
        std::thread::sleep(Duration::from_millis(20));
        Ok(raw("done\n", Some(0), None, false))
    }));
    let executor = Executor::new(test_config(dir.path()), FakeAccounts::new(dir.path()), launcher).unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let executor = &executor;
                scope.spawn(move || {
                    executor
                        .execute(&ExecutionRequest::new(format!("print({})", i), "python"))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results.iter().all(|r| r.outcome == OutcomeKind::Success));
    let ids: HashSet<_> = results.iter().map(|r| r.execution_id.clone().unwrap()).collect();
    assert_eq!(ids.len(), 8);

    let seen = executor.launcher().seen.lock().unwrap();
    let names: HashSet<_> = seen.iter().map(|(name, _, _)| name.clone()).collect();
    let workdirs: HashSet<_> = seen.iter().map(|(_, dir, _)| dir.clone()).collect();
    let sources: HashSet<_> = seen.iter().map(|(_, _, src)| src.clone()).collect();
    assert_eq!(names.len(), 8);
    assert_eq!(workdirs.len(), 8);
    assert_eq!(sources.len(), 8);

    let accounts = executor.identities().accounts();
    assert_eq!(accounts.created.load(Ordering::SeqCst), 8);
    assert_eq!(accounts.destroyed.load(Ordering::SeqCst), 8);
    assert_eq!(accounts.live_count(), 0);
}

#[test]
fn test_audit_trail_follows_one_execution() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("logs").join("audit.jsonl");
    let config = EngineConfig {
        audit_log: Some(audit_path.clone()),
        ..test_config(dir.path())
    };
    let launcher = FakeLauncher::new(Box::new(|_, _| Ok(raw("boom\n", Some(1), None, false))));
    let executor = Executor::new(config, FakeAccounts::new(dir.path()), launcher).unwrap();

    let result = executor
        .execute(&ExecutionRequest::new("raise SystemExit(1)", "python"))
        .unwrap();
    assert_eq!(result.outcome, OutcomeKind::RuntimeError);

    let events: Vec<serde_json::Value> = std::fs::read_to_string(&audit_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let kinds: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        ["execution_start", "identity_acquired", "identity_released", "execution_end"]
    );

    let id = result.execution_id.unwrap();
    assert!(events.iter().all(|e| e["execution_id"] == id.as_str()));
    assert_eq!(events[3]["outcome"], "runtime_error");
    assert_eq!(events[3]["exit_code"], 1);
}

#[test]
fn test_sweep_removes_only_prefixed_accounts_under_home_root() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = FakeAccounts::new(dir.path());
    accounts.create_account("ubx0123456789abcdef01234567").unwrap();
    accounts.create_account("postgres").unwrap();
    accounts.live.lock().unwrap().insert(
        "ubxforeign".to_string(),
        AccountRecord {
            name: "ubxforeign".to_string(),
            uid: 2000,
            gid: 2000,
            home: PathBuf::from("/srv/ubxforeign"),
        },
    );
    let executor = Executor::new(test_config(dir.path()), accounts, FakeLauncher::printing("")).unwrap();

    let report = executor.sweep_stale_accounts();

    assert_eq!(report.removed, vec!["ubx0123456789abcdef01234567".to_string()]);
    assert_eq!(report.skipped, vec!["ubxforeign".to_string()]);
    assert!(report.failed.is_empty());
    let accounts = executor.identities().accounts();
    assert!(accounts.lookup("postgres").unwrap().is_some());
    assert!(accounts.lookup("ubxforeign").unwrap().is_some());
}
