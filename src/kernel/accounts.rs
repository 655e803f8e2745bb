//! Disposable OS accounts.
//!
//! The OS user database is a process-external shared resource. The engine
//! only touches it through [`AccountDirectory`], so the lifecycle logic above
//! can run against a fake in tests.

use crate::config::config::EngineConfig;
use crate::config::types::{AccountError, AccountResult};
use crate::utils::command::{run_with_timeout, CommandOutput};
use log::{debug, info, warn};
use nix::unistd::User;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Account database entry for a disposable account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

/// Narrow collaborator over the OS account namespace
pub trait AccountDirectory: Send + Sync {
    fn lookup(&self, name: &str) -> AccountResult<Option<AccountRecord>>;

    /// Create the account with a home directory and login shell
    fn create_account(&self, name: &str) -> AccountResult<AccountRecord>;

    /// SIGKILL everything the account owns. No processes is not an error.
    fn kill_account_processes(&self, name: &str) -> AccountResult<()>;

    /// Delete the account and its home directory. Deleting a missing account is not an error.
    fn destroy_account(&self, name: &str) -> AccountResult<()>;

    /// Names of every account in the database
    fn list_accounts(&self) -> AccountResult<Vec<String>>;

    fn account_exists(&self, name: &str) -> AccountResult<bool> {
        Ok(self.lookup(name)?.is_some())
    }
}

/// Exit status of userdel when the account does not exist
const USERDEL_NO_SUCH_USER: i32 = 6;
/// Exit status of pkill when nothing matched
const PKILL_NO_MATCH: i32 = 1;

/// shadow-utils backed account directory
#[derive(Debug, Clone)]
pub struct SystemAccounts {
    home_root: PathBuf,
    shell: PathBuf,
    command_timeout: Duration,
    passwd_path: PathBuf,
}

impl SystemAccounts {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            home_root: config.home_root.clone(),
            shell: config.shell.clone(),
            command_timeout: config.command_timeout(),
            passwd_path: PathBuf::from("/etc/passwd"),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> AccountResult<CommandOutput> {
        run_with_timeout(program, args, self.command_timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                AccountError::CommandTimeout {
                    command: program.to_string(),
                    waited: self.command_timeout,
                }
            } else {
                AccountError::Io(e)
            }
        })
    }

    fn home_for(&self, name: &str) -> PathBuf {
        self.home_root.join(name)
    }
}

fn command_failed(command: &str, output: CommandOutput) -> AccountError {
    AccountError::CommandFailed {
        command: command.to_string(),
        status: output.status,
        stderr: output.stderr.trim().to_string(),
    }
}

impl AccountDirectory for SystemAccounts {
    fn lookup(&self, name: &str) -> AccountResult<Option<AccountRecord>> {
        let user = User::from_name(name)?;
        Ok(user.map(|u| AccountRecord {
            name: u.name,
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
            home: u.dir,
        }))
    }

    fn create_account(&self, name: &str) -> AccountResult<AccountRecord> {
        let home = self.home_for(name);
        let home_arg = home.to_string_lossy();
        let shell_arg = self.shell.to_string_lossy();
        let output = self.run(
            "useradd",
            &[
                "--create-home",
                "--home-dir",
                &home_arg,
                "--shell",
                &shell_arg,
                "--user-group",
                "-K",
                "UMASK=0077",
                name,
            ],
        )?;
        if !output.success() {
            return Err(command_failed("useradd", output));
        }

        let record = self
            .lookup(name)?
            .ok_or_else(|| AccountError::NotFound(name.to_string()))?;
        info!("Created account {} (uid {})", record.name, record.uid);
        Ok(record)
    }

    fn kill_account_processes(&self, name: &str) -> AccountResult<()> {
        let output = self.run("pkill", &["-KILL", "-u", name])?;
        match output.status {
            Some(0) => {
                debug!("Killed remaining processes of {}", name);
                Ok(())
            }
            Some(PKILL_NO_MATCH) => Ok(()),
            _ => Err(command_failed("pkill", output)),
        }
    }

    fn destroy_account(&self, name: &str) -> AccountResult<()> {
        let output = self.run("userdel", &["--remove", "--force", name])?;
        match output.status {
            Some(0) | Some(USERDEL_NO_SUCH_USER) => {}
            _ if is_benign_userdel_noise(&output.stderr) => {
                debug!("userdel {}: ignoring {}", name, output.stderr.trim());
            }
            _ => return Err(command_failed("userdel", output)),
        }

        // userdel leaves the home behind when it was not the registered one
        let home = self.home_for(name);
        if home.exists() {
            warn!("Home {} survived userdel, removing", home.display());
            std::fs::remove_dir_all(&home)?;
        }
        Ok(())
    }

    fn list_accounts(&self) -> AccountResult<Vec<String>> {
        let passwd = std::fs::read_to_string(&self.passwd_path)?;
        Ok(parse_passwd_names(&passwd))
    }
}

/// userdel stderr consisting only of housekeeping complaints
pub fn is_benign_userdel_noise(stderr: &str) -> bool {
    let mut lines = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
    lines.peek().is_some()
        && lines.all(|line| {
            line.contains("mail spool")
                || line.contains("No directory")
                || line.contains("not owned by")
                || (line.contains("group") && line.contains("not removed"))
        })
}

fn parse_passwd_names(passwd: &str) -> Vec<String> {
    passwd
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split(':').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `home` sits directly under `root`
pub fn is_home_under(home: &Path, root: &Path) -> bool {
    home.parent() == Some(root)
}
