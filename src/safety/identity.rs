//! Identity lifecycle manager.
//!
//! Creates and tears down the disposable account behind each request. Every
//! create and destroy goes through a single-slot FIFO gate; running sandboxes
//! are not serialized, only the account mutations are.

use crate::config::config::EngineConfig;
use crate::config::types::{AccountError, ExecutionId, Result, SandboxIdentity};
use crate::kernel::accounts::{AccountDirectory, AccountRecord};
use crate::safety::gate::AdmissionGate;
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

/// What release managed to do. Failures are reported, never raised.
#[derive(Debug, Default)]
pub struct ReleaseReport {
    pub account_name: String,
    pub processes_killed: bool,
    pub account_destroyed: bool,
    pub errors: Vec<String>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct IdentityManager<A: AccountDirectory> {
    accounts: A,
    gate: AdmissionGate,
    acquire_settle: Duration,
    release_settle: Duration,
}

impl<A: AccountDirectory> IdentityManager<A> {
    pub fn new(accounts: A, acquire_settle: Duration, release_settle: Duration) -> Self {
        Self {
            accounts,
            gate: AdmissionGate::new(1),
            acquire_settle,
            release_settle,
        }
    }

    pub fn from_config(accounts: A, config: &EngineConfig) -> Self {
        Self::new(accounts, config.acquire_settle(), config.release_settle())
    }

    pub fn accounts(&self) -> &A {
        &self.accounts
    }

    /// Provision a fresh account named after `id`.
    ///
    /// A leftover account with the same name is killed and deleted first, so
    /// acquiring after a crash still yields a clean identity.
    pub fn acquire(&self, id: &ExecutionId) -> Result<SandboxIdentity> {
        let name = id.as_str();
        let _permit = self.gate.acquire();

        if self.accounts.account_exists(name)? {
            warn!("Account {} already exists, reclaiming leftover", name);
            self.accounts.kill_account_processes(name)?;
            self.accounts.destroy_account(name)?;
            thread::sleep(self.acquire_settle);
        }

        let record = match self.accounts.create_account(name) {
            Ok(record) => record,
            Err(e) => {
                // useradd may have written the entry before failing or timing out
                warn!("Creating {} failed: {}; removing any partial account", name, e);
                self.remove_partial(name);
                return Err(e.into());
            }
        };
        let AccountRecord { name, uid, gid, home } = record;
        info!("Acquired identity {} (uid {}, home {})", name, uid, home.display());
        Ok(SandboxIdentity::new(name, uid, gid, home))
    }

    /// Best-effort teardown while the caller already holds the gate
    fn remove_partial(&self, name: &str) {
        if let Err(e) = self.accounts.kill_account_processes(name) {
            warn!("Kill after failed creation of {}: {}", name, e);
        }
        thread::sleep(self.release_settle);
        if let Err(e) = self.accounts.destroy_account(name) {
            warn!("Cleanup after failed creation of {}: {}", name, e);
        }
    }

    /// Tear down an identity. Consumes it, so it cannot be released twice.
    pub fn release(&self, identity: SandboxIdentity) -> ReleaseReport {
        self.teardown(identity.account_name())
    }

    /// Kill and delete an account by name (leftovers found by a sweep)
    pub fn reclaim(&self, name: &str) -> ReleaseReport {
        self.teardown(name)
    }

    fn teardown(&self, name: &str) -> ReleaseReport {
        let _permit = self.gate.acquire();
        let mut report = ReleaseReport {
            account_name: name.to_string(),
            ..ReleaseReport::default()
        };

        match self.accounts.kill_account_processes(name) {
            Ok(()) => report.processes_killed = true,
            Err(e) => record_failure(&mut report, "kill processes", e),
        }
        thread::sleep(self.release_settle);

        match self.accounts.destroy_account(name) {
            Ok(()) => report.account_destroyed = true,
            Err(e) => record_failure(&mut report, "destroy account", e),
        }

        if report.is_clean() {
            debug!("Released identity {}", name);
        }
        report
    }

    /// Acquire wrapped in a guard that releases on every exit path
    pub fn lease(&self, id: &ExecutionId) -> Result<IdentityLease<'_, A>> {
        let identity = self.acquire(id)?;
        Ok(IdentityLease {
            manager: self,
            identity: Some(identity),
        })
    }
}

fn record_failure(report: &mut ReleaseReport, step: &str, err: AccountError) {
    warn!("Release of {}: {} failed: {}", report.account_name, step, err);
    report.errors.push(format!("{}: {}", step, err));
}

/// Scoped ownership of an identity.
///
/// `release` is the normal path; `Drop` covers unwinding.
pub struct IdentityLease<'a, A: AccountDirectory> {
    manager: &'a IdentityManager<A>,
    identity: Option<SandboxIdentity>,
}

impl<'a, A: AccountDirectory> IdentityLease<'a, A> {
    pub fn identity(&self) -> &SandboxIdentity {
        match &self.identity {
            Some(identity) => identity,
            // release() consumes the lease, so the slot is only empty inside drop
            None => unreachable!("identity lease used after release"),
        }
    }

    pub fn release(mut self) -> ReleaseReport {
        match self.identity.take() {
            Some(identity) => self.manager.release(identity),
            None => ReleaseReport::default(),
        }
    }
}

impl<A: AccountDirectory> Drop for IdentityLease<'_, A> {
    fn drop(&mut self) {
        if let Some(identity) = self.identity.take() {
            warn!("Releasing {} from an unwinding path", identity.account_name());
            let _ = self.manager.release(identity);
        }
    }
}
