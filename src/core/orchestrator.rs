//! Execution orchestrator.
//!
//! One call to [`Executor::execute`] per request:
//! `Pending -> IdentityAcquired -> ScriptWritten -> Running -> Succeeded|Failed -> IdentityReleased`.
//! Once an identity exists it is released on every path out, including
//! errors and unwinding. Many requests may run concurrently; only account
//! mutations are serialized, inside the identity manager.

use crate::config::config::EngineConfig;
use crate::config::presets::LimitPolicy;
use crate::config::types::{
    ExecutionId, ExecutionRequest, ExecutionResult, Language, OutcomeKind, ResourceLimits,
    Result, SandboxIdentity,
};
use crate::exec::runner::{SandboxLauncher, SandboxRunner};
use crate::kernel::accounts::{AccountDirectory, SystemAccounts};
use crate::observability::audit::{AuditEvent, AuditLog};
use crate::safety::cleanup::{sweep_stale_accounts, SweepReport};
use crate::safety::identity::IdentityManager;
use crate::safety::workspace::materialize;
use crate::verdict::classifier::ResultClassifier;
use log::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    Pending,
    IdentityAcquired,
    ScriptWritten,
    Running,
    Succeeded,
    Failed,
    IdentityReleased,
}

impl ExecutionStage {
    /// Legal forward transitions
    pub fn can_advance_to(self, next: ExecutionStage) -> bool {
        use ExecutionStage::*;
        matches!(
            (self, next),
            (Pending, IdentityAcquired)
                | (IdentityAcquired, ScriptWritten)
                | (ScriptWritten, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (IdentityAcquired, Failed)
                | (ScriptWritten, Failed)
                | (Succeeded, IdentityReleased)
                | (Failed, IdentityReleased)
        )
    }
}

struct StageTracker<'a> {
    id: &'a str,
    current: ExecutionStage,
}

impl<'a> StageTracker<'a> {
    fn new(id: &'a str) -> Self {
        Self {
            id,
            current: ExecutionStage::Pending,
        }
    }

    fn advance(&mut self, next: ExecutionStage) {
        debug_assert!(
            self.current.can_advance_to(next),
            "illegal stage transition {:?} -> {:?}",
            self.current,
            next
        );
        debug!("{}: {:?} -> {:?}", self.id, self.current, next);
        self.current = next;
    }
}

pub struct Executor<A: AccountDirectory, L: SandboxLauncher> {
    identities: IdentityManager<A>,
    launcher: L,
    policy: LimitPolicy,
    config: EngineConfig,
    audit: AuditLog,
}

impl Executor<SystemAccounts, SandboxRunner> {
    /// Executor backed by the real account database and scope runner
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let accounts = SystemAccounts::new(&config);
        let runner = SandboxRunner::new(&config);
        Self::new(config, accounts, runner)
    }
}

impl<A: AccountDirectory, L: SandboxLauncher> Executor<A, L> {
    pub fn new(config: EngineConfig, accounts: A, launcher: L) -> Result<Self> {
        config.validate()?;
        let audit = AuditLog::open(config.audit_log.as_deref())?;
        Ok(Self {
            identities: IdentityManager::from_config(accounts, &config),
            launcher,
            policy: LimitPolicy::with_overrides(&config.limits),
            config,
            audit,
        })
    }

    pub fn identities(&self) -> &IdentityManager<A> {
        &self.identities
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limits_for(&self, language: Language) -> ResourceLimits {
        self.policy.limits_for(language)
    }

    /// Run one request to a classified result.
    ///
    /// `Err` means the sandbox tooling failed before user code could run;
    /// no account is touched when the language is unsupported.
    pub fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let language: Language = request.language.parse()?;
        let limits = self.policy.limits_for(language);
        let id = ExecutionId::generate(&self.config.account_prefix);
        let mut stage = StageTracker::new(id.as_str());

        self.audit
            .execution_start(&id, language, &request.source, request.stdin.as_deref());

        let lease = match self.identities.lease(&id) {
            Ok(lease) => lease,
            Err(e) => {
                self.audit.record(id.as_str(), AuditEvent::ExecutionAborted { error: e.to_string() });
                return Err(e);
            }
        };
        stage.advance(ExecutionStage::IdentityAcquired);
        self.audit.record(
            id.as_str(),
            AuditEvent::IdentityAcquired {
                account: lease.identity().account_name().to_string(),
                uid: lease.identity().uid(),
            },
        );

        let outcome = self.run_acquired(lease.identity(), language, request, &limits, &mut stage);
        match &outcome {
            Ok(result) if result.outcome == OutcomeKind::Success => {
                stage.advance(ExecutionStage::Succeeded)
            }
            _ => stage.advance(ExecutionStage::Failed),
        }

        let account = lease.identity().account_name().to_string();
        let report = lease.release();
        stage.advance(ExecutionStage::IdentityReleased);
        if report.is_clean() {
            self.audit.record(id.as_str(), AuditEvent::IdentityReleased { account });
        } else {
            self.audit.record(
                id.as_str(),
                AuditEvent::CleanupFailure {
                    account,
                    errors: report.errors,
                },
            );
        }

        match outcome {
            Ok(mut result) => {
                self.audit.record(
                    id.as_str(),
                    AuditEvent::ExecutionEnd {
                        outcome: result.outcome,
                        exit_code: result.exit_code,
                        signal: result.signal.clone(),
                        wall_time_ms: result.stats.as_ref().map(|s| s.wall_time_ms),
                    },
                );
                result.execution_id = Some(id.to_string());
                Ok(result)
            }
            Err(e) => {
                error!("{}: aborted: {}", id, e);
                self.audit.record(id.as_str(), AuditEvent::ExecutionAborted { error: e.to_string() });
                Err(e)
            }
        }
    }

    fn run_acquired(
        &self,
        identity: &SandboxIdentity,
        language: Language,
        request: &ExecutionRequest,
        limits: &ResourceLimits,
        stage: &mut StageTracker<'_>,
    ) -> Result<ExecutionResult> {
        let script = materialize(identity, language, &request.source, limits)?;
        stage.advance(ExecutionStage::ScriptWritten);

        stage.advance(ExecutionStage::Running);
        let raw = self.launcher.run(
            identity,
            &script,
            limits,
            request.stdin.as_deref(),
            self.config.wall_timeout(),
        )?;
        if raw.timed_out {
            self.audit.record(
                identity.account_name(),
                AuditEvent::ForcedKill {
                    reason: format!("wall-clock limit of {}ms reached", raw.wall_limit_ms),
                },
            );
        }

        Ok(ResultClassifier::classify(&raw))
    }

    /// Tear down accounts left by crashed runs. Call only while idle.
    pub fn sweep_stale_accounts(&self) -> SweepReport {
        let report = sweep_stale_accounts(
            &self.identities,
            &self.config.account_prefix,
            &self.config.home_root,
        );
        for account in &report.removed {
            self.audit.record(
                account,
                AuditEvent::StaleAccountSwept {
                    account: account.clone(),
                },
            );
        }
        report
    }
}
