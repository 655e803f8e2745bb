/// Engine configuration
///
/// Loaded from a JSON file (`--config` or `USERBOX_CONFIG`); every field has a
/// default so a partial file is valid.
use crate::config::presets::LimitPolicy;
use crate::config::types::{Language, ResourceLimits, Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "USERBOX_CONFIG";

/// Longest accepted account prefix; leaves room for the 24 random chars
pub const MAX_PREFIX_LEN: usize = 8;

/// Transient execution scope settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScopeConfig {
    /// Launch under `systemd-run --scope`; when false, ulimit is the only guard
    pub enabled: bool,
    pub systemd_run: PathBuf,
    /// CPUQuota= as a percentage of one CPU
    pub cpu_quota_percent: u32,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            systemd_run: PathBuf::from("/usr/bin/systemd-run"),
            cpu_quota_percent: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of every disposable account name
    pub account_prefix: String,
    /// Parent directory of disposable home directories
    pub home_root: PathBuf,
    /// Login shell for disposable accounts, also runs the generated script
    pub shell: PathBuf,
    /// Wall-clock bound for one sandboxed run
    pub wall_timeout_ms: u64,
    /// Combined output kept per run
    pub output_limit_bytes: usize,
    /// How long to keep draining output after the script exits
    pub output_drain_grace_ms: u64,
    /// Pause after tearing down a leftover account before recreating it
    pub acquire_settle_ms: u64,
    /// Pause between killing an account's processes and deleting it
    pub release_settle_ms: u64,
    /// Bound on each account-management command
    pub command_timeout_ms: u64,
    pub scope: ScopeConfig,
    /// JSON-lines audit trail; logging only when absent
    pub audit_log: Option<PathBuf>,
    /// Per-language replacements for the built-in limits
    pub limits: HashMap<Language, ResourceLimits>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            account_prefix: "ubx".to_string(),
            home_root: PathBuf::from("/home"),
            shell: PathBuf::from("/bin/bash"),
            wall_timeout_ms: 15_000,
            output_limit_bytes: 1024 * 1024,
            output_drain_grace_ms: 500,
            acquire_settle_ms: 100,
            release_settle_ms: 200,
            command_timeout_ms: 20_000,
            scope: ScopeConfig::default(),
            audit_log: None,
            limits: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Explicit path first, then `USERBOX_CONFIG`, then defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load_from_file(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    /// Fail fast on settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if !is_valid_prefix(&self.account_prefix) {
            errors.push(format!(
                "account_prefix '{}' must match [a-z_][a-z0-9_]* and be at most {} chars",
                self.account_prefix, MAX_PREFIX_LEN
            ));
        }
        if !self.home_root.is_absolute() {
            errors.push(format!(
                "home_root must be absolute, got {}",
                self.home_root.display()
            ));
        }
        if !self.shell.is_absolute() {
            errors.push(format!("shell must be absolute, got {}", self.shell.display()));
        }
        if self.wall_timeout_ms == 0 {
            errors.push("wall_timeout_ms must be greater than zero".to_string());
        }
        if self.command_timeout_ms == 0 {
            errors.push("command_timeout_ms must be greater than zero".to_string());
        }
        if self.output_limit_bytes == 0 {
            errors.push("output_limit_bytes must be greater than zero".to_string());
        }
        if self.scope.enabled && self.scope.cpu_quota_percent == 0 {
            errors.push("scope.cpu_quota_percent must be greater than zero".to_string());
        }
        for (language, limits) in &self.limits {
            if limits.memory_bytes == 0 || limits.cpu_seconds == 0 || limits.max_processes == 0 {
                errors.push(format!("limits for {} must all be non-zero", language));
            }
        }
        let builtin = LimitPolicy::new();
        for language in Language::all() {
            let cpu_seconds = self
                .limits
                .get(&language)
                .map_or_else(|| builtin.limits_for(language).cpu_seconds, |l| l.cpu_seconds);
            if cpu_seconds.saturating_mul(1000) <= self.wall_timeout_ms {
                errors.push(format!(
                    "cpu_seconds for {} ({}s) must exceed wall_timeout_ms ({}ms)",
                    language, cpu_seconds, self.wall_timeout_ms
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::Config(format!(
                "Config validation failed:\n{}",
                errors.join("\n")
            )))
        }
    }

    pub fn wall_timeout(&self) -> Duration {
        Duration::from_millis(self.wall_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn output_drain_grace(&self) -> Duration {
        Duration::from_millis(self.output_drain_grace_ms)
    }

    pub fn acquire_settle(&self) -> Duration {
        Duration::from_millis(self.acquire_settle_ms)
    }

    pub fn release_settle(&self) -> Duration {
        Duration::from_millis(self.release_settle_ms)
    }
}

fn is_valid_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }
    prefix.len() <= MAX_PREFIX_LEN && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wall_timeout(), Duration::from_secs(15));
        assert_eq!(config.output_limit_bytes, 1024 * 1024);
        assert!(config.scope.enabled);
    }

    #[test]
    fn test_zero_wall_timeout_rejected() {
        let config = EngineConfig {
            wall_timeout_ms: 0,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wall_timeout_ms"));
    }

    #[test]
    fn test_cpu_limit_must_outlast_wall_clock() {
        let mut limits = HashMap::new();
        limits.insert(
            Language::JavaScript,
            ResourceLimits {
                memory_bytes: 512 * 1024 * 1024,
                cpu_seconds: 10,
                max_processes: 64,
                max_file_bytes: 1024 * 1024,
            },
        );
        let config = EngineConfig {
            limits,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cpu_seconds for javascript"));

        let longer_wall = EngineConfig {
            wall_timeout_ms: 30_000,
            ..EngineConfig::default()
        };
        assert!(longer_wall.validate().is_err());
    }

    #[test]
    fn test_prefix_rules() {
        assert!(is_valid_prefix("ubx"));
        assert!(is_valid_prefix("_sb"));
        assert!(!is_valid_prefix(""));
        assert!(!is_valid_prefix("Ubx"));
        assert!(!is_valid_prefix("1ubx"));
        assert!(!is_valid_prefix("ubx-"));
        assert!(!is_valid_prefix("waytoolong"));
    }

    #[test]
    fn test_relative_home_root_rejected() {
        let config = EngineConfig {
            home_root: PathBuf::from("home"),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"wall_timeout_ms": 3000, "scope": {{"enabled": false}}, "limits": {{"python": {{"memory_bytes": 1048576, "cpu_seconds": 5, "max_processes": 4, "max_file_bytes": 1024}}}}}}"#
        )
        .unwrap();

        let config = EngineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.wall_timeout_ms, 3000);
        assert!(!config.scope.enabled);
        assert_eq!(config.scope.cpu_quota_percent, 100);
        assert_eq!(config.account_prefix, "ubx");
        assert_eq!(config.limits[&Language::Python].cpu_seconds, 5);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();

        let err = EngineConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }
}
