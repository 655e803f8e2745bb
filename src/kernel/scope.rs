//! Transient execution scope.
//!
//! Wraps the script launch in `systemd-run --scope` so memory, CPU quota and
//! task count are capped by the cgroup, independently of the script's ulimits.

use crate::config::config::ScopeConfig;
use crate::config::types::{ResourceLimits, SandboxIdentity};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

/// Detect the mounted cgroup hierarchy: v2 preferred, v1 fallback
pub fn detect_cgroup_version() -> Option<CgroupVersion> {
    if Path::new("/sys/fs/cgroup/cgroup.controllers").exists() {
        return Some(CgroupVersion::V2);
    }
    if Path::new("/sys/fs/cgroup/memory").exists() && Path::new("/sys/fs/cgroup/cpu").exists() {
        return Some(CgroupVersion::V1);
    }
    None
}

/// Program, arguments and (for unscoped launches) the credentials to drop to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// uid/gid the launcher must switch to itself; None when the scope runner does it
    pub credentials: Option<(u32, u32)>,
}

/// Cgroup version runs are scoped under; None when the scope is disabled,
/// the scope runner is missing or no hierarchy is mounted
pub fn available_scope(config: &ScopeConfig) -> Option<CgroupVersion> {
    if config.enabled && config.systemd_run.exists() {
        detect_cgroup_version()
    } else {
        None
    }
}

/// Unit name for an account's scope, visible in `systemctl list-units`
pub fn unit_name(identity: &SandboxIdentity) -> String {
    format!("userbox-{}", identity.account_name())
}

fn memory_properties(version: CgroupVersion, limits: &ResourceLimits) -> Vec<String> {
    match version {
        CgroupVersion::V2 => vec![
            format!("MemoryMax={}", limits.memory_bytes),
            "MemorySwapMax=0".to_string(),
        ],
        CgroupVersion::V1 => vec![format!("MemoryLimit={}", limits.memory_bytes)],
    }
}

/// Build the scoped launch of `shell script` as the identity
pub fn scoped_command(
    config: &ScopeConfig,
    version: CgroupVersion,
    identity: &SandboxIdentity,
    limits: &ResourceLimits,
    shell: &Path,
    script: &Path,
) -> LaunchCommand {
    let mut args = vec![
        "--scope".to_string(),
        "--quiet".to_string(),
        "--collect".to_string(),
        format!("--unit={}", unit_name(identity)),
    ];

    let mut properties = memory_properties(version, limits);
    properties.push(format!("CPUQuota={}%", config.cpu_quota_percent));
    properties.push(format!("TasksMax={}", limits.max_processes));
    for property in properties {
        args.push("-p".to_string());
        args.push(property);
    }

    args.push(format!("--uid={}", identity.uid()));
    args.push(format!("--gid={}", identity.gid()));
    args.push("--".to_string());
    args.push(shell.to_string_lossy().into_owned());
    args.push(script.to_string_lossy().into_owned());

    LaunchCommand {
        program: config.systemd_run.clone(),
        args,
        credentials: None,
    }
}

/// Direct launch without a scope; only the script's ulimits apply
pub fn unscoped_command(identity: &SandboxIdentity, shell: &Path, script: &Path) -> LaunchCommand {
    LaunchCommand {
        program: shell.to_path_buf(),
        args: vec![script.to_string_lossy().into_owned()],
        credentials: Some((identity.uid(), identity.gid())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::LimitPolicy;
    use crate::config::types::Language;

    fn identity() -> SandboxIdentity {
        SandboxIdentity::new("ubx0011".into(), 1234, 1235, PathBuf::from("/home/ubx0011"))
    }

    #[test]
    fn test_scoped_command_v2() {
        let limits = LimitPolicy::new().limits_for(Language::Python);
        let launch = scoped_command(
            &ScopeConfig::default(),
            CgroupVersion::V2,
            &identity(),
            &limits,
            Path::new("/bin/bash"),
            Path::new("/home/ubx0011/work/execute.sh"),
        );

        assert_eq!(launch.program, PathBuf::from("/usr/bin/systemd-run"));
        assert!(launch.credentials.is_none());
        let args = launch.args.join(" ");
        assert!(args.starts_with("--scope --quiet --collect --unit=userbox-ubx0011"));
        assert!(args.contains("-p MemoryMax=268435456 -p MemorySwapMax=0"));
        assert!(args.contains("-p CPUQuota=100%"));
        assert!(args.contains("-p TasksMax=64"));
        assert!(args.ends_with("--uid=1234 --gid=1235 -- /bin/bash /home/ubx0011/work/execute.sh"));
    }

    #[test]
    fn test_scoped_command_v1_uses_memory_limit() {
        let limits = LimitPolicy::new().limits_for(Language::Cpp);
        let launch = scoped_command(
            &ScopeConfig::default(),
            CgroupVersion::V1,
            &identity(),
            &limits,
            Path::new("/bin/bash"),
            Path::new("/s.sh"),
        );
        assert!(launch.args.contains(&"MemoryLimit=268435456".to_string()));
        assert!(!launch.args.iter().any(|a| a.starts_with("MemorySwapMax")));
    }

    #[test]
    fn test_unscoped_command_drops_credentials() {
        let launch = unscoped_command(&identity(), Path::new("/bin/bash"), Path::new("/s.sh"));
        assert_eq!(launch.program, PathBuf::from("/bin/bash"));
        assert_eq!(launch.args, vec!["/s.sh".to_string()]);
        assert_eq!(launch.credentials, Some((1234, 1235)));
    }

    #[test]
    fn test_disabled_scope_is_unavailable() {
        let config = ScopeConfig {
            enabled: false,
            ..ScopeConfig::default()
        };
        assert_eq!(available_scope(&config), None);

        let missing_runner = ScopeConfig {
            systemd_run: PathBuf::from("/nonexistent/systemd-run"),
            ..ScopeConfig::default()
        };
        assert_eq!(available_scope(&missing_runner), None);
    }
}
