/// Crash recovery for disposable accounts
///
/// A process that dies mid-request leaves its account behind. The sweep finds
/// every account carrying the engine prefix and tears it down through the
/// identity manager, so it queues behind the same gate as live requests.
use crate::config::types::is_valid_account_name;
use crate::kernel::accounts::{is_home_under, AccountDirectory};
use crate::safety::identity::IdentityManager;
use log::{info, warn};
use std::path::Path;

#[derive(Debug, Default)]
pub struct SweepReport {
    pub removed: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Prefix matched but the home is elsewhere; not ours to delete
    pub skipped: Vec<String>,
}

/// Tear down every leftover account named `<prefix>...` whose home is under `home_root`.
///
/// Only run when no requests of this engine are in flight: live accounts
/// carry the same prefix.
pub fn sweep_stale_accounts<A: AccountDirectory>(
    manager: &IdentityManager<A>,
    prefix: &str,
    home_root: &Path,
) -> SweepReport {
    let mut report = SweepReport::default();

    let names = match manager.accounts().list_accounts() {
        Ok(names) => names,
        Err(e) => {
            warn!("Cannot list accounts for sweep: {}", e);
            report.failed.push(("*".to_string(), e.to_string()));
            return report;
        }
    };

    for name in names
        .into_iter()
        .filter(|n| n.starts_with(prefix) && n.len() > prefix.len() && is_valid_account_name(n))
    {
        match manager.accounts().lookup(&name) {
            Ok(Some(record)) if is_home_under(&record.home, home_root) => {}
            Ok(_) => {
                report.skipped.push(name);
                continue;
            }
            Err(e) => {
                report.failed.push((name, e.to_string()));
                continue;
            }
        }

        let release = manager.reclaim(&name);
        if release.account_destroyed {
            info!("Swept stale account {}", name);
            report.removed.push(name);
        } else {
            report.failed.push((name, release.errors.join("; ")));
        }
    }

    report
}
