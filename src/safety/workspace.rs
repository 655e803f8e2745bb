/// Workspace materialization for one sandbox identity
///
/// Source and script are written with plain file APIs under the identity's
/// working directory and handed to the account. The source never passes
/// through a shell, so arbitrary bytes survive verbatim.
use crate::config::types::{
    GeneratedScript, Language, ResourceLimits, Result, SandboxError, SandboxIdentity,
};
use crate::judge::registry::adapter_for;
use crate::judge::script::{render, SCRIPT_FILE_NAME};
use nix::unistd::{chown, Gid, Uid};
use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

fn workspace_error(action: &str, path: &Path, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::Workspace(format!("{} {}: {}", action, path.display(), err))
}

fn write_private(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(contents)?;
    // mode() only applies on creation
    fs::set_permissions(path, Permissions::from_mode(mode))
}

fn hand_over(path: &Path, identity: &SandboxIdentity) -> Result<()> {
    chown(
        path,
        Some(Uid::from_raw(identity.uid())),
        Some(Gid::from_raw(identity.gid())),
    )
    .map_err(|e| workspace_error("chown", path, e))
}

/// Write source and script for `language`; returns where they landed
pub fn materialize(
    identity: &SandboxIdentity,
    language: Language,
    source: &str,
    limits: &ResourceLimits,
) -> Result<GeneratedScript> {
    let home = identity.home_directory();
    let workdir = identity.working_directory();

    if home.is_dir() {
        fs::set_permissions(home, Permissions::from_mode(0o700))
            .map_err(|e| workspace_error("restrict", home, e))?;
    }
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(workdir)
        .map_err(|e| workspace_error("create", workdir, e))?;
    hand_over(workdir, identity)?;

    let source_path = workdir.join(adapter_for(language).source_file_name(source));
    write_private(&source_path, source.as_bytes(), 0o600)
        .map_err(|e| workspace_error("write", &source_path, e))?;
    hand_over(&source_path, identity)?;

    let text = render(language, &source_path, limits);
    let script_path = workdir.join(SCRIPT_FILE_NAME);
    write_private(&script_path, text.as_bytes(), 0o700)
        .map_err(|e| workspace_error("write", &script_path, e))?;
    hand_over(&script_path, identity)?;

    log::debug!(
        "Materialized {} workspace for {} at {}",
        language,
        identity.account_name(),
        workdir.display()
    );

    Ok(GeneratedScript {
        text,
        path: script_path,
        source_path,
    })
}
