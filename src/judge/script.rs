//! Script generator
//!
//! Renders the shell script executed as the disposable account. The script
//! only carries ulimit guards and argument vectors from the language adapter;
//! the source itself is written to disk separately and never interpolated.

use crate::config::types::{Language, ResourceLimits};
use crate::judge::registry::adapter_for;
use std::fmt::Write;
use std::path::Path;

/// File name of the generated script inside the working directory
pub const SCRIPT_FILE_NAME: &str = "execute.sh";

/// Descriptor the launcher inherits to the script. The script writes
/// [`RUN_PHASE_TOKEN`] to it once compilation succeeded and closes it before
/// any user code starts, so the program cannot forge or erase the phase.
pub const PHASE_FD: i32 = 3;

pub const RUN_PHASE_TOKEN: &[u8] = b"run";

/// Single-quote a word for POSIX shells
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"/._-+=:,".contains(&b))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn join_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render the script for `language` whose source lives at `source_path`
pub fn render(language: Language, source_path: &Path, limits: &ResourceLimits) -> String {
    let adapter = adapter_for(language);
    let plan = adapter.plan(source_path, limits);
    let workdir = source_path.parent().unwrap_or_else(|| Path::new("."));

    let mut script = String::with_capacity(512);
    script.push_str("#!/bin/bash\n");
    script.push_str("exec 2>&1\n");
    // writeln! into a String cannot fail
    // Soft below hard: the kernel sends SIGXCPU at the soft limit, SIGKILL only at the hard one
    let _ = writeln!(script, "ulimit -S -t {}", limits.cpu_seconds);
    let _ = writeln!(script, "ulimit -H -t {}", limits.cpu_seconds + 1);
    let _ = writeln!(script, "ulimit -u {}", limits.max_processes);
    let _ = writeln!(script, "ulimit -f {}", limits.file_size_blocks());
    let _ = writeln!(script, "cd {} || exit 1", shell_quote(&workdir.to_string_lossy()));

    if let Some(compile) = &plan.compile {
        let _ = writeln!(
            script,
            "{} < /dev/null {}>&- || exit $?",
            join_argv(compile),
            PHASE_FD
        );
    }

    let _ = writeln!(
        script,
        "{{ printf {} >&{}; }} 2>/dev/null",
        String::from_utf8_lossy(RUN_PHASE_TOKEN),
        PHASE_FD
    );
    let _ = writeln!(script, "exec {} {}>&-", join_argv(&plan.run), PHASE_FD);
    script
}
