/// Result classification
///
/// Pure, total mapping from what the runner observed to the caller-facing
/// outcome. Precedence: timeout, resource kill, other signals, clean exit,
/// silent failure, failure with output.
use crate::config::types::{
    ExecPhase, ExecutionResult, ExecutionStats, OutcomeKind, RawExecResult,
};
use crate::judge::script::SCRIPT_FILE_NAME;
use crate::kernel::signal::signal_name;

/// Shown when a successful run printed nothing
pub const NO_OUTPUT_SENTINEL: &str = "Program executed successfully (no output)";

const TRUNCATION_NOTE: &str = "[output truncated]";

const INCOMPLETE_NOTE: &str = "[output may be incomplete]";

/// Highest signal number a shell reports as 128+n
const MAX_SIGNAL: i32 = 64;

pub struct ResultClassifier;

impl ResultClassifier {
    pub fn classify(raw: &RawExecResult) -> ExecutionResult {
        let signal = effective_signal(raw);
        let has_output = !raw.output.is_empty();
        let text = String::from_utf8_lossy(&raw.output);
        let filtered = filter_noise(&text);

        let (outcome, message) = if raw.timed_out {
            let heading = format!(
                "Time Limit Exceeded: execution exceeded the {} wall-clock limit",
                format_limit(raw.wall_limit_ms)
            );
            (OutcomeKind::Timeout, with_partial_output(heading, &filtered))
        } else if let Some(heading) = signal.and_then(resource_heading) {
            (
                OutcomeKind::ResourceExceeded,
                with_partial_output(heading.to_string(), &filtered),
            )
        } else if let Some(signo) = signal {
            let heading = signal_heading(signo);
            (failure_kind(raw.phase), with_diagnostic(heading, &filtered))
        } else if raw.exit_code == Some(0) {
            let output = if has_output {
                text.into_owned()
            } else {
                NO_OUTPUT_SENTINEL.to_string()
            };
            (OutcomeKind::Success, output)
        } else if !has_output {
            let message = match raw.exit_code {
                Some(code) => format!(
                    "Internal Error\n\nexecution exited with status {} and produced no output",
                    code
                ),
                None => "Internal Error\n\nexecution ended without an exit status".to_string(),
            };
            (OutcomeKind::InternalError, message)
        } else {
            let kind = failure_kind(raw.phase);
            let heading = match kind {
                OutcomeKind::CompileError => "Compilation Error",
                _ => "Runtime Error",
            };
            (kind, with_diagnostic(heading.to_string(), &filtered))
        };

        let notes: Vec<&str> = [
            (raw.truncated, TRUNCATION_NOTE),
            (raw.output_incomplete, INCOMPLETE_NOTE),
        ]
        .iter()
        .filter(|(applies, _)| *applies)
        .map(|(_, note)| *note)
        .collect();
        let output = if notes.is_empty() {
            message
        } else {
            format!("{}\n{}", message.trim_end_matches('\n'), notes.join("\n"))
        };

        ExecutionResult {
            outcome,
            output,
            exit_code: raw.exit_code,
            signal: signal.map(signal_name),
            truncated: raw.truncated,
            stats: Some(ExecutionStats {
                wall_time_ms: raw.wall_time_ms,
                cpu_time_ms: raw.cpu_time_ms,
                memory_peak_kb: raw.memory_peak_kb,
            }),
            execution_id: None,
        }
    }
}

/// Terminating signal, or the one a shell reported as exit status 128+n
fn effective_signal(raw: &RawExecResult) -> Option<i32> {
    raw.signal.or_else(|| {
        raw.exit_code
            .filter(|code| *code > 128 && *code <= 128 + MAX_SIGNAL)
            .map(|code| code - 128)
    })
}

fn failure_kind(phase: ExecPhase) -> OutcomeKind {
    match phase {
        ExecPhase::Compile => OutcomeKind::CompileError,
        ExecPhase::Run => OutcomeKind::RuntimeError,
    }
}

/// Signals sent by limit enforcement rather than by the program's own fault
fn resource_heading(signo: i32) -> Option<&'static str> {
    match signo {
        libc::SIGKILL => Some("Resource Limit Exceeded (SIGKILL): memory or task limit reached"),
        libc::SIGXCPU => Some("CPU Time Limit Exceeded (SIGXCPU)"),
        libc::SIGXFSZ => Some("Output Limit Exceeded (SIGXFSZ)"),
        _ => None,
    }
}

fn signal_heading(signo: i32) -> String {
    match signo {
        libc::SIGSEGV => "Segmentation Fault (SIGSEGV)".to_string(),
        libc::SIGFPE => "Floating Point Exception (SIGFPE)".to_string(),
        libc::SIGABRT => "Program Aborted (SIGABRT)".to_string(),
        libc::SIGBUS => "Bus Error (SIGBUS)".to_string(),
        other => format!("Runtime Error ({})", signal_name(other)),
    }
}

fn format_limit(ms: u64) -> String {
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

fn with_partial_output(heading: String, output: &str) -> String {
    if output.is_empty() {
        heading
    } else {
        format!("{}\n\nPartial output:\n{}", heading, output)
    }
}

fn with_diagnostic(heading: String, output: &str) -> String {
    if output.is_empty() {
        heading
    } else {
        format!("{}\n\n{}", heading, output)
    }
}

/// Drop lines produced by the script wrapper or the scope runner
pub fn filter_noise(text: &str) -> String {
    let kept: Vec<&str> = text.lines().filter(|line| !is_noise_line(line)).collect();
    kept.join("\n").trim_end().to_string()
}

fn is_noise_line(line: &str) -> bool {
    line.starts_with("Running scope as unit")
        || line.starts_with("Running as unit")
        || is_script_diagnostic(line)
}

/// `execute.sh: line 7: ...` or `/home/x/work/execute.sh: line 7: ...`
fn is_script_diagnostic(line: &str) -> bool {
    let Some(at) = line.find(SCRIPT_FILE_NAME) else {
        return false;
    };
    let prefix = &line[..at];
    if !(prefix.is_empty() || prefix.ends_with('/')) || prefix.contains(char::is_whitespace) {
        return false;
    }
    let Some(rest) = line[at + SCRIPT_FILE_NAME.len()..].strip_prefix(": line ") else {
        return false;
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    !digits.is_empty() && rest[digits.len()..].starts_with(':')
}
