use crate::config::config::EngineConfig;
use crate::config::presets::LimitPolicy;
use crate::config::types::{ExecutionRequest, ExecutionResult, Language};
use crate::core::orchestrator::Executor;
use crate::judge::registry::adapter_for;
use crate::kernel::scope::detect_cgroup_version;
use crate::kernel::signal::{self, SignalHandler};
use crate::utils::command::run_with_timeout;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Run untrusted code as disposable OS accounts", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON); falls back to $USERBOX_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one program and print the result as JSON
    Execute {
        /// Programming language (javascript, python, java, cpp, c)
        #[arg(long)]
        language: String,
        /// Source code as string
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,
        /// Read source code from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Input data to pass to stdin
        #[arg(long, conflicts_with = "stdin_file")]
        stdin: Option<String>,
        /// Read stdin data from a file
        #[arg(long)]
        stdin_file: Option<PathBuf>,
    },
    /// Execute a JSON array of requests concurrently, print a JSON array of results
    Batch {
        /// File holding `[{"source": ..., "language": ..., "stdin": ...}, ...]`; `-` for stdin
        #[arg(long)]
        input: PathBuf,
        /// Requests in flight at once
        #[arg(long, default_value_t = 4)]
        parallel: usize,
    },
    /// List supported languages and their limits
    Languages,
    /// Delete accounts left behind by crashed runs
    Sweep,
    /// Check if language toolchains and sandbox tools are installed
    CheckDeps {
        /// Show tool versions
        #[arg(long, short)]
        verbose: bool,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Execute {
            language,
            code,
            file,
            stdin,
            stdin_file,
        } => {
            warn_if_not_root();
            let source = match (code, file) {
                (Some(code), _) => code,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading source {}", path.display()))?,
                (None, None) => bail!("either --code or --file is required"),
            };
            let stdin = match (stdin, stdin_file) {
                (Some(data), _) => Some(data),
                (None, Some(path)) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("reading stdin {}", path.display()))?,
                ),
                (None, None) => None,
            };

            let _signals = SignalHandler::init().map_err(anyhow::Error::msg)?;
            let executor = Executor::from_config(config)?;
            let request = ExecutionRequest {
                source,
                language,
                stdin,
            };
            let result = executor
                .execute(&request)
                .unwrap_or_else(|e| ExecutionResult::internal_error(e));

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Batch { input, parallel } => {
            warn_if_not_root();
            let requests = read_batch(&input)?;
            let _signals = SignalHandler::init().map_err(anyhow::Error::msg)?;
            let executor = Executor::from_config(config)?;
            let results = run_batch(&executor, requests, parallel.max(1));
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Commands::Languages => {
            let policy = LimitPolicy::with_overrides(&config.limits);
            for language in Language::all() {
                let limits = policy.limits_for(language);
                println!(
                    "{:<12} {:<22} mem={}MB cpu={}s procs={} file={}KB",
                    language.id(),
                    language.display_name(),
                    limits.memory_mb(),
                    limits.cpu_seconds,
                    limits.max_processes,
                    limits.max_file_bytes / 1024
                );
            }
            Ok(())
        }
        Commands::Sweep => {
            warn_if_not_root();
            let executor = Executor::from_config(config)?;
            let report = executor.sweep_stale_accounts();
            for account in &report.removed {
                println!("removed {}", account);
            }
            for account in &report.skipped {
                println!("skipped {} (home outside {})", account, executor.config().home_root.display());
            }
            for (account, error) in &report.failed {
                eprintln!("failed {}: {}", account, error);
            }
            if !report.failed.is_empty() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::CheckDeps { verbose } => check_dependencies(&config, verbose),
    }
}

fn read_batch(input: &Path) -> Result<Vec<ExecutionRequest>> {
    let content = if input == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("reading batch from stdin")?
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading batch {}", input.display()))?
    };
    serde_json::from_str(&content).context("parsing batch JSON")
}

fn run_batch<A, L>(
    executor: &Executor<A, L>,
    requests: Vec<ExecutionRequest>,
    parallel: usize,
) -> Vec<ExecutionResult>
where
    A: crate::kernel::accounts::AccountDirectory,
    L: crate::exec::runner::SandboxLauncher,
{
    let total = requests.len();
    let (work_tx, work_rx) = unbounded();
    let (done_tx, done_rx) = unbounded();
    for item in requests.into_iter().enumerate() {
        let _ = work_tx.send(item);
    }
    drop(work_tx);

    std::thread::scope(|scope| {
        for _ in 0..parallel.min(total.max(1)) {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move || {
                for (index, request) in work_rx.iter() {
                    let result = if signal::should_continue() {
                        executor
                            .execute(&request)
                            .unwrap_or_else(|e| ExecutionResult::internal_error(e))
                    } else {
                        ExecutionResult::internal_error("not started: shutdown requested")
                    };
                    let _ = done_tx.send((index, result));
                }
            });
        }
    });
    drop(done_tx);

    let mut slots: Vec<Option<ExecutionResult>> = vec![None; total];
    for (index, result) in done_rx.iter() {
        slots[index] = Some(result);
    }
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| ExecutionResult::internal_error("no result produced")))
        .collect()
}

fn warn_if_not_root() {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("⚠️  Warning: not running as root");
        eprintln!("   Creating accounts and launching scopes will fail");
    }
}

fn find_in_path(tool: &str) -> Option<PathBuf> {
    ["/usr/sbin", "/usr/bin", "/sbin", "/bin", "/usr/local/bin"]
        .iter()
        .map(|dir| Path::new(dir).join(tool))
        .find(|candidate| candidate.exists())
}

fn tool_version(tool: &Path) -> String {
    match run_with_timeout(&tool.to_string_lossy(), &["--version"], Duration::from_secs(10)) {
        Ok(output) => {
            let text = if output.stdout.trim().is_empty() {
                output.stderr
            } else {
                output.stdout
            };
            text.lines().next().unwrap_or("").trim().to_string()
        }
        Err(e) => format!("FAILED ({})", e),
    }
}

/// Check toolchains per language plus the account and scope tooling
fn check_dependencies(config: &EngineConfig, verbose: bool) -> Result<()> {
    println!("🔍 Checking dependencies...");
    println!();

    let mut missing = Vec::new();

    for language in Language::all() {
        let tools = adapter_for(language).required_tools();
        let absent: Vec<&str> = tools.iter().copied().filter(|t| !Path::new(t).exists()).collect();
        if absent.is_empty() {
            println!("✅ {} - OK", language.display_name());
        } else {
            println!("❌ {} - MISSING {}", language.display_name(), absent.join(", "));
            missing.push(language.display_name().to_string());
        }
        if verbose {
            for tool in tools.iter().filter(|t| Path::new(t).exists()) {
                println!("  {} -> {}", tool, tool_version(Path::new(tool)));
            }
        }
    }

    println!();
    for tool in ["useradd", "userdel", "pkill"] {
        match find_in_path(tool) {
            Some(path) => println!("✅ {} - {}", tool, path.display()),
            None => {
                println!("❌ {} - NOT FOUND", tool);
                missing.push(tool.to_string());
            }
        }
    }

    if config.scope.enabled {
        let runner = &config.scope.systemd_run;
        match (runner.exists(), detect_cgroup_version()) {
            (true, Some(version)) => {
                println!("✅ execution scope - {} (cgroup {:?})", runner.display(), version)
            }
            (present, version) => {
                println!(
                    "⚠️  execution scope unavailable (systemd-run present: {}, cgroup: {:?}); ulimit only",
                    present, version
                );
            }
        }
    } else {
        println!("⚠️  execution scope disabled by configuration; ulimit only");
    }

    println!();
    if missing.is_empty() {
        println!("🎉 All dependencies are installed!");
        Ok(())
    } else {
        println!("❌ Missing: {}", missing.join(", "));
        std::process::exit(1);
    }
}
