/// Resource-Limit Policy
///
/// Fixed per-language ceilings. One record per language, never mutated per
/// request. Operators may replace individual records through the engine
/// configuration; requests never can.
use crate::config::types::{Language, ResourceLimits};
use std::collections::HashMap;

const MIB: u64 = 1024 * 1024;

/// CPU seconds for every built-in language. Kept above the default wall-clock
/// bound so a busy loop ends as a timeout, not as a CPU-limit kill.
const CPU_SECONDS: u64 = 20;

/// Language -> limits registry
#[derive(Debug, Clone)]
pub struct LimitPolicy {
    limits: HashMap<Language, ResourceLimits>,
}

impl LimitPolicy {
    /// Registry with the built-in ceilings for every supported language
    pub fn new() -> Self {
        let mut policy = Self {
            limits: HashMap::new(),
        };

        // V8 reserves well beyond its heap, so the scope cap is double the heap flag
        policy.register(
            Language::JavaScript,
            ResourceLimits {
                memory_bytes: 512 * MIB,
                cpu_seconds: CPU_SECONDS,
                max_processes: 64,
                max_file_bytes: MIB,
            },
        );
        policy.register(
            Language::Python,
            ResourceLimits {
                memory_bytes: 256 * MIB,
                cpu_seconds: CPU_SECONDS,
                max_processes: 64,
                max_file_bytes: MIB,
            },
        );
        // JVM: javac and java both spawn many threads, RLIMIT_NPROC counts them
        policy.register(
            Language::Java,
            ResourceLimits {
                memory_bytes: 768 * MIB,
                cpu_seconds: CPU_SECONDS,
                max_processes: 256,
                max_file_bytes: 16 * MIB,
            },
        );
        policy.register(
            Language::Cpp,
            ResourceLimits {
                memory_bytes: 256 * MIB,
                cpu_seconds: CPU_SECONDS,
                max_processes: 64,
                max_file_bytes: 16 * MIB,
            },
        );
        policy.register(
            Language::C,
            ResourceLimits {
                memory_bytes: 256 * MIB,
                cpu_seconds: CPU_SECONDS,
                max_processes: 64,
                max_file_bytes: 16 * MIB,
            },
        );

        policy
    }

    /// Built-in registry with operator overrides applied on top
    pub fn with_overrides(overrides: &HashMap<Language, ResourceLimits>) -> Self {
        let mut policy = Self::new();
        for (language, limits) in overrides {
            log::info!("Overriding resource limits for {}: {:?}", language, limits);
            policy.register(*language, *limits);
        }
        policy
    }

    fn register(&mut self, language: Language, limits: ResourceLimits) {
        self.limits.insert(language, limits);
    }

    /// Limits for a language. Total over the closed language set.
    pub fn limits_for(&self, language: Language) -> ResourceLimits {
        match self.limits.get(&language) {
            Some(limits) => *limits,
            None => builtin_fallback(),
        }
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// Every language is registered in `new`; this only guards against a future
// variant being added without an entry.
fn builtin_fallback() -> ResourceLimits {
    ResourceLimits {
        memory_bytes: 256 * MIB,
        cpu_seconds: CPU_SECONDS,
        max_processes: 64,
        max_file_bytes: MIB,
    }
}
