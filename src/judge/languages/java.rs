use crate::config::types::{Language, ResourceLimits};
use crate::judge::adapter::{path_arg, LanguageAdapter};
use std::path::Path;

const DEFAULT_CLASS: &str = "Main";

#[derive(Debug, Clone, Default)]
pub struct JavaAdapter;

/// Name of the first top-level `public class`, or `Main`
pub fn detect_class_name(source: &str) -> String {
    for line in source.lines() {
        let Some(mut rest) = line.trim().strip_prefix("public ") else {
            continue;
        };
        for modifier in ["final ", "abstract ", "static "] {
            rest = rest.trim_start().strip_prefix(modifier).unwrap_or(rest);
        }
        let Some(rest) = rest.trim_start().strip_prefix("class ") else {
            continue;
        };
        let name: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        if name.chars().next().map_or(false, |c| !c.is_ascii_digit()) {
            return name;
        }
    }
    DEFAULT_CLASS.to_string()
}

/// JVM heap cap: a third of the scope ceiling leaves room for metaspace and threads
fn heap_mb(limits: &ResourceLimits) -> u64 {
    (limits.memory_mb() / 3).max(32)
}

impl LanguageAdapter for JavaAdapter {
    fn language(&self) -> Language {
        Language::Java
    }

    fn source_file_name(&self, source: &str) -> String {
        format!("{}.java", detect_class_name(source))
    }

    fn compile_command(&self, source_path: &Path) -> Option<Vec<String>> {
        Some(vec![
            "/usr/bin/javac".to_string(),
            "-J-Xmx256m".to_string(),
            "-encoding".to_string(),
            "UTF-8".to_string(),
            path_arg(source_path),
        ])
    }

    fn run_command(&self, source_path: &Path, limits: &ResourceLimits) -> Vec<String> {
        let class_dir = source_path.parent().unwrap_or_else(|| Path::new("."));
        let class_name = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_CLASS.to_string());

        vec![
            "/usr/bin/java".to_string(),
            format!("-Xmx{}m", heap_mb(limits)),
            "-Xss1m".to_string(),
            "-XX:+UseSerialGC".to_string(),
            "-Dfile.encoding=UTF-8".to_string(),
            "-cp".to_string(),
            path_arg(class_dir),
            class_name,
        ]
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["/usr/bin/javac", "/usr/bin/java"]
    }
}
