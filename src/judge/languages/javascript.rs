use crate::config::types::{Language, ResourceLimits};
use crate::judge::adapter::{path_arg, LanguageAdapter};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct JavaScriptAdapter;

impl LanguageAdapter for JavaScriptAdapter {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn source_file_name(&self, _source: &str) -> String {
        "solution.js".to_string()
    }

    fn compile_command(&self, _source_path: &Path) -> Option<Vec<String>> {
        None
    }

    fn run_command(&self, source_path: &Path, limits: &ResourceLimits) -> Vec<String> {
        // V8 heap gets half the scope ceiling
        let heap_mb = (limits.memory_mb() / 2).max(16);
        vec![
            "/usr/bin/node".to_string(),
            format!("--max-old-space-size={}", heap_mb),
            path_arg(source_path),
        ]
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["/usr/bin/node"]
    }
}
