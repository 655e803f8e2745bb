use crate::config::types::{Language, ResourceLimits};
use crate::judge::adapter::{path_arg, LanguageAdapter};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct PythonAdapter;

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn source_file_name(&self, _source: &str) -> String {
        "solution.py".to_string()
    }

    fn compile_command(&self, _source_path: &Path) -> Option<Vec<String>> {
        None
    }

    fn run_command(&self, source_path: &Path, _limits: &ResourceLimits) -> Vec<String> {
        // -u: output written before a forced kill must still reach the collector
        vec![
            "/usr/bin/python3".to_string(),
            "-B".to_string(),
            "-u".to_string(),
            path_arg(source_path),
        ]
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["/usr/bin/python3"]
    }
}
