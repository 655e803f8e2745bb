use crate::config::types::{Language, ResourceLimits};
use crate::judge::adapter::{binary_path, path_arg, LanguageAdapter};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct CAdapter;

impl LanguageAdapter for CAdapter {
    fn language(&self) -> Language {
        Language::C
    }

    fn source_file_name(&self, _source: &str) -> String {
        "solution.c".to_string()
    }

    fn compile_command(&self, source_path: &Path) -> Option<Vec<String>> {
        Some(vec![
            "/usr/bin/gcc".to_string(),
            "-std=c11".to_string(),
            "-O2".to_string(),
            "-pipe".to_string(),
            "-o".to_string(),
            binary_path(source_path),
            path_arg(source_path),
            "-lm".to_string(),
        ])
    }

    fn run_command(&self, source_path: &Path, _limits: &ResourceLimits) -> Vec<String> {
        vec![binary_path(source_path)]
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["/usr/bin/gcc"]
    }
}
