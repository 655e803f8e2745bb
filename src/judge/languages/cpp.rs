use crate::config::types::{Language, ResourceLimits};
use crate::judge::adapter::{binary_path, path_arg, LanguageAdapter};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct CppAdapter;

impl LanguageAdapter for CppAdapter {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn source_file_name(&self, _source: &str) -> String {
        "solution.cpp".to_string()
    }

    fn compile_command(&self, source_path: &Path) -> Option<Vec<String>> {
        Some(vec![
            "/usr/bin/g++".to_string(),
            "-std=c++17".to_string(),
            "-O2".to_string(),
            "-pipe".to_string(),
            "-o".to_string(),
            binary_path(source_path),
            path_arg(source_path),
        ])
    }

    fn run_command(&self, source_path: &Path, _limits: &ResourceLimits) -> Vec<String> {
        vec![binary_path(source_path)]
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["/usr/bin/g++"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::LimitPolicy;

    #[test]
    fn test_cpp_compiles_to_solution_binary() {
        let source = Path::new("/home/ubxa/work/solution.cpp");
        let compile = CppAdapter.compile_command(source).unwrap();
        assert_eq!(compile[0], "/usr/bin/g++");
        assert!(compile.contains(&"-std=c++17".to_string()));
        assert_eq!(compile.last().unwrap(), "/home/ubxa/work/solution.cpp");

        let run = CppAdapter.run_command(source, &LimitPolicy::new().limits_for(Language::Cpp));
        assert_eq!(run, vec!["/home/ubxa/work/solution".to_string()]);
    }
}
