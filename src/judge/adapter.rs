use crate::config::types::{Language, ResourceLimits};
use std::path::Path;

/// Compile and run argument vectors for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

/// Language adapter contract.
///
/// Commands are argument vectors with absolute tool paths. Request data never
/// appears in them; the source reaches the toolchain only as a file.
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> Language;

    /// File name the source is written under inside the working directory
    fn source_file_name(&self, source: &str) -> String;

    fn compile_command(&self, source_path: &Path) -> Option<Vec<String>>;

    fn run_command(&self, source_path: &Path, limits: &ResourceLimits) -> Vec<String>;

    /// Executables the adapter invokes, for dependency checks
    fn required_tools(&self) -> &'static [&'static str];

    fn plan(&self, source_path: &Path, limits: &ResourceLimits) -> CommandPlan {
        CommandPlan {
            compile: self.compile_command(source_path),
            run: self.run_command(source_path, limits),
        }
    }
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Native binary produced next to the source by compiled languages
pub(crate) fn binary_path(source_path: &Path) -> String {
    path_arg(&source_path.with_file_name("solution"))
}
