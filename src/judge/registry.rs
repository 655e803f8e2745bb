use crate::config::types::Language;
use crate::judge::adapter::LanguageAdapter;
use crate::judge::languages::{
    c::CAdapter, cpp::CppAdapter, java::JavaAdapter, javascript::JavaScriptAdapter,
    python::PythonAdapter,
};

static JAVASCRIPT: JavaScriptAdapter = JavaScriptAdapter;
static PYTHON: PythonAdapter = PythonAdapter;
static JAVA: JavaAdapter = JavaAdapter;
static CPP: CppAdapter = CppAdapter;
static C: CAdapter = CAdapter;

/// Adding a language means adding a variant, a limits entry and an adapter here
pub fn adapter_for(language: Language) -> &'static dyn LanguageAdapter {
    match language {
        Language::JavaScript => &JAVASCRIPT,
        Language::Python => &PYTHON,
        Language::Java => &JAVA,
        Language::Cpp => &CPP,
        Language::C => &C,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_total() {
        for language in Language::all() {
            assert_eq!(adapter_for(language).language(), language);
        }
    }

    #[test]
    fn test_interpreted_languages_have_no_compile_step() {
        let limits = crate::config::presets::LimitPolicy::new();
        for language in Language::all() {
            let adapter = adapter_for(language);
            let source = std::path::Path::new("/home/ubxtest/work").join(adapter.source_file_name(""));
            let plan = adapter.plan(&source, &limits.limits_for(language));
            assert_eq!(plan.compile.is_some(), language.is_compiled(), "{}", language);
            assert!(!plan.run.is_empty());
        }
    }
}
