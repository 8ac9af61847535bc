use crate::types::Language;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DEF_NAME: Regex =
        Regex::new(r"\bdef\s+([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid def regex");
    static ref CLASS_NAME: Regex =
        Regex::new(r"\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)").expect("Invalid class regex");
    static ref FUNCTION_NAME: Regex =
        Regex::new(r"\bfunction\b\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)").expect("Invalid function regex");
}

/// Patterns tried in order for each language; the first one with a match wins.
fn name_patterns(language: Language) -> &'static [&'static Regex] {
    lazy_static! {
        static ref PYTHON: Vec<&'static Regex> = vec![&*DEF_NAME, &*CLASS_NAME];
        static ref SCRIPT: Vec<&'static Regex> = vec![&*FUNCTION_NAME, &*CLASS_NAME];
        static ref JAVA: Vec<&'static Regex> = vec![&*CLASS_NAME];
    }
    match language {
        Language::Python => PYTHON.as_slice(),
        Language::Javascript | Language::Typescript => SCRIPT.as_slice(),
        Language::Java => JAVA.as_slice(),
        _ => &[],
    }
}

/// Finds the declared name a snippet should be saved under, if any.
pub fn declared_name(code: &str, language: Language) -> Option<String> {
    name_patterns(language).iter().find_map(|pattern| {
        pattern
            .captures(code)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Builds `<name>.<ext>` from the code, or `snippet_<n>.<ext>` when no name is declared.
pub fn derive_filename(code: &str, language: Language, fallback_index: u64) -> String {
    match declared_name(code, language) {
        Some(name) => format!("{}.{}", name, language.extension()),
        None => format!("snippet_{}.{}", fallback_index, language.extension()),
    }
}
