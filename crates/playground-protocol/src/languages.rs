//! Languages offered by the reference execution service
//!
//! The language tag stays opaque to the client: the service is the only
//! authority on what it accepts. This table only powers listings and
//! extension-based inference.

/// A language the reference service is known to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageInfo {
    /// Tag sent on the wire
    pub id: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// Source file extensions, without the dot
    pub extensions: &'static [&'static str],
}

pub const KNOWN_LANGUAGES: &[LanguageInfo] = &[
    LanguageInfo {
        id: "c",
        name: "C",
        extensions: &["c"],
    },
    LanguageInfo {
        id: "cpp",
        name: "C++",
        extensions: &["cpp", "cc", "cxx"],
    },
    LanguageInfo {
        id: "python3",
        name: "Python",
        extensions: &["py"],
    },
    LanguageInfo {
        id: "javascript",
        name: "JavaScript",
        extensions: &["js", "mjs"],
    },
    LanguageInfo {
        id: "java",
        name: "Java",
        extensions: &["java"],
    },
    LanguageInfo {
        id: "bash",
        name: "Bash",
        extensions: &["sh", "bash"],
    },
];

/// Find a known language by its wire tag
pub fn lookup_language(id: &str) -> Option<&'static LanguageInfo> {
    KNOWN_LANGUAGES.iter().find(|l| l.id == id)
}

/// Infer the language tag from a file extension (case-insensitive, no dot)
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_ascii_lowercase();
    KNOWN_LANGUAGES
        .iter()
        .find(|l| l.extensions.contains(&ext.as_str()))
        .map(|l| l.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_from_extension() {
        assert_eq!(language_for_extension("py"), Some("python3"));
        assert_eq!(language_for_extension("CPP"), Some("cpp"));
        assert_eq!(language_for_extension("rs"), None);
    }

    #[test]
    fn lookup_by_tag() {
        assert_eq!(lookup_language("java").map(|l| l.name), Some("Java"));
        assert!(lookup_language("Python").is_none());
    }
}
