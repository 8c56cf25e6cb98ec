use std::path::PathBuf;

/// Type name used when the source declares no class
pub const FALLBACK_TYPE_NAME: &str = "Main";

const PACKAGE_KEYWORD: &str = "package";
const TYPE_KEYWORD: &str = "class";

/// Package and primary type of one compilation unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitIdentity {
    /// Dotted package name; empty for the root namespace
    pub package_name: String,
    pub type_name: String,
}

impl UnitIdentity {
    pub fn new(package_name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            type_name: type_name.into(),
        }
    }

    /// Fully-qualified name used as the program's entry point
    pub fn qualified_name(&self) -> String {
        if self.package_name.is_empty() {
            self.type_name.clone()
        } else {
            format!("{}.{}", self.package_name, self.type_name)
        }
    }

    /// Relative directory of the package, e.g. `com/example` for `com.example`
    pub fn package_path(&self) -> PathBuf {
        self.package_name
            .split('.')
            .filter(|segment| !segment.is_empty())
            .collect()
    }
}

/// Derives a [`UnitIdentity`] from raw source text. Never fails: missing
/// declarations resolve to defaults.
pub trait SourceAnalyzer: Send + Sync {
    fn analyze(&self, source: &str) -> UnitIdentity;
}

/// Line-oriented keyword scan, no tokenizer.
///
/// Known limitation: a `class` token inside a comment or string literal that
/// precedes the real declaration wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextualAnalyzer;

impl SourceAnalyzer for TextualAnalyzer {
    fn analyze(&self, source: &str) -> UnitIdentity {
        UnitIdentity {
            package_name: extract_package_name(source),
            type_name: extract_type_name(source),
        }
    }
}

/// First `package x.y.z;` line wins; later ones are ignored
fn extract_package_name(source: &str) -> String {
    for line in source.lines() {
        let Some(rest) = line.trim().strip_prefix(PACKAGE_KEYWORD) else {
            continue;
        };
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let declared = rest.split(';').next().unwrap_or_default().trim();
        return declared.to_string();
    }
    String::new()
}

fn extract_type_name(source: &str) -> String {
    for line in source.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        for pair in tokens.windows(2) {
            if pair[0] != TYPE_KEYWORD {
                continue;
            }
            let name: String = pair[1].chars().take_while(|c| is_identifier_part(*c)).collect();
            if !name.is_empty() {
                return name;
            }
        }
    }
    FALLBACK_TYPE_NAME.to_string()
}

/// Whether `name` is a single Java identifier (no dots, no separators)
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(is_identifier_part)
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
