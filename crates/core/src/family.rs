//! Content-family classification.
//!
//! Every generated path is assigned exactly one family, inferred once from
//! its extension. The family decides which merge strategy the structural
//! differencer runs; dispatch is by exhaustive match, never by inspecting
//! content at merge time.

use std::path::Path;

/// The merge strategy family for a generated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentFamily {
    /// Parseable source code, merged at top-level declaration granularity.
    SourceCode,
    /// Key-ordered structured documents (JSON, YAML), merged key-wise.
    StructuredData,
    /// Everything else, merged as a line-based patch.
    FreeText,
}

impl ContentFamily {
    /// Infer the family from a relative path's extension.
    ///
    /// Unrecognized or missing extensions fall back to [`Self::FreeText`],
    /// the safest strategy.
    pub fn from_path(rel_path: &str) -> Self {
        let ext = match Path::new(rel_path).extension().and_then(|e| e.to_str()) {
            Some(ext) => ext,
            None => return Self::FreeText,
        };
        match ext {
            "rs" | "py" | "ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" | "go" => Self::SourceCode,
            "json" | "yaml" | "yml" => Self::StructuredData,
            _ => Self::FreeText,
        }
    }
}

impl std::fmt::Display for ContentFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceCode => write!(f, "source-code"),
            Self::StructuredData => write!(f, "structured-data"),
            Self::FreeText => write!(f, "free-text"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_extensions() {
        assert_eq!(ContentFamily::from_path("src/client.rs"), ContentFamily::SourceCode);
        assert_eq!(ContentFamily::from_path("sdk/models.py"), ContentFamily::SourceCode);
        assert_eq!(ContentFamily::from_path("api/index.ts"), ContentFamily::SourceCode);
        assert_eq!(ContentFamily::from_path("pkg/types.go"), ContentFamily::SourceCode);
    }

    #[test]
    fn test_structured_extensions() {
        assert_eq!(
            ContentFamily::from_path("package.json"),
            ContentFamily::StructuredData
        );
        assert_eq!(
            ContentFamily::from_path("config/openapi.yaml"),
            ContentFamily::StructuredData
        );
        assert_eq!(ContentFamily::from_path("ci.yml"), ContentFamily::StructuredData);
    }

    #[test]
    fn test_free_text_fallback() {
        assert_eq!(ContentFamily::from_path("README.md"), ContentFamily::FreeText);
        assert_eq!(ContentFamily::from_path("LICENSE"), ContentFamily::FreeText);
        assert_eq!(ContentFamily::from_path("notes.txt"), ContentFamily::FreeText);
        assert_eq!(ContentFamily::from_path("Makefile"), ContentFamily::FreeText);
    }

    #[test]
    fn test_display() {
        assert_eq!(ContentFamily::SourceCode.to_string(), "source-code");
        assert_eq!(ContentFamily::StructuredData.to_string(), "structured-data");
        assert_eq!(ContentFamily::FreeText.to_string(), "free-text");
    }
}
