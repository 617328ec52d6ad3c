//! Chunk records: the atomic unit stored in the manifest and the vector index.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{TREE_LANG, TREE_UNIT};

/// One derived, independently retrievable span of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Source tree this chunk belongs to
    pub tree_id: String,

    /// Owning unit (root-relative path, or the directory-structure unit)
    pub file_path: String,

    /// Globally unique identity, `"{file_path}-{ordinal}"`
    pub chunk_id: String,

    /// Position of the chunk within its unit, starting at 0
    pub ordinal: usize,

    /// Language tag
    pub lang: String,

    /// First line of the span (1-indexed), when known
    pub start_line: Option<usize>,

    /// Last line of the span (1-indexed), when known
    pub end_line: Option<usize>,

    /// Raw content of the span
    pub content: String,

    /// One-sentence summary from the enrichment service
    #[serde(default)]
    pub summary: String,

    /// Keywords from the enrichment service
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Chunk {
    /// Deterministic identity for the `ordinal`-th chunk of `file_path`.
    pub fn make_id(file_path: &str, ordinal: usize) -> String {
        format!("{}-{}", file_path, ordinal)
    }

    /// The single chunk wrapping the directory-structure listing verbatim.
    pub fn tree(tree_id: &str, listing: &str) -> Self {
        let lines = listing.lines().count();
        Self {
            tree_id: tree_id.to_string(),
            file_path: TREE_UNIT.to_string(),
            chunk_id: Self::make_id(TREE_UNIT, 0),
            ordinal: 0,
            lang: TREE_LANG.to_string(),
            start_line: Some(1),
            end_line: Some(lines.max(1)),
            content: listing.to_string(),
            summary: String::new(),
            keywords: Vec::new(),
        }
    }

    /// Text handed to the vector index: content, summary and keywords.
    pub fn index_text(&self) -> String {
        let mut text = String::with_capacity(self.content.len() + self.summary.len() + 32);
        text.push_str(&self.content);
        if !self.summary.is_empty() {
            text.push('\n');
            text.push_str(&self.summary);
        }
        if !self.keywords.is_empty() {
            text.push('\n');
            text.push_str(&self.keywords.join(", "));
        }
        text
    }

    /// Every field except `content`, as stored next to the vector.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "tree_id": self.tree_id,
            "file_path": self.file_path,
            "chunk_id": self.chunk_id,
            "ordinal": self.ordinal,
            "lang": self.lang,
            "start_line": self.start_line,
            "end_line": self.end_line,
            "summary": self.summary,
            "keywords": self.keywords,
        })
    }
}

/// Map a unit path to a language tag by extension.
pub fn detect_language(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("py") => "python",
        Some("js") | Some("jsx") => "javascript",
        Some("ts") | Some("tsx") => "typescript",
        Some("java") => "java",
        Some("rs") => "rust",
        Some("go") => "go",
        Some("c") | Some("h") => "c",
        Some("cpp") | Some("cc") | Some("hpp") => "cpp",
        Some("md") | Some("txt") => "markdown",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Chunk {
        Chunk {
            tree_id: "repo".to_string(),
            file_path: "src/app.py".to_string(),
            chunk_id: Chunk::make_id("src/app.py", 2),
            ordinal: 2,
            lang: "python".to_string(),
            start_line: Some(10),
            end_line: Some(20),
            content: "def run():\n    pass".to_string(),
            summary: "Runs the app.".to_string(),
            keywords: vec!["run".to_string(), "app".to_string()],
        }
    }

    #[test]
    fn test_make_id_includes_full_path() {
        assert_eq!(Chunk::make_id("a/mod.py", 0), "a/mod.py-0");
        assert_ne!(Chunk::make_id("a/mod.py", 0), Chunk::make_id("b/mod.py", 0));
    }

    #[test]
    fn test_index_text() {
        assert_eq!(
            sample().index_text(),
            "def run():\n    pass\nRuns the app.\nrun, app"
        );
    }

    #[test]
    fn test_metadata_excludes_content() {
        let meta = sample().metadata();
        assert_eq!(meta["file_path"], "src/app.py");
        assert_eq!(meta["chunk_id"], "src/app.py-2");
        assert!(meta.get("content").is_none());
    }

    #[test]
    fn test_tree_chunk() {
        let chunk = Chunk::tree("repo", "./\n    a.py\n");
        assert_eq!(chunk.file_path, TREE_UNIT);
        assert_eq!(chunk.lang, TREE_LANG);
        assert_eq!(chunk.content, "./\n    a.py\n");
        assert_eq!(chunk.end_line, Some(2));
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("a.py"), "python");
        assert_eq!(detect_language("docs/README.MD"), "markdown");
        assert_eq!(detect_language("Main.java"), "java");
        assert_eq!(detect_language("Makefile"), "unknown");
    }
}
