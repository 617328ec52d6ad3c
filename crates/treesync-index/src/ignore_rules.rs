//! Ignore-pattern rules consulted while enumerating a source tree.

use std::path::Path;

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::debug;

/// Directory names that are never descended into, regardless of rules.
pub const CONTROL_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Answers whether a root-relative path is excluded from enumeration.
pub trait IgnoreRules: Send + Sync {
    fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool;
}

/// Rules that exclude nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIgnore;

impl IgnoreRules for NoIgnore {
    fn is_ignored(&self, _relative: &Path, _is_dir: bool) -> bool {
        false
    }
}

/// Rules read from the `.gitignore` at the root of the tree.
pub struct GitignoreRules {
    matcher: Gitignore,
}

impl GitignoreRules {
    /// Load `<root>/.gitignore`. A missing file yields rules that match nothing.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(".gitignore");
        let mut builder = GitignoreBuilder::new(root);
        if path.is_file() {
            if let Some(err) = builder.add(&path) {
                return Err(err).with_context(|| format!("Failed to read {:?}", path));
            }
            debug!("Loaded ignore rules from {:?}", path);
        }
        let matcher = builder.build().context("Failed to build ignore rules")?;
        Ok(Self { matcher })
    }

    /// Build rules from in-memory gitignore lines.
    pub fn from_lines<'a>(root: &Path, lines: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for line in lines {
            builder
                .add_line(None, line)
                .with_context(|| format!("Invalid ignore pattern: {}", line))?;
        }
        let matcher = builder.build().context("Failed to build ignore rules")?;
        Ok(Self { matcher })
    }
}

impl IgnoreRules for GitignoreRules {
    fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        self.matcher.matched(relative, is_dir).is_ignore()
    }
}
