//! Exclude-pattern matching (spec.md §4.1).
//!
//! A path matches the exclusion set when its final component equals any
//! pattern string verbatim, or the full logical path matches any pattern as
//! a shell-style glob. Matching is case-sensitive and evaluated against the
//! logical (not filesystem-resolved) path — no `canonicalize` here.

use std::path::Path;

use glob::Pattern;

/// A compiled set of exclusion patterns.
pub struct ExcludeMatcher {
    literals: Vec<String>,
    globs: Vec<Pattern>,
}

impl ExcludeMatcher {
    /// Compile `patterns` into a matcher. Patterns that fail to parse as a
    /// glob are kept as literal-only matches (final-component comparison
    /// still applies).
    pub fn new(patterns: &[String]) -> Self {
        let mut literals = Vec::with_capacity(patterns.len());
        let mut globs = Vec::with_capacity(patterns.len());

        for pat in patterns {
            literals.push(pat.clone());
            if let Ok(g) = Pattern::new(pat) {
                globs.push(g);
            }
        }

        ExcludeMatcher { literals, globs }
    }

    /// True if `path` (the logical, relative-or-absolute path under
    /// consideration) should be excluded.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if self.literals.iter().any(|lit| lit == name) {
                return true;
            }
        }

        let path_str = path.to_string_lossy();
        self.globs.iter().any(|g| g.matches(&path_str))
    }
}
