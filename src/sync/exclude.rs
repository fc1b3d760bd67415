//! Exclude patterns for publish runs.
//!
//! Keys matching a pattern are ignored on both sides: the local file is not
//! uploaded and a remote object with that key is neither matched nor deleted.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};

use crate::error::{Result, SyncError};

/// Pattern matching for object keys.
#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    /// Compiled glob set for matching.
    glob_set: GlobSet,
    /// Raw pattern strings (for display/logging).
    patterns: Vec<String>,
}

impl Default for ExcludePatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl ExcludePatterns {
    /// Create an empty pattern set that excludes nothing.
    pub fn new() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Compile a list of glob patterns.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let glob = Glob::new(pattern).map_err(|e| {
                SyncError::config(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
            pattern_list.push(pattern.to_string());
        }

        let glob_set = builder
            .build()
            .map_err(|e| SyncError::config(format!("Invalid exclude patterns: {}", e)))?;

        Ok(Self {
            glob_set,
            patterns: pattern_list,
        })
    }

    /// Check if a key should be excluded.
    ///
    /// The full key is tried first, then each path component, so a bare
    /// name like `.DS_Store` or `drafts` matches at any depth.
    pub fn is_excluded(&self, key: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        if self.glob_set.is_match(key) {
            return true;
        }

        Path::new(key).components().any(|component| match component {
            Component::Normal(name) => self.glob_set.is_match(name.to_string_lossy().as_ref()),
            _ => false,
        })
    }

    /// Get the list of patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
