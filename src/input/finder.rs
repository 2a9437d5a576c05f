// SPDX-License-Identifier: Apache-2.0

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

const GLOB_META: &[char] = &['*', '?', '[', '{'];

/// FileFinder finds files matching include patterns while excluding others
#[derive(Debug, Clone)]
pub struct FileFinder {
    roots: Vec<WalkRoot>,
    include: GlobSet,
    exclude: GlobSet,
}

/// Literal directory prefix of an include pattern and how deep below it a match can be
#[derive(Debug, Clone, PartialEq, Eq)]
struct WalkRoot {
    base: PathBuf,
    max_depth: Option<usize>,
}

impl FileFinder {
    /// Compile the include and exclude patterns. Fails on the first invalid pattern.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let mut roots = Vec::with_capacity(include.len());
        for pattern in include {
            let root = WalkRoot::for_pattern(pattern);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        Ok(Self {
            roots,
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    /// Find all files matching the include patterns, excluding those matching exclude
    /// patterns. The result is sorted and free of duplicates.
    pub fn find_files(&self) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();

        for root in &self.roots {
            let relative = root.base.as_os_str().is_empty();
            let start = if relative { Path::new(".") } else { root.base.as_path() };

            let mut walker = WalkDir::new(start).min_depth(1);
            if let Some(depth) = root.max_depth {
                walker = walker.max_depth(depth);
            }

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!(base = %start.display(), error = %e, "Skipping unreadable path");
                        continue;
                    }
                };

                let is_file = entry.file_type().is_file()
                    || (entry.path_is_symlink() && entry.path().is_file());
                if !is_file {
                    continue;
                }

                let path = if relative {
                    entry.path().strip_prefix(".").unwrap_or(entry.path())
                } else {
                    entry.path()
                };

                if self.include.is_match(path) && !self.exclude.is_match(path) {
                    found.insert(path.to_path_buf());
                }
            }
        }

        found.into_iter().collect()
    }
}

impl WalkRoot {
    fn for_pattern(pattern: &str) -> Self {
        let path = Path::new(pattern);
        let mut base = PathBuf::new();
        let mut components = path.components().peekable();

        // Leading components without glob metacharacters form the directory to walk.
        // The last component always names the file, even when it is literal.
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                break;
            }
            let text = component.as_os_str().to_string_lossy();
            if text.contains(GLOB_META) {
                break;
            }
            base.push(component);
        }

        let rest: Vec<_> = path
            .strip_prefix(&base)
            .map(|rest| rest.components().map(|c| c.as_os_str().to_owned()).collect())
            .unwrap_or_default();
        let recursive = rest.iter().any(|c| c == "**");

        Self {
            base,
            max_depth: if recursive { None } else { Some(rest.len()) },
        }
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile(pattern)?);
    }
    builder.build().map_err(|e| Error::InvalidGlob {
        pattern: patterns.join(","),
        reason: e.to_string(),
    })
}

fn compile(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .build()
        .map_err(|e| Error::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.kind().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, relative: &str) -> PathBuf {
        let path = dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("content of {}", relative)).unwrap();
        path
    }

    fn pattern(dir: &TempDir, glob: &str) -> String {
        format!("{}/{}", dir.path().display(), glob)
    }

    fn found(dir: &TempDir, include: &[&str], exclude: &[&str]) -> Vec<String> {
        let include: Vec<_> = include.iter().map(|g| pattern(dir, g)).collect();
        let exclude: Vec<_> = exclude.iter().map(|g| pattern(dir, g)).collect();
        let finder = FileFinder::new(&include, &exclude).unwrap();
        finder
            .find_files()
            .into_iter()
            .map(|p| {
                p.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    fn layout() -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in [
            "one.log",
            "two.log",
            "other.txt",
            "directory/three.log",
            "directory/nested/four.log",
            "a/directory/five.log",
            "a/b/directory/c/six.log",
        ] {
            touch(&dir, name);
        }
        fs::create_dir_all(dir.path().join("dir.log")).unwrap();
        dir
    }

    #[test]
    fn test_single_star_stays_in_directory() {
        let dir = layout();
        assert_eq!(found(&dir, &["*.log"], &[]), vec!["one.log", "two.log"]);
    }

    #[test]
    fn test_glued_double_star_behaves_as_single_star() {
        let dir = layout();
        assert_eq!(found(&dir, &["**.log"], &[]), vec!["one.log", "two.log"]);
    }

    #[test]
    fn test_recursive_under_directory() {
        let dir = layout();
        assert_eq!(
            found(&dir, &["directory/**/*.log"], &[]),
            vec!["directory/nested/four.log", "directory/three.log"]
        );
    }

    #[test]
    fn test_recursive_on_both_sides() {
        let dir = layout();
        assert_eq!(
            found(&dir, &["**/directory/**/*.log"], &[]),
            vec![
                "a/b/directory/c/six.log",
                "a/directory/five.log",
                "directory/nested/four.log",
                "directory/three.log",
            ]
        );
    }

    #[test]
    fn test_question_mark_and_class() {
        let dir = layout();
        assert_eq!(found(&dir, &["t?o.log"], &[]), vec!["two.log"]);
        assert_eq!(found(&dir, &["[o]ne.log"], &[]), vec!["one.log"]);
    }

    #[test]
    fn test_exclude() {
        let dir = layout();
        assert_eq!(found(&dir, &["*.log"], &["two.log"]), vec!["one.log"]);
        assert_eq!(
            found(&dir, &["directory/**/*.log"], &["**/nested/*.log"]),
            vec!["directory/three.log"]
        );
    }

    #[test]
    fn test_overlapping_includes_are_deduplicated() {
        let dir = layout();
        assert_eq!(
            found(&dir, &["*.log", "one.*", "*.log"], &[]),
            vec!["one.log", "two.log"]
        );
    }

    #[test]
    fn test_literal_path() {
        let dir = layout();
        assert_eq!(found(&dir, &["one.log"], &[]), vec!["one.log"]);
        assert!(found(&dir, &["missing/one.log"], &[]).is_empty());
    }

    #[test]
    fn test_discovers_file_created_later() {
        let dir = layout();
        let finder = FileFinder::new(&[pattern(&dir, "*.log")], &[]).unwrap();
        assert_eq!(finder.find_files().len(), 2);

        touch(&dir, "three.log");
        assert_eq!(finder.find_files().len(), 3);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = FileFinder::new(&["[".to_string()], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidGlob { ref pattern, .. } if pattern == "["));

        let err = FileFinder::new(&["*.log".to_string()], &["[".to_string()]).unwrap_err();
        assert!(matches!(err, Error::InvalidGlob { .. }));
    }

    #[test]
    fn test_walk_root() {
        let root = WalkRoot::for_pattern("/var/log/*.log");
        assert_eq!(root.base, PathBuf::from("/var/log"));
        assert_eq!(root.max_depth, Some(1));

        let root = WalkRoot::for_pattern("/var/log/**/app/*.log");
        assert_eq!(root.base, PathBuf::from("/var/log"));
        assert_eq!(root.max_depth, None);

        let root = WalkRoot::for_pattern("logs/*/current.log");
        assert_eq!(root.base, PathBuf::from("logs"));
        assert_eq!(root.max_depth, Some(2));

        let root = WalkRoot::for_pattern("*.log");
        assert_eq!(root.base, PathBuf::new());
        assert_eq!(root.max_depth, Some(1));
    }
}
