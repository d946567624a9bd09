//! Expansion of configured path patterns into concrete input files.

use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern, glob};

use crate::error::TaskError;

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A single resolved input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// Path to the file.
    pub path: Utf8PathBuf,
    /// Static directory prefix of the pattern that matched this file.
    pub base: Utf8PathBuf,
}

impl Input {
    /// Path of the file relative to its pattern base, used to mirror the
    /// source layout in the output directory.
    pub fn relative(&self) -> &Utf8Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }
}

/// An ordered, duplicate-free set of input files.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    inputs: Vec<Input>,
}

impl FileSet {
    pub fn new(inputs: Vec<Input>) -> Self {
        Self { inputs }
    }

    pub fn as_slice(&self) -> &[Input] {
        &self.inputs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Input> {
        self.inputs.iter()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Utf8Path> {
        self.inputs.iter().map(|input| input.path.as_path())
    }

    pub fn retain(&mut self, f: impl FnMut(&Input) -> bool) {
        self.inputs.retain(f);
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = &'a Input;
    type IntoIter = std::slice::Iter<'a, Input>;

    fn into_iter(self) -> Self::IntoIter {
        self.inputs.iter()
    }
}

/// Resolves `patterns` against `root` at call time.
///
/// Files are ordered by pattern, then lexically within a pattern; a file
/// matched by several patterns keeps its first position. Patterns starting
/// with `!` exclude whatever they match. Nothing matching is not an error.
pub fn resolve<S: AsRef<str>>(root: &Utf8Path, patterns: &[S]) -> Result<FileSet, TaskError> {
    let mut includes = Vec::new();
    let mut excludes = Vec::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        match pattern.strip_prefix('!') {
            Some(negated) => excludes.push(Pattern::new(&anchor(root, negated))?),
            None => includes.push(pattern),
        }
    }

    let mut seen = HashSet::new();
    let mut inputs = Vec::new();

    for pattern in includes {
        let base = root.join(glob_base(pattern));

        for entry in glob(&anchor(root, pattern))? {
            let path = Utf8PathBuf::try_from(entry?)?;

            if !path.is_file() {
                continue;
            }

            if excludes
                .iter()
                .any(|exclude| exclude.matches_path_with(path.as_std_path(), MATCH))
            {
                continue;
            }

            if seen.insert(path.clone()) {
                inputs.push(Input {
                    path,
                    base: base.clone(),
                });
            }
        }
    }

    Ok(FileSet { inputs })
}

/// Prefixes a relative pattern with the escaped root.
fn anchor(root: &Utf8Path, pattern: &str) -> String {
    if Utf8Path::new(pattern).is_absolute() {
        return pattern.to_string();
    }

    let root = Pattern::escape(root.as_str());
    format!("{}/{}", root.trim_end_matches('/'), pattern)
}

/// Returns the static directory prefix of a glob, the part before the first
/// component containing a wildcard. For a literal path this is its parent.
pub fn glob_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    match components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
    {
        Some(index) => components.iter().take(index).collect(),
        None => path.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture(files: &[&str]) -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        for file in files {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, file.as_bytes()).unwrap();
        }
        (dir, root)
    }

    fn relative(set: &FileSet, root: &Utf8Path) -> Vec<String> {
        set.paths()
            .map(|p| p.strip_prefix(root).unwrap().to_string())
            .collect()
    }

    #[test]
    fn keeps_declared_order_and_drops_duplicates() {
        let (_dir, root) = fixture(&["vendor/b.js", "vendor/a.js", "vendor/c.js"]);

        let set = resolve(&root, &["vendor/c.js", "vendor/*.js"]).unwrap();

        assert_eq!(
            relative(&set, &root),
            ["vendor/c.js", "vendor/a.js", "vendor/b.js"]
        );
    }

    #[test]
    fn no_matches_is_an_empty_set() {
        let (_dir, root) = fixture(&[]);

        let set = resolve(&root, &["missing.js", "nothing/**/*.css"]).unwrap();

        assert!(set.is_empty());
    }

    #[test]
    fn negated_patterns_exclude() {
        let (_dir, root) = fixture(&[
            "style/main.scss",
            "style/_vars.scss",
            "style/parts/_grid.scss",
        ]);

        let set = resolve(&root, &["style/**/*.scss", "!style/**/_*.scss"]).unwrap();

        assert_eq!(relative(&set, &root), ["style/main.scss"]);
    }

    #[test]
    fn directories_are_skipped() {
        let (_dir, root) = fixture(&["static/robots.txt", "static/docs/a.pdf"]);

        let set = resolve(&root, &["static/**/*"]).unwrap();
        let mut found = relative(&set, &root);
        found.sort();

        assert_eq!(found, ["static/docs/a.pdf", "static/robots.txt"]);
    }

    #[test]
    fn inputs_know_their_relative_path() {
        let (_dir, root) = fixture(&["static/docs/a.pdf", "js/main.js"]);

        let set = resolve(&root, &["static/**/*", "js/main.js"]).unwrap();
        let relative: Vec<_> = set.iter().map(|i| i.relative().to_string()).collect();

        assert_eq!(relative, ["docs/a.pdf", "main.js"]);
    }

    #[test]
    fn test_glob_base() {
        assert_eq!(glob_base("src/**/*.scss"), Utf8Path::new("src"));
        assert_eq!(glob_base("src/js/main.js"), Utf8Path::new("src/js"));
        assert_eq!(glob_base("*.html"), Utf8Path::new(""));
        assert_eq!(glob_base("a/b?/c"), Utf8Path::new("a"));
    }
}
