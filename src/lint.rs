//! Source linting.
//!
//! Every category checks its own file set independently, a failure to read
//! one category's files never hides another category's findings.

use std::fmt;
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use oxc::allocator::Allocator;
use oxc::parser::Parser;
use oxc::span::SourceType;
use rayon::prelude::*;
use regex::Regex;

use crate::config::Config;
use crate::error::TaskError;
use crate::fileset;

static TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title(?:\s[^>]*)?>(.*?)</title\s*>").expect("Error compiling title pattern")
});

static HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head[\s>]").expect("Error compiling head pattern"));

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^<!--.*?-->").expect("Error compiling comment pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintCategory {
    Js,
    Scss,
    Html,
}

impl LintCategory {
    pub const ALL: [LintCategory; 3] = [LintCategory::Js, LintCategory::Scss, LintCategory::Html];

    fn patterns(self, config: &Config) -> &[String] {
        match self {
            LintCategory::Js => &config.paths.lint.js,
            LintCategory::Scss => &config.paths.lint.scss,
            LintCategory::Html => &config.paths.lint.html,
        }
    }

    fn check(self, file: &Utf8Path, source: &str) -> Vec<Violation> {
        match self {
            LintCategory::Js => check_js(file, source),
            LintCategory::Scss => check_scss(file, source),
            LintCategory::Html => check_html(file, source),
        }
    }
}

impl fmt::Display for LintCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LintCategory::Js => f.write_str("lint:js"),
            LintCategory::Scss => f.write_str("lint:scss"),
            LintCategory::Html => f.write_str("lint:html"),
        }
    }
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub file: Utf8PathBuf,
    /// 1-based line, when the rule can point at one.
    pub line: Option<usize>,
    pub rule: &'static str,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{line}: [{}] {}", self.file, self.rule, self.message),
            None => write!(f, "{}: [{}] {}", self.file, self.rule, self.message),
        }
    }
}

#[derive(Debug)]
pub struct CategoryReport {
    pub category: LintCategory,
    pub checked: usize,
    pub violations: Vec<Violation>,
    /// Set when the category couldn't be checked at all.
    pub error: Option<TaskError>,
}

#[derive(Debug)]
pub struct LintReport {
    pub categories: Vec<CategoryReport>,
}

impl LintReport {
    /// No violations and no category errors.
    pub fn is_clean(&self) -> bool {
        self.categories
            .iter()
            .all(|report| report.violations.is_empty() && report.error.is_none())
    }

    pub fn violations(&self) -> impl Iterator<Item = &Violation> {
        self.categories.iter().flat_map(|report| report.violations.iter())
    }
}

/// Lints every category configured for `config`.
pub fn lint(config: &Config) -> LintReport {
    let categories = LintCategory::ALL
        .par_iter()
        .map(|category| lint_category(config, *category))
        .collect();

    LintReport { categories }
}

fn lint_category(config: &Config, category: LintCategory) -> CategoryReport {
    let result = fileset::resolve(&config.root, category.patterns(config)).and_then(|files| {
        let checked = files.len();
        let violations = files
            .as_slice()
            .par_iter()
            .map(|input| -> Result<_, TaskError> {
                let source = fs::read_to_string(&input.path)?;
                Ok(category.check(&input.path, &source))
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        Ok((checked, violations))
    });

    match result {
        Ok((checked, violations)) => {
            for violation in &violations {
                tracing::warn!("{category} {violation}");
            }
            tracing::info!("{category} checked {checked} file(s), {} violation(s)", violations.len());

            CategoryReport {
                category,
                checked,
                violations,
                error: None,
            }
        }
        Err(error) => {
            tracing::error!("{category} failed: {error}");

            CategoryReport {
                category,
                checked: 0,
                violations: Vec::new(),
                error: Some(error),
            }
        }
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())].matches('\n').count() + 1
}

/// Syntax errors and leftover `debugger` statements.
pub fn check_js(file: &Utf8Path, source: &str) -> Vec<Violation> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::mjs().with_script(true)).parse();

    let mut violations: Vec<_> = ret
        .errors
        .iter()
        .map(|error| Violation {
            file: file.to_owned(),
            line: None,
            rule: "syntax",
            message: error.to_string(),
        })
        .collect();

    for (i, line) in source.lines().enumerate() {
        let code = line.trim_start();
        if code == "debugger;" || code == "debugger" {
            violations.push(Violation {
                file: file.to_owned(),
                line: Some(i + 1),
                rule: "no-debugger",
                message: "unexpected 'debugger' statement".into(),
            });
        }
    }

    violations
}

/// Compile errors of entry stylesheets and `!important` declarations.
///
/// Partials (`_name.scss`) are only compiled as part of an entry.
pub fn check_scss(file: &Utf8Path, source: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    let partial = file.file_name().is_some_and(|name| name.starts_with('_'));
    if !partial {
        let mut options = grass::Options::default();
        if let Some(dir) = file.parent() {
            options = options.load_path(dir.as_std_path());
        }

        if let Err(e) = grass::from_string(source.to_owned(), &options) {
            violations.push(Violation {
                file: file.to_owned(),
                line: None,
                rule: "compile",
                message: e.to_string(),
            });
        }
    }

    for (i, line) in source.lines().enumerate() {
        let code = line.split("//").next().unwrap_or_default();
        if code.contains("!important") {
            violations.push(Violation {
                file: file.to_owned(),
                line: Some(i + 1),
                rule: "declaration-no-important",
                message: "unexpected !important".into(),
            });
        }
    }

    violations
}

/// The document must open with a doctype, and a document with a head needs
/// a non-empty title.
pub fn check_html(file: &Utf8Path, source: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut rest = source.trim_start_matches('\u{feff}').trim_start();
    while let Some(comment) = COMMENT.find(rest) {
        rest = rest[comment.end()..].trim_start();
    }

    let doctype = rest
        .get(..9)
        .is_some_and(|start| start.eq_ignore_ascii_case("<!doctype"));
    if !doctype {
        violations.push(Violation {
            file: file.to_owned(),
            line: Some(line_of(source, source.len() - rest.len())),
            rule: "doctype-first",
            message: "doctype must be declared first".into(),
        });
    }

    if let Some(head) = HEAD.find(source) {
        let titled = TITLE
            .captures(source)
            .and_then(|caps| caps.get(1))
            .is_some_and(|title| !title.as_str().trim().is_empty());

        if !titled {
            violations.push(Violation {
                file: file.to_owned(),
                line: Some(line_of(source, head.start())),
                rule: "title-require",
                message: "<title> must be present in <head> and not empty".into(),
            });
        }
    }

    violations
}
