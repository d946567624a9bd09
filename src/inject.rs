//! Placeholder substitution in HTML templates.
//!
//! Templates reference values as `@@name`, where `name` is an identifier
//! (`[A-Za-z_][A-Za-z0-9_]*`). Known names are replaced, unknown ones are kept
//! as they are, so a typo stays visible in the rendered page. Replacement is
//! a single pass: a substituted value is never scanned for placeholders.
//!
//! ```html
//! <link rel="stylesheet" href="css/main.min.css?v=@@mainCss">
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::BuildContext;
use crate::cache::VersionCache;
use crate::config::SiteConfig;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@@([A-Za-z_][A-Za-z0-9_]*)").expect("Error compiling placeholder pattern")
});

/// Values available to templates, by placeholder name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Collects every value a page may reference: version tokens, site
    /// metadata, extra configured placeholders and the live-reload script.
    ///
    /// Configured placeholders can't shadow the built-in names.
    pub fn from_parts(cache: &VersionCache, site: &SiteConfig, ctx: &BuildContext) -> Self {
        let mut subs = Self::new();

        for (name, value) in &site.placeholders {
            subs.insert(name, value);
        }

        for (key, token) in cache.iter() {
            subs.insert(key, token.as_str());
        }

        subs.insert("metaRights", &site.meta.rights)
            .insert("metaCreator", &site.meta.creator)
            .insert("siteName", &site.name)
            .insert("siteUrl", &site.url)
            .insert("liveReload", ctx.refresh_script().unwrap_or_default());

        subs
    }

    /// Replaces every known placeholder in `template`.
    pub fn render<'a>(&self, template: &'a str) -> Cow<'a, str> {
        PLACEHOLDER.replace_all(template, |caps: &Captures| match self.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
    }
}
