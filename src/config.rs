//! Project configuration.
//!
//! The configuration lives in a directory of three JSON files, each optional:
//!
//! * `site.json`: site-wide metadata ([`SiteConfig`]),
//! * `paths.json`: source, output, watch, lint and clean patterns ([`Paths`]),
//! * `dependencies.json`: third-party files bundled into the dependency
//!   scripts and styles ([`Dependencies`]).
//!
//! Missing files fall back to the conventional layout, malformed files are
//! reported with their path. Every path is relative to the project root.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    /// Project root, every configured path is resolved against it.
    pub root: Utf8PathBuf,
    pub site: SiteConfig,
    pub paths: Paths,
    pub dependencies: Dependencies,
}

impl Config {
    /// Loads the configuration directory `dir` of the project at `root`.
    /// A relative `dir` is taken relative to `root`.
    pub fn load(root: impl AsRef<Utf8Path>, dir: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref().to_path_buf();
        let dir = root.join(dir.as_ref());

        Ok(Self {
            site: read_section(&dir.join("site.json"))?,
            paths: read_section(&dir.join("paths.json"))?,
            dependencies: read_section(&dir.join("dependencies.json"))?,
            root,
        })
    }

    /// Default configuration for a project at `root`.
    pub fn with_root(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            site: SiteConfig::default(),
            paths: Paths::default(),
            dependencies: Dependencies::default(),
        }
    }

    /// Resolves a configured path against the project root.
    pub fn resolve(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    /// Location of the persisted version cache.
    pub fn cache_file(&self) -> Utf8PathBuf {
        self.resolve(&self.paths.src.cache)
    }
}

fn read_section<T>(path: &Utf8Path) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_owned(),
                source,
            });
        }
    };

    serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

/// Site-wide metadata, used by the HTML, favicon and sitemap tasks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SiteConfig {
    pub name: String,
    /// Absolute base URL, used for the sitemap.
    pub url: String,
    pub meta: Meta,
    pub favicon: FaviconColors,
    /// Additional static placeholders available to templates.
    pub placeholders: BTreeMap<String, String>,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Meta {
    pub rights: String,
    pub creator: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FaviconColors {
    pub color: String,
    pub bg_color: String,
}

impl Default for FaviconColors {
    fn default() -> Self {
        Self {
            color: "#2b5797".into(),
            bg_color: "#ffffff".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port of the development HTTP server.
    pub port: u16,
    /// Preferred port of the live-reload socket.
    pub reload_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8090,
            reload_port: 1337,
        }
    }
}

/// Third-party files concatenated, in order, into the dependency bundles.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Dependencies {
    pub js: Vec<String>,
    pub css: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub src: SourcePaths,
    pub build: BuildPaths,
    pub watch: WatchPaths,
    pub lint: LintPaths,
    /// Removed by `clean`.
    pub clean: Vec<String>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            src: SourcePaths::default(),
            build: BuildPaths::default(),
            watch: WatchPaths::default(),
            lint: LintPaths::default(),
            clean: vec!["build".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourcePaths {
    pub html: Vec<String>,
    pub js: Vec<String>,
    pub css: Vec<String>,
    pub fonts: Vec<String>,
    pub images: ImagePaths,
    /// Master picture of the favicon set.
    pub favicon: String,
    pub forms: Vec<String>,
    pub phpmailer: Vec<String>,
    #[serde(rename = "static")]
    pub static_files: Vec<String>,
    /// Version cache file.
    pub cache: String,
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            html: vec!["src/html/*.html".into()],
            js: vec!["src/js/main.js".into()],
            css: vec!["src/style/main.scss".into()],
            fonts: ["ttf", "otf", "woff", "woff2"]
                .iter()
                .map(|ext| format!("src/fonts/**/*.{ext}"))
                .collect(),
            images: ImagePaths::default(),
            favicon: "src/favicon/favicon.png".into(),
            forms: vec!["src/forms/**/*".into()],
            phpmailer: vec!["vendor/phpmailer/phpmailer/src/*.php".into()],
            static_files: vec!["src/static/**/*".into()],
            cache: "src/cache/cache.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagePaths {
    /// Images that still need optimizing.
    pub original: Vec<String>,
    /// Images that are copied as they are.
    pub optimized: Vec<String>,
}

impl Default for ImagePaths {
    fn default() -> Self {
        Self {
            original: vec!["src/images/original/**/*".into()],
            optimized: vec!["src/images/optimized/**/*".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildPaths {
    /// Root served by the development server.
    pub server: String,
    pub html: String,
    pub js: String,
    pub css: String,
    pub fonts: String,
    pub images: String,
    pub favicon: String,
    pub forms: String,
    #[serde(rename = "static")]
    pub static_files: String,
    pub sitemap: String,
}

impl Default for BuildPaths {
    fn default() -> Self {
        Self {
            server: "build".into(),
            html: "build".into(),
            js: "build/js".into(),
            css: "build/css".into(),
            fonts: "build/fonts".into(),
            images: "build/images".into(),
            favicon: "build/favicons".into(),
            forms: "build/forms".into(),
            static_files: "build".into(),
            sitemap: "build".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchPaths {
    pub html: Vec<String>,
    pub js: Vec<String>,
    pub css: Vec<String>,
    pub fonts: Vec<String>,
    pub images: Vec<String>,
    pub favicon: Vec<String>,
    pub forms: Vec<String>,
    #[serde(rename = "static")]
    pub static_files: Vec<String>,
}

impl Default for WatchPaths {
    fn default() -> Self {
        Self {
            html: vec!["src/html/**/*.html".into()],
            js: vec!["src/js/**/*.js".into()],
            css: vec!["src/style/**/*.scss".into()],
            fonts: vec!["src/fonts/**/*".into()],
            images: vec!["src/images/**/*".into()],
            favicon: vec!["src/favicon/*".into()],
            forms: vec!["src/forms/**/*".into()],
            static_files: vec!["src/static/**/*".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LintPaths {
    pub js: Vec<String>,
    pub scss: Vec<String>,
    pub html: Vec<String>,
}

impl Default for LintPaths {
    fn default() -> Self {
        Self {
            js: vec!["src/js/**/*.js".into()],
            scss: vec!["src/style/**/*.scss".into()],
            html: vec!["src/html/**/*.html".into()],
        }
    }
}
