//! Persisted version tokens used for cache-busting.
//!
//! The cache is a flat JSON object mapping an asset category key to an opaque
//! token, e.g.
//!
//! ```json
//! {
//!   "dependenciesCss": "1700000000000",
//!   "dependenciesJs": "1700000000000",
//!   "fontsCss": "0",
//!   "mainCss": "1700000000123",
//!   "mainJs": "1700000000042"
//! }
//! ```
//!
//! The file is rewritten one key at a time, after the task that owns the key
//! has written its output. Keys added by hand are preserved.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// A named slot in the version cache, owned by exactly one build task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetCategory {
    DependenciesJs,
    DependenciesCss,
    MainJs,
    MainCss,
    FontsCss,
}

impl AssetCategory {
    pub const ALL: [AssetCategory; 5] = [
        AssetCategory::DependenciesJs,
        AssetCategory::DependenciesCss,
        AssetCategory::MainJs,
        AssetCategory::MainCss,
        AssetCategory::FontsCss,
    ];

    /// Key under which the category is persisted and referenced from templates.
    pub fn key(self) -> &'static str {
        match self {
            AssetCategory::DependenciesJs => "dependenciesJs",
            AssetCategory::DependenciesCss => "dependenciesCss",
            AssetCategory::MainJs => "mainJs",
            AssetCategory::MainCss => "mainCss",
            AssetCategory::FontsCss => "fontsCss",
        }
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for AssetCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetCategory::ALL
            .into_iter()
            .find(|category| category.key() == s)
            .ok_or_else(|| format!("unknown asset category '{s}'"))
    }
}

/// Opaque cache-busting token. Only inequality is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Token used before a category has ever been built.
    pub fn placeholder() -> Self {
        Self("0".into())
    }

    /// Mints a token from the current time in milliseconds.
    ///
    /// The result always differs from `previous`: when the clock hasn't moved
    /// past a numeric previous token, the previous value plus one is used.
    pub fn mint(previous: Option<&VersionToken>) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let floor = previous
            .and_then(|token| token.0.parse::<u128>().ok())
            .map(|value| value.saturating_add(1));

        let value = match floor {
            Some(floor) if floor > now => floor,
            _ => now,
        };

        let token = Self(value.to_string());
        match previous {
            Some(previous) if *previous == token => Self(format!("{}1", previous.0)),
            _ => token,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// In-memory snapshot of the version cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionCache {
    entries: BTreeMap<String, VersionToken>,
}

impl VersionCache {
    pub fn get(&self, category: AssetCategory) -> Option<&VersionToken> {
        self.entries.get(category.key())
    }

    pub fn set(&mut self, category: AssetCategory, token: VersionToken) {
        self.entries.insert(category.key().to_string(), token);
    }

    /// All entries, including keys that don't belong to a known category.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &VersionToken)> {
        self.entries.iter().map(|(key, token)| (key.as_str(), token))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn parse(path: &Utf8Path, data: &str) -> Result<Self, CacheError> {
        let corrupt = |reason: String| CacheError::Corrupt {
            path: path.to_owned(),
            reason,
        };

        let value: serde_json::Value =
            serde_json::from_str(data).map_err(|e| corrupt(e.to_string()))?;

        let serde_json::Value::Object(object) = value else {
            return Err(corrupt("expected a flat JSON object".into()));
        };

        let mut entries = BTreeMap::new();
        for (key, value) in object {
            match value {
                serde_json::Value::String(token) => {
                    entries.insert(key, VersionToken(token));
                }
                other => {
                    return Err(corrupt(format!(
                        "entry '{key}' must be a string, found {other}"
                    )));
                }
            }
        }

        Ok(Self { entries })
    }

    fn to_json(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string_pretty(&self.entries)?;
        json.push('\n');
        Ok(json)
    }
}

/// The version cache file together with its single-writer lock.
///
/// Every read-modify-write of the file goes through the lock, so bumps of
/// different categories running in parallel never lose each other's updates.
#[derive(Debug)]
pub struct VersionStore {
    path: Utf8PathBuf,
    lock: Mutex<()>,
}

impl VersionStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads the persisted cache. A missing or malformed file is an error.
    pub fn load(&self) -> Result<VersionCache, CacheError> {
        let data = fs::read_to_string(&self.path).map_err(|source| CacheError::Read {
            path: self.path.clone(),
            source,
        })?;

        VersionCache::parse(&self.path, &data)
    }

    /// Creates the cache with placeholder tokens, or adds placeholders for
    /// categories missing from an existing file. Never overwrites a corrupt
    /// file.
    pub fn init(&self) -> Result<VersionCache, CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut cache = match self.load() {
            Ok(cache) => cache,
            Err(CacheError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
                VersionCache::default()
            }
            Err(e) => return Err(e),
        };

        let mut changed = !self.path.exists();
        for category in AssetCategory::ALL {
            if cache.get(category).is_none() {
                cache.set(category, VersionToken::placeholder());
                changed = true;
            }
        }

        if changed {
            self.write(&cache)?;
        }

        Ok(cache)
    }

    /// Replaces the token of `category` with a freshly minted one, leaving
    /// every other entry untouched.
    pub fn bump(&self, category: AssetCategory) -> Result<VersionToken, CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut cache = match self.load() {
            Ok(cache) => cache,
            Err(CacheError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
                VersionCache::default()
            }
            Err(e) => return Err(e),
        };

        let token = VersionToken::mint(cache.get(category));
        cache.set(category, token.clone());
        self.write(&cache)?;

        tracing::debug!(%category, %token, "bumped version token");
        Ok(token)
    }

    fn write(&self, cache: &VersionCache) -> Result<(), CacheError> {
        let error = |source: std::io::Error| CacheError::Write {
            path: self.path.clone(),
            source,
        };

        let json = cache.to_json().map_err(|e| error(e.into()))?;
        crate::io::write_atomic(&self.path, json.as_bytes()).map_err(error)?;

        Ok(())
    }
}
