#![forbid(unsafe_code)]
//! Static site asset pipeline.
//!
//! Source assets (templates, stylesheets, scripts, fonts, images, favicons,
//! forms) are turned into a deployable output tree by a set of named tasks.
//! Tasks are arranged into [`Step`]s, either strict sequences or parallel
//! groups, and executed by an [`Orchestrator`]. Whenever a task that owns an
//! [`AssetCategory`] writes its output, the orchestrator bumps the category's
//! [`VersionToken`] in the persisted [`VersionStore`]. The HTML task then
//! injects those tokens into the rendered pages, so browsers fetch fresh
//! copies of every asset that changed.
//!
//! ```rust,no_run
//! use tsumiki::{Config, Mode, Site};
//!
//! let config = Config::load(".", "config")?;
//! let site = Site::new(config)?;
//! site.build(Mode::Production)?;
//! # Ok::<(), tsumiki::SiteError>(())
//! ```

pub mod cache;
pub mod config;
pub mod engine;
mod error;
pub mod fileset;
pub mod freshness;
pub mod inject;
mod io;
pub mod lint;
pub mod logging;
pub mod pipeline;
pub mod task;
pub mod transform;

use std::sync::Arc;

pub use crate::cache::{AssetCategory, VersionCache, VersionStore, VersionToken};
pub use crate::config::Config;
#[cfg(feature = "live")]
pub use crate::engine::WatchRule;
pub use crate::engine::{Orchestrator, Report, Step, TaskId};
pub use crate::error::*;
pub use crate::inject::Substitutions;
pub use crate::lint::{LintReport, Violation};
pub use crate::pipeline::Site;
pub use crate::task::{Gate, Outcome, Successor, Task};
pub use crate::transform::{Stage, Transform};

/// The mode the pipeline runs in.
///
/// Production enables the skip gate, development always rebuilds so every save
/// is reflected immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Development => f.write_str("development"),
            Mode::Production => f.write_str("production"),
        }
    }
}

/// Everything a task is allowed to see while it runs.
///
/// This value is passed explicitly into every task, gate and stage; nothing in
/// the pipeline reads the mode from ambient state.
#[derive(Clone)]
pub struct BuildContext {
    /// Current build mode.
    pub mode: Mode,
    /// Project configuration.
    pub config: Arc<Config>,
    /// Shared version store, the only mutable state tasks share.
    pub versions: Arc<VersionStore>,
    /// Port of the live-reload socket, when watching.
    pub reload_port: Option<u16>,
}

impl BuildContext {
    pub fn new(mode: Mode, config: Arc<Config>) -> Self {
        let versions = Arc::new(VersionStore::new(config.cache_file()));

        Self {
            mode,
            config,
            versions,
            reload_port: None,
        }
    }

    /// Returns a JavaScript snippet that reloads the page when the watcher
    /// finishes a rebuild, or `None` outside of watch mode.
    pub fn refresh_script(&self) -> Option<String> {
        self.reload_port.map(|port| {
            format!(
                r#"<script>
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
</script>"#
            )
        })
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("mode", &self.mode)
            .field("root", &self.config.root)
            .field("versions", &self.versions.path())
            .field("reload_port", &self.reload_port)
            .finish()
    }
}
