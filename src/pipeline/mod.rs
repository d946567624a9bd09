//! The concrete site pipeline.
//!
//! [`Site`] declares every task of a project, arranges them into the build
//! plan and, in watch mode, into the watch table:
//!
//! ```text
//! image:build (image:minify -> image:relocate)
//!   -> dependencies:js -> dependencies:css -> js:build -> css:build
//!   -> [ fonts:build (fonts:prepare -> fonts:css)
//!      | favicon:build
//!      | forms:build (forms:phpmailer | forms:relocate)
//!      | relocate-static-files ]
//!   -> html:build
//! ```

mod assets;
mod favicon;
mod fonts;
mod html;

use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::config::Config;
#[cfg(feature = "live")]
use crate::engine::WatchRule;
use crate::engine::{Orchestrator, Report, Step, TaskId};
use crate::error::SiteError;
use crate::lint::{self, LintReport};
use crate::{BuildContext, Mode};

/// A project with its declared tasks.
#[derive(Debug)]
pub struct Site {
    config: Arc<Config>,
    orch: Orchestrator,
    plan: Step,
    #[cfg(feature = "live")]
    rules: Vec<WatchRule>,
}

impl Site {
    pub fn new(config: Config) -> Result<Self, SiteError> {
        let mut orch = Orchestrator::new();
        let tasks = Tasks::declare(&mut orch, &config)?;

        Ok(Self {
            plan: tasks.plan(),
            #[cfg(feature = "live")]
            rules: tasks.watch_table(&config),
            config: Arc::new(config),
            orch,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orch
    }

    /// The full build plan.
    pub fn plan(&self) -> &Step {
        &self.plan
    }

    pub fn context(&self, mode: Mode) -> BuildContext {
        BuildContext::new(mode, self.config.clone())
    }

    /// Runs the full build plan. Missing version cache entries are created
    /// first, a corrupt cache stops the build before any task runs.
    pub fn build(&self, mode: Mode) -> Result<Report, SiteError> {
        let ctx = self.context(mode);
        tracing::info!("building in {mode} mode");

        ctx.versions.init()?;
        let report = self.orch.run(&ctx, &self.plan)?;

        Ok(report)
    }

    /// Removes every configured clean target.
    pub fn clean(&self) -> Result<Vec<Utf8PathBuf>, SiteError> {
        let removed = crate::io::clean(&self.config.root, &self.config.paths.clean)?;
        Ok(removed)
    }

    pub fn clean_build(&self, mode: Mode) -> Result<Report, SiteError> {
        self.clean()?;
        self.build(mode)
    }

    /// Builds in development mode, then rebuilds whatever the watch table
    /// maps a change to. Only returns on error.
    #[cfg(feature = "live")]
    pub fn watch(&self) -> Result<(), SiteError> {
        let ctx = self.context(Mode::Development);
        ctx.versions.init()?;

        crate::engine::watch(&self.orch, ctx, &self.plan, &self.rules)?;
        Ok(())
    }

    pub fn lint(&self) -> LintReport {
        lint::lint(&self.config)
    }
}

/// Handles of every declared task.
struct Tasks {
    image_minify: TaskId,
    image_relocate: TaskId,
    dependencies_js: TaskId,
    dependencies_css: TaskId,
    js: TaskId,
    css: TaskId,
    fonts_prepare: TaskId,
    fonts_css: TaskId,
    favicon: TaskId,
    forms_phpmailer: TaskId,
    forms_relocate: TaskId,
    static_files: TaskId,
    html: TaskId,
}

impl Tasks {
    fn declare(orch: &mut Orchestrator, config: &Config) -> Result<Self, SiteError> {
        let paths = &config.paths;

        Ok(Self {
            image_minify: orch.declare(assets::image_minify(paths))?,
            image_relocate: orch.declare(assets::image_relocate(paths))?,
            dependencies_js: orch.declare(assets::dependencies_js(paths, &config.dependencies))?,
            dependencies_css: orch.declare(assets::dependencies_css(paths, &config.dependencies))?,
            js: orch.declare(assets::js_build(paths))?,
            css: orch.declare(assets::css_build(paths))?,
            fonts_prepare: orch.declare(fonts::prepare())?,
            fonts_css: orch.declare(fonts::css(paths))?,
            favicon: orch.declare(favicon::build())?,
            forms_phpmailer: orch.declare(assets::forms_phpmailer(paths))?,
            forms_relocate: orch.declare(assets::forms_relocate(paths))?,
            static_files: orch.declare(assets::static_files(paths))?,
            html: orch.declare(html::build())?,
        })
    }

    fn images(&self) -> Step {
        Step::Sequence(vec![self.image_minify.into(), self.image_relocate.into()])
    }

    fn fonts(&self) -> Step {
        Step::Sequence(vec![self.fonts_prepare.into(), self.fonts_css.into()])
    }

    fn forms(&self) -> Step {
        Step::Parallel(vec![self.forms_phpmailer.into(), self.forms_relocate.into()])
    }

    fn plan(&self) -> Step {
        Step::Sequence(vec![
            self.images(),
            self.dependencies_js.into(),
            self.dependencies_css.into(),
            self.js.into(),
            self.css.into(),
            Step::Parallel(vec![
                self.fonts(),
                self.favicon.into(),
                self.forms(),
                self.static_files.into(),
            ]),
            self.html.into(),
        ])
    }

    /// A change reruns the matching step and then re-renders the pages, so
    /// freshly bumped tokens reach the browser.
    #[cfg(feature = "live")]
    fn watch_table(&self, config: &Config) -> Vec<WatchRule> {
        let watch = &config.paths.watch;
        let then_html = |step: Step| Step::Sequence(vec![step, self.html.into()]);

        vec![
            WatchRule::new(watch.html.clone(), self.html),
            WatchRule::new(watch.fonts.clone(), then_html(self.fonts())),
            WatchRule::new(watch.css.clone(), then_html(self.css.into())),
            WatchRule::new(watch.js.clone(), then_html(self.js.into())),
            WatchRule::new(watch.images.clone(), self.images()),
            WatchRule::new(watch.favicon.clone(), self.favicon),
            WatchRule::new(watch.forms.clone(), self.forms()),
            WatchRule::new(watch.static_files.clone(), self.static_files),
        ]
    }
}
