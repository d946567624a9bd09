//! Streaming transformations of input files.
//!
//! A [`Transform`] reads its inputs, threads each resulting [`Asset`] through
//! an ordered list of [`Stage`]s and writes whatever comes out under its
//! output directory. Every write is atomic.

mod minify;
mod stages;

use std::borrow::Cow;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;

use crate::BuildContext;
use crate::error::{TaskError, TransformError};
use crate::fileset::{FileSet, Input};
use crate::io::write_atomic;

pub use minify::{minify_css, minify_js};
pub use stages::{Include, MinifyCss, MinifyJs, OptimizeImage, Rename, Scss};

/// A file in flight between stages.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Output path, relative to the transform's output directory.
    pub path: Utf8PathBuf,
    /// Source file this asset was read from, `None` for bundles.
    pub origin: Option<Utf8PathBuf>,
    pub contents: Vec<u8>,
    /// Source map for `contents`, written next to the output as `<name>.map`.
    pub map: Option<String>,
}

impl Asset {
    pub fn text(&self) -> anyhow::Result<&str> {
        Ok(std::str::from_utf8(&self.contents)?)
    }

    /// File the asset is reported as in diagnostics.
    fn file(&self) -> Utf8PathBuf {
        self.origin.clone().unwrap_or_else(|| self.path.clone())
    }
}

/// One byte-in, byte-out step of a transformation.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a failure of this stage only drops the offending file instead
    /// of failing the whole task.
    fn recoverable(&self) -> bool {
        false
    }

    fn apply(&self, ctx: &BuildContext, asset: Asset) -> anyhow::Result<Asset>;
}

#[derive(Debug, Clone)]
pub enum Shape {
    /// Every input becomes its own output, mirroring the input layout.
    PerFile,
    /// All inputs are concatenated in order into a single named asset.
    Bundle(Utf8PathBuf),
}

/// Result of running a transform.
#[derive(Debug, Default)]
pub struct Emitted {
    pub written: Vec<Utf8PathBuf>,
    pub warnings: Vec<TransformError>,
}

enum Processed {
    Written(Vec<Utf8PathBuf>),
    Dropped(TransformError),
}

pub struct Transform {
    shape: Shape,
    stages: Vec<Box<dyn Stage>>,
    output: Utf8PathBuf,
    consume: bool,
}

impl Transform {
    /// Transform writing one output per input under `output`.
    pub fn per_file(output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            shape: Shape::PerFile,
            stages: Vec::new(),
            output: output.into(),
            consume: false,
        }
    }

    /// Transform concatenating every input into `name` under `output`.
    pub fn bundle(name: impl Into<Utf8PathBuf>, output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            shape: Shape::Bundle(name.into()),
            stages: Vec::new(),
            output: output.into(),
            consume: false,
        }
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Remove the inputs once the output has been written.
    pub fn consume(mut self) -> Self {
        self.consume = true;
        self
    }

    pub fn run(&self, ctx: &BuildContext, inputs: &FileSet) -> Result<Emitted, TaskError> {
        if inputs.is_empty() {
            return Ok(Emitted::default());
        }

        let dest = ctx.config.resolve(&self.output);

        let processed = match &self.shape {
            Shape::PerFile => inputs
                .as_slice()
                .par_iter()
                .map(|input| self.emit(ctx, &dest, read(input)?))
                .collect::<Vec<_>>(),
            Shape::Bundle(name) => vec![self.emit(ctx, &dest, concat(name, inputs)?)],
        };

        let mut emitted = Emitted::default();
        for result in processed {
            match result? {
                Processed::Written(paths) => emitted.written.extend(paths),
                Processed::Dropped(warning) => emitted.warnings.push(warning),
            }
        }

        if self.consume && !emitted.written.is_empty() {
            for path in inputs.paths() {
                fs::remove_file(path)?;
            }
        }

        Ok(emitted)
    }

    /// Applies every stage to `asset` and writes the result under `dest`,
    /// followed by its source map if a stage attached one.
    fn emit(&self, ctx: &BuildContext, dest: &Utf8Path, asset: Asset) -> Result<Processed, TaskError> {
        let mut asset = match self.process(ctx, asset)? {
            Ok(asset) => asset,
            Err(dropped) => return Ok(Processed::Dropped(dropped)),
        };

        let path = dest.join(&asset.path);
        let Some(map) = asset.map.take() else {
            write_atomic(&path, &asset.contents)?;
            return Ok(Processed::Written(vec![path]));
        };

        let map_path = Utf8PathBuf::from(format!("{path}.map"));
        if let Some(name) = map_path.file_name() {
            asset
                .contents
                .extend_from_slice(format!("\n//# sourceMappingURL={name}\n").as_bytes());
        }
        write_atomic(&path, &asset.contents)?;
        write_atomic(&map_path, map.as_bytes())?;

        Ok(Processed::Written(vec![path, map_path]))
    }

    /// Threads `asset` through every stage. A recoverable stage failure comes
    /// back as the inner error.
    fn process(
        &self,
        ctx: &BuildContext,
        mut asset: Asset,
    ) -> Result<Result<Asset, TransformError>, TaskError> {
        for stage in &self.stages {
            let file = asset.file();

            asset = match stage.apply(ctx, asset) {
                Ok(asset) => asset,
                Err(source) => {
                    let error = TransformError {
                        stage: Cow::Borrowed(stage.name()),
                        file,
                        source,
                    };

                    if !stage.recoverable() {
                        return Err(error.into());
                    }

                    tracing::warn!("{error}");
                    return Ok(Err(error));
                }
            };
        }

        Ok(Ok(asset))
    }
}

fn read(input: &Input) -> Result<Asset, TaskError> {
    Ok(Asset {
        path: input.relative().to_path_buf(),
        origin: Some(input.path.clone()),
        contents: fs::read(&input.path)?,
        map: None,
    })
}

fn concat(name: &Utf8Path, inputs: &FileSet) -> Result<Asset, TaskError> {
    let mut contents = Vec::new();

    for (i, path) in inputs.paths().enumerate() {
        if i > 0 {
            contents.push(b'\n');
        }
        contents.extend(fs::read(path)?);
    }

    Ok(Asset {
        path: name.to_path_buf(),
        origin: None,
        contents,
        map: None,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fileset::resolve;
    use crate::{Config, Mode};
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) fn project(files: &[(&str, &str)]) -> (TempDir, BuildContext) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        for (file, contents) in files {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
        }
        let ctx = BuildContext::new(Mode::Production, Arc::new(Config::with_root(root)));
        (dir, ctx)
    }

    struct Upper;

    impl Stage for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn apply(&self, _: &BuildContext, mut asset: Asset) -> anyhow::Result<Asset> {
            asset.contents.make_ascii_uppercase();
            Ok(asset)
        }
    }

    struct Reject {
        recoverable: bool,
    }

    impl Stage for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        fn recoverable(&self) -> bool {
            self.recoverable
        }

        fn apply(&self, _: &BuildContext, asset: Asset) -> anyhow::Result<Asset> {
            if asset.text()?.contains("bad") {
                anyhow::bail!("refusing bad input");
            }
            Ok(asset)
        }
    }

    #[test]
    fn bundle_concatenates_in_declared_order() {
        let (_dir, ctx) = project(&[("vendor/a.js", "a();"), ("vendor/b.js", "b();")]);
        let inputs = resolve(&ctx.config.root, &["vendor/b.js", "vendor/a.js"]).unwrap();

        let emitted = Transform::bundle("all.js", "out").run(&ctx, &inputs).unwrap();

        let out = ctx.config.resolve("out/all.js");
        assert_eq!(emitted.written, [out.clone()]);
        assert_eq!(fs::read_to_string(out).unwrap(), "b();\na();");
    }

    #[test]
    fn per_file_mirrors_layout_and_keeps_order() {
        let (_dir, ctx) = project(&[("src/x/one.txt", "one"), ("src/two.txt", "two")]);
        let inputs = resolve(&ctx.config.root, &["src/**/*.txt"]).unwrap();

        let emitted = Transform::per_file("out")
            .stage(Upper)
            .run(&ctx, &inputs)
            .unwrap();

        let expected: Vec<_> = inputs
            .iter()
            .map(|i| ctx.config.resolve("out").join(i.relative()))
            .collect();
        assert_eq!(emitted.written, expected);
        assert_eq!(
            fs::read_to_string(ctx.config.resolve("out/x/one.txt")).unwrap(),
            "ONE"
        );
    }

    #[test]
    fn empty_input_writes_nothing() {
        let (_dir, ctx) = project(&[]);
        let inputs = resolve(&ctx.config.root, &["src/*.js"]).unwrap();

        let emitted = Transform::bundle("all.js", "out").run(&ctx, &inputs).unwrap();

        assert!(emitted.written.is_empty());
        assert!(!ctx.config.resolve("out").exists());
    }

    #[test]
    fn recoverable_failure_drops_only_that_file() {
        let (_dir, ctx) = project(&[("src/good.txt", "good"), ("src/bad.txt", "bad")]);
        let inputs = resolve(&ctx.config.root, &["src/*.txt"]).unwrap();

        let emitted = Transform::per_file("out")
            .stage(Reject { recoverable: true })
            .run(&ctx, &inputs)
            .unwrap();

        assert_eq!(emitted.written, [ctx.config.resolve("out/good.txt")]);
        assert_eq!(emitted.warnings.len(), 1);
        assert_eq!(emitted.warnings[0].stage, "reject");
        assert!(emitted.warnings[0].file.ends_with("bad.txt"));
    }

    #[test]
    fn fatal_failure_fails_the_transform() {
        let (_dir, ctx) = project(&[("src/bad.txt", "bad")]);
        let inputs = resolve(&ctx.config.root, &["src/*.txt"]).unwrap();

        let err = Transform::per_file("out")
            .stage(Reject { recoverable: false })
            .run(&ctx, &inputs)
            .unwrap_err();

        assert!(matches!(err, TaskError::Transform(TransformError { .. })));
        assert!(!ctx.config.resolve("out/bad.txt").exists());
    }

    #[test]
    fn consume_removes_inputs_after_writing() {
        let (_dir, ctx) = project(&[("tmp/a.css", "a{}"), ("tmp/b.css", "b{}")]);
        let inputs = resolve(&ctx.config.root, &["tmp/*.css"]).unwrap();

        Transform::bundle("all.css", "out")
            .consume()
            .run(&ctx, &inputs)
            .unwrap();

        assert!(ctx.config.resolve("out/all.css").exists());
        assert!(!ctx.config.resolve("tmp/a.css").exists());
        assert!(!ctx.config.resolve("tmp/b.css").exists());
    }
}
