use std::fs;
use std::sync::LazyLock;

use anyhow::{Context, anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat};
use regex::Regex;

use super::minify::{minify_css, minify_js, minify_js_mapped};
use super::{Asset, Stage};
use crate::{BuildContext, Mode};

/// Include directive, `//= path`, `//= include path` or `//= require path`.
static INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^([ \t]*)//=[ \t]*(?:(?:include|require)[ \t]+)?["']?([^"'\s]+)["']?[ \t]*\r?$"#)
        .expect("Error compiling include directive pattern")
});

const MAX_INCLUDE_DEPTH: usize = 32;

/// Renames the output file, appending a suffix to the stem and optionally
/// swapping the extension: `main.js` becomes `main.min.js`.
pub struct Rename {
    suffix: &'static str,
    extension: Option<&'static str>,
}

impl Rename {
    pub fn suffix(suffix: &'static str) -> Self {
        Self {
            suffix,
            extension: None,
        }
    }

    pub fn with_extension(mut self, extension: &'static str) -> Self {
        self.extension = Some(extension);
        self
    }
}

impl Stage for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn apply(&self, _: &BuildContext, mut asset: Asset) -> anyhow::Result<Asset> {
        let stem = asset
            .path
            .file_stem()
            .ok_or_else(|| anyhow!("'{}' has no file name", asset.path))?;

        let name = match self.extension.or(asset.path.extension()) {
            Some(ext) => format!("{stem}{}.{ext}", self.suffix),
            None => format!("{stem}{}", self.suffix),
        };

        asset.path.set_file_name(name);
        Ok(asset)
    }
}

/// Inlines the files named by include directives, relative to the including
/// file. Included files may include further files.
pub struct Include;

impl Include {
    fn expand(
        &self,
        dir: &Utf8Path,
        text: &str,
        stack: &mut Vec<Utf8PathBuf>,
    ) -> anyhow::Result<String> {
        if stack.len() > MAX_INCLUDE_DEPTH {
            bail!("includes nested deeper than {MAX_INCLUDE_DEPTH} levels");
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in INCLUDE.captures_iter(text) {
            let (Some(whole), Some(indent), Some(target)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };

            out.push_str(&text[last..whole.start()]);
            last = whole.end();

            let path = dir.join(target.as_str());
            if stack.contains(&path) {
                bail!("'{path}' includes itself");
            }

            let included = fs::read_to_string(&path)
                .with_context(|| format!("couldn't read included file '{path}'"))?;

            stack.push(path.clone());
            let expanded = self.expand(
                path.parent().unwrap_or(dir),
                &included,
                stack,
            )?;
            stack.pop();

            for (i, line) in expanded.lines().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                if !line.is_empty() {
                    out.push_str(indent.as_str());
                }
                out.push_str(line);
            }
        }

        out.push_str(&text[last..]);
        Ok(out)
    }
}

impl Stage for Include {
    fn name(&self) -> &'static str {
        "include"
    }

    fn apply(&self, ctx: &BuildContext, mut asset: Asset) -> anyhow::Result<Asset> {
        let dir = asset
            .origin
            .as_deref()
            .and_then(Utf8Path::parent)
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| ctx.config.root.clone());

        let mut stack: Vec<Utf8PathBuf> = asset.origin.iter().cloned().collect();
        let expanded = self.expand(&dir, asset.text()?, &mut stack)?;

        asset.contents = expanded.into_bytes();
        Ok(asset)
    }
}

/// Compiles SCSS into CSS. Compile errors only drop the offending file.
pub struct Scss;

impl Stage for Scss {
    fn name(&self) -> &'static str {
        "scss"
    }

    fn recoverable(&self) -> bool {
        true
    }

    fn apply(&self, _: &BuildContext, mut asset: Asset) -> anyhow::Result<Asset> {
        let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
        if let Some(dir) = asset.origin.as_deref().and_then(Utf8Path::parent) {
            options = options.load_path(dir.as_std_path());
        }

        let css = grass::from_string(asset.text()?.to_owned(), &options)
            .map_err(|e| anyhow!("{e}"))?;

        asset.contents = css.into_bytes();
        asset.path.set_extension("css");
        Ok(asset)
    }
}

pub struct MinifyCss;

impl Stage for MinifyCss {
    fn name(&self) -> &'static str {
        "minify-css"
    }

    fn apply(&self, _: &BuildContext, mut asset: Asset) -> anyhow::Result<Asset> {
        asset.contents = minify_css(asset.text()?)?.into_bytes();
        Ok(asset)
    }
}

#[derive(Default)]
pub struct MinifyJs {
    source_map: bool,
}

impl MinifyJs {
    /// Also attaches a source map to the asset in development.
    pub fn with_source_map() -> Self {
        Self { source_map: true }
    }
}

impl Stage for MinifyJs {
    fn name(&self) -> &'static str {
        "minify-js"
    }

    fn apply(&self, ctx: &BuildContext, mut asset: Asset) -> anyhow::Result<Asset> {
        if self.source_map && ctx.mode == Mode::Development {
            let file = asset.file();
            let source = file.strip_prefix(&ctx.config.root).unwrap_or(&file);
            let (code, map) = minify_js_mapped(asset.text()?, source)?;
            asset.contents = code.into_bytes();
            asset.map = Some(map);
        } else {
            asset.contents = minify_js(asset.text()?)?.into_bytes();
        }
        Ok(asset)
    }
}

/// Losslessly recompresses PNG images, keeping the result only when it is
/// smaller. Every other format passes through untouched.
pub struct OptimizeImage;

impl Stage for OptimizeImage {
    fn name(&self) -> &'static str {
        "optimize-image"
    }

    fn recoverable(&self) -> bool {
        true
    }

    fn apply(&self, _: &BuildContext, mut asset: Asset) -> anyhow::Result<Asset> {
        if !matches!(image::guess_format(&asset.contents), Ok(ImageFormat::Png)) {
            return Ok(asset);
        }

        let img = image::load_from_memory_with_format(&asset.contents, ImageFormat::Png)?;

        let mut out = Vec::new();
        let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
        encoder.write_image(img.as_bytes(), img.width(), img.height(), img.color().into())?;

        if out.len() < asset.contents.len() {
            tracing::debug!(
                file = %asset.path,
                before = asset.contents.len(),
                after = out.len(),
                "optimized image"
            );
            asset.contents = out;
        }

        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::resolve;
    use crate::transform::Transform;
    use crate::transform::tests::project;

    fn asset(path: &str, contents: &str) -> Asset {
        Asset {
            path: path.into(),
            origin: None,
            contents: contents.as_bytes().to_vec(),
            map: None,
        }
    }

    #[test]
    fn rename_appends_suffix() {
        let (_dir, ctx) = project(&[]);

        let js = Rename::suffix(".min").apply(&ctx, asset("js/main.js", "")).unwrap();
        let css = Rename::suffix(".min")
            .with_extension("css")
            .apply(&ctx, asset("main.scss", ""))
            .unwrap();

        assert_eq!(js.path, "js/main.min.js");
        assert_eq!(css.path, "main.min.css");
    }

    #[test]
    fn include_inlines_nested_files() {
        let (_dir, ctx) = project(&[
            ("src/js/main.js", "//= partials/a.js\nmain();\n"),
            ("src/js/partials/a.js", "a();\n  //= b.js"),
            ("src/js/partials/b.js", "b();"),
        ]);
        let inputs = resolve(&ctx.config.root, &["src/js/main.js"]).unwrap();

        Transform::per_file("out").stage(Include).run(&ctx, &inputs).unwrap();

        let out = fs::read_to_string(ctx.config.resolve("out/main.js")).unwrap();
        assert_eq!(out, "a();\n  b();\nmain();\n");
    }

    #[test]
    fn include_rejects_cycles() {
        let (_dir, ctx) = project(&[
            ("src/a.js", "//= b.js"),
            ("src/b.js", "//= a.js"),
        ]);
        let inputs = resolve(&ctx.config.root, &["src/a.js"]).unwrap();

        let result = Transform::per_file("out").stage(Include).run(&ctx, &inputs);

        assert!(result.is_err());
    }

    #[test]
    fn include_of_missing_file_fails() {
        let (_dir, ctx) = project(&[("src/a.js", "//= nope.js")]);
        let inputs = resolve(&ctx.config.root, &["src/a.js"]).unwrap();

        assert!(Transform::per_file("out").stage(Include).run(&ctx, &inputs).is_err());
    }

    #[test]
    fn scss_resolves_partials_next_to_the_file() {
        let (_dir, ctx) = project(&[
            ("src/style/main.scss", "@import 'vars';\nbody { color: $fg; }\n"),
            ("src/style/_vars.scss", "$fg: #123456;\n"),
        ]);
        let inputs = resolve(&ctx.config.root, &["src/style/main.scss"]).unwrap();

        let emitted = Transform::per_file("out")
            .stage(Scss)
            .stage(MinifyCss)
            .stage(Rename::suffix(".min"))
            .run(&ctx, &inputs)
            .unwrap();

        assert_eq!(emitted.written, [ctx.config.resolve("out/main.min.css")]);
        let css = fs::read_to_string(ctx.config.resolve("out/main.min.css")).unwrap();
        assert!(css.contains("body{color:#123456}"));
    }

    #[test]
    fn scss_errors_are_warnings() {
        let (_dir, ctx) = project(&[("src/style/main.scss", "body { color: $missing; }")]);
        let inputs = resolve(&ctx.config.root, &["src/style/main.scss"]).unwrap();

        let emitted = Transform::per_file("out").stage(Scss).run(&ctx, &inputs).unwrap();

        assert!(emitted.written.is_empty());
        assert_eq!(emitted.warnings.len(), 1);
    }

    #[test]
    fn non_png_images_pass_through() {
        let (_dir, ctx) = project(&[]);
        let svg = asset("logo.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"/>");

        let out = OptimizeImage.apply(&ctx, svg.clone()).unwrap();

        assert_eq!(out.contents, svg.contents);
    }

    #[test]
    fn png_never_grows() {
        let (_dir, ctx) = project(&[]);
        let img = image::RgbaImage::from_pixel(64, 64, image::Rgba([200, 10, 10, 255]));
        let mut png = Vec::new();
        PngEncoder::new_with_quality(&mut png, CompressionType::Fast, FilterType::NoFilter)
            .write_image(&img, 64, 64, image::ExtendedColorType::Rgba8)
            .unwrap();

        let out = OptimizeImage
            .apply(
                &ctx,
                Asset {
                    path: "red.png".into(),
                    origin: None,
                    contents: png.clone(),
                    map: None,
                },
            )
            .unwrap();

        assert!(out.contents.len() <= png.len());
        assert!(image::load_from_memory(&out.contents).is_ok());
    }
}
