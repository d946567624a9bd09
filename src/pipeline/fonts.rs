//! Web fonts.
//!
//! `fonts:prepare` copies changed font files into the output tree and writes
//! one `@font-face` sheet per font family next to them. `fonts:css` then
//! bundles those sheets into `fonts.min.css` and removes them.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::BuildContext;
use crate::cache::AssetCategory;
use crate::config::Paths;
use crate::error::TaskError;
use crate::fileset::{self, FileSet};
use crate::freshness;
use crate::io::write_atomic;
use crate::task::{Gate, Outcome, Task};
use crate::transform::{MinifyCss, Rename, Transform};

/// Known font extensions and their CSS format hint, in order of preference.
const FORMATS: [(&str, &str); 4] = [
    ("woff2", "woff2"),
    ("woff", "woff"),
    ("ttf", "truetype"),
    ("otf", "opentype"),
];

pub fn prepare() -> Task {
    Task::effect("fonts:prepare", prepare_fonts)
}

pub fn css(paths: &Paths) -> Task {
    let output = &paths.build.css;
    let sheets = format!("{}/**/*.css", paths.build.fonts.trim_end_matches('/'));

    Task::transform(
        "fonts:css",
        [sheets],
        Transform::bundle("fonts.css", output)
            .stage(MinifyCss)
            .stage(Rename::suffix(".min"))
            .consume(),
    )
    .gate(Gate::Output(Utf8Path::new(output).join("fonts.min.css")))
    .bumps(AssetCategory::FontsCss)
}

fn prepare_fonts(ctx: &BuildContext) -> Result<Outcome, TaskError> {
    let config = &ctx.config;
    let fonts = fileset::resolve(&config.root, &config.paths.src.fonts)?;

    if fonts.is_empty() {
        return Ok(Outcome::Empty);
    }

    let dest = config.resolve(&config.paths.build.fonts);
    let bundle = config.resolve(&config.paths.build.css).join("fonts.min.css");

    let mut stale = fonts.clone();
    freshness::retain_stale(ctx.mode, &mut stale, &dest);

    if stale.is_empty() && bundle.is_file() {
        tracing::debug!(%dest, "every font is up to date");
        return Ok(Outcome::Skipped);
    }

    let mut written = Vec::new();

    for input in &stale {
        let path = dest.join(input.relative());
        write_atomic(&path, &fs::read(&input.path)?)?;
        written.push(path);
    }

    // sheets always cover every font, the bundle is rebuilt from scratch
    let base = relative_url(
        Utf8Path::new(&config.paths.build.css),
        Utf8Path::new(&config.paths.build.fonts),
    );

    for (stem, sources) in families(&fonts) {
        let Some(family) = stem.file_name() else {
            continue;
        };

        let urls: Vec<_> = sources
            .iter()
            .map(|(file, format)| (format!("{base}{file}"), *format))
            .collect();

        let path = dest.join(&stem).with_extension("css");
        write_atomic(&path, font_face(family, &urls).as_bytes())?;
        written.push(path);
    }

    Ok(Outcome::Written(written))
}

/// Groups fonts by their relative path without extension. Each family lists
/// its files in order of format preference, unknown extensions are ignored.
fn families(fonts: &FileSet) -> BTreeMap<Utf8PathBuf, Vec<(&Utf8Path, &'static str)>> {
    let mut families: BTreeMap<_, Vec<_>> = BTreeMap::new();

    for input in fonts {
        let relative = input.relative();
        let Some(ext) = relative.extension() else {
            continue;
        };

        let Some(rank) = FORMATS
            .iter()
            .position(|(known, _)| known.eq_ignore_ascii_case(ext))
        else {
            continue;
        };

        families
            .entry(relative.with_extension(""))
            .or_default()
            .push((rank, relative));
    }

    families
        .into_iter()
        .map(|(stem, mut files)| {
            files.sort_by_key(|(rank, _)| *rank);
            let sources = files
                .into_iter()
                .map(|(rank, file)| (file, FORMATS[rank].1))
                .collect();
            (stem, sources)
        })
        .collect()
}

/// An `@font-face` rule for `family` loading from `sources`, pairs of url and
/// format hint.
fn font_face(family: &str, sources: &[(String, &str)]) -> String {
    let src = sources
        .iter()
        .map(|(url, format)| format!("url(\"{url}\") format(\"{format}\")"))
        .collect::<Vec<_>>()
        .join(",\n       ");

    format!(
        r#"@font-face {{
  font-family: "{family}";
  src: {src};
  font-style: normal;
  font-weight: normal;
}}
"#
    )
}

/// Relative url prefix leading from directory `from` to directory `to`,
/// with a trailing slash: `build/css` to `build/fonts` gives `../fonts/`.
fn relative_url(from: &Utf8Path, to: &Utf8Path) -> String {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut url = "../".repeat(from.len() - common);
    for component in &to[common..] {
        url.push_str(component.as_str());
        url.push('/');
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::tests::project;

    #[test]
    fn relative_urls_between_output_dirs() {
        let url = |from: &str, to: &str| relative_url(Utf8Path::new(from), Utf8Path::new(to));

        assert_eq!(url("build/css", "build/fonts"), "../fonts/");
        assert_eq!(url("build/css", "build/css"), "");
        assert_eq!(url("public/assets/css", "public/fonts"), "../../fonts/");
    }

    #[test]
    fn sources_are_ordered_by_preference() {
        let css = font_face(
            "Roboto",
            &[
                ("../fonts/Roboto.woff2".into(), "woff2"),
                ("../fonts/Roboto.ttf".into(), "truetype"),
            ],
        );

        assert!(css.contains("font-family: \"Roboto\";"));
        let woff2 = css.find("url(\"../fonts/Roboto.woff2\") format(\"woff2\")").unwrap();
        let ttf = css.find("url(\"../fonts/Roboto.ttf\") format(\"truetype\")").unwrap();
        assert!(woff2 < ttf);
        assert!(css.starts_with("@font-face {\n"));
        assert!(css.ends_with("  font-weight: normal;\n}\n"));
    }

    #[test]
    fn prepare_copies_fonts_and_writes_sheets() {
        let (_dir, ctx) = project(&[
            ("src/fonts/Roboto.ttf", "ttf"),
            ("src/fonts/Roboto.woff2", "woff2"),
            ("src/fonts/icons/Icons.woff", "woff"),
            ("src/fonts/LICENSE.txt", "license"),
        ]);

        let outcome = prepare_fonts(&ctx).unwrap();

        assert!(outcome.is_written());
        let fonts = ctx.config.resolve("build/fonts");
        assert!(fonts.join("Roboto.ttf").is_file());
        assert!(fonts.join("icons/Icons.woff").is_file());
        assert!(!fonts.join("LICENSE.txt").exists());

        let roboto = fs::read_to_string(fonts.join("Roboto.css")).unwrap();
        let woff2 = roboto.find("../fonts/Roboto.woff2").unwrap();
        let ttf = roboto.find("../fonts/Roboto.ttf").unwrap();
        assert!(woff2 < ttf);

        let icons = fs::read_to_string(fonts.join("icons/Icons.css")).unwrap();
        assert!(icons.contains("url(\"../fonts/icons/Icons.woff\") format(\"woff\")"));
    }

    #[test]
    fn sheets_are_bundled_and_consumed() {
        let (_dir, ctx) = project(&[("src/fonts/Roboto.woff2", "woff2")]);
        ctx.versions.init().unwrap();
        let prepare = prepare();
        let css = css(&ctx.config.paths);

        prepare.run(&ctx).unwrap();
        let record = css.run(&ctx).unwrap();

        let bundle = ctx.config.resolve("build/css/fonts.min.css");
        assert_eq!(record.outcome, Outcome::Written(vec![bundle.clone()]));
        assert!(fs::read_to_string(&bundle).unwrap().contains("@font-face"));
        assert!(!ctx.config.resolve("build/fonts/Roboto.css").exists());
        assert!(ctx.config.resolve("build/fonts/Roboto.woff2").is_file());

        let token = ctx.versions.load().unwrap().get(AssetCategory::FontsCss).cloned();
        assert_ne!(token.unwrap().as_str(), "0");

        assert_eq!(prepare.run(&ctx).unwrap().outcome, Outcome::Skipped);
        assert_eq!(css.run(&ctx).unwrap().outcome, Outcome::Skipped);
    }

    #[test]
    fn no_fonts_is_empty() {
        let (_dir, ctx) = project(&[]);

        assert_eq!(prepare_fonts(&ctx).unwrap(), Outcome::Empty);
    }
}
