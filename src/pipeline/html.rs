//! Page rendering and the sitemap.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use sitemap_rs::sitemap::Sitemap;
use sitemap_rs::sitemap_index::SitemapIndex;
use sitemap_rs::url::{ChangeFrequency, Url};
use sitemap_rs::url_set::UrlSet;

use crate::BuildContext;
use crate::config::Config;
use crate::error::TaskError;
use crate::fileset;
use crate::inject::Substitutions;
use crate::io::write_atomic;
use crate::task::{Outcome, Task};

const MAX_URLS: usize = 50_000;

pub fn build() -> Task {
    Task::effect("html:build", render_pages)
}

/// Renders every page with the current version tokens. Always runs, the
/// tokens may have changed without any page changing.
fn render_pages(ctx: &BuildContext) -> Result<Outcome, TaskError> {
    let config = &ctx.config;
    let pages = fileset::resolve(&config.root, &config.paths.src.html)?;

    if pages.is_empty() {
        return Ok(Outcome::Empty);
    }

    let cache = ctx.versions.load()?;
    let subs = Substitutions::from_parts(&cache, &config.site, ctx);
    let dest = config.resolve(&config.paths.build.html);

    let mut written = pages
        .as_slice()
        .par_iter()
        .map(|input| -> Result<_, TaskError> {
            let template = fs::read_to_string(&input.path)?;
            let path = dest.join(input.relative());
            write_atomic(&path, subs.render(&template).as_bytes())?;
            Ok(path)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let sitemap = write_sitemap(config, &written)?;
    written.extend(sitemap);

    Ok(Outcome::Written(written))
}

fn write_sitemap(config: &Config, pages: &[Utf8PathBuf]) -> Result<Vec<Utf8PathBuf>, TaskError> {
    let base = config.site.url.trim_end_matches('/');
    if base.is_empty() {
        tracing::warn!("site url is not set, skipping sitemap.xml");
        return Ok(Vec::new());
    }

    let server = config.resolve(&config.paths.build.server);
    let locations = pages
        .iter()
        .map(|page| page_url(base, page.strip_prefix(&server).unwrap_or(page)))
        .collect();

    let dest = config.resolve(&config.paths.build.sitemap);
    let mut written = Vec::new();

    for (name, xml) in sitemap(base, locations)? {
        let path = dest.join(name);
        write_atomic(&path, &xml)?;
        written.push(path);
    }

    Ok(written)
}

/// Public url of a rendered page, `index.html` maps to its directory.
fn page_url(base: &str, page: &Utf8Path) -> String {
    let path = page.as_str();
    let path = path.strip_suffix("index.html").unwrap_or(path);
    format!("{base}/{path}")
}

/// Serializes `locations` into `sitemap.xml`, splitting into an index of
/// numbered sitemaps past the per-file url limit.
fn sitemap(base: &str, mut locations: Vec<String>) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    locations.sort();

    let entries = locations
        .into_iter()
        .map(|location| {
            Url::builder(location)
                .change_frequency(ChangeFrequency::Weekly)
                .priority(0.5)
                .build()
        })
        .collect::<Result<Vec<_>, _>>()?;

    if entries.len() <= MAX_URLS {
        let mut buffer = Vec::new();
        UrlSet::new(entries)?.write(&mut buffer)?;
        return Ok(vec![("sitemap.xml".into(), buffer)]);
    }

    let mut indexes = Vec::new();
    let mut outputs = Vec::new();

    for (i, chunk) in entries.chunks(MAX_URLS).enumerate() {
        let filename = format!("sitemap-{}.xml", i + 1);

        let mut buffer = Vec::new();
        UrlSet::new(chunk.to_vec())?.write(&mut buffer)?;

        indexes.push(Sitemap::new(format!("{base}/{filename}"), None));
        outputs.push((filename, buffer));
    }

    let mut buffer = Vec::new();
    SitemapIndex::new(indexes)?.write(&mut buffer)?;
    outputs.push(("sitemap.xml".into(), buffer));

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mode;
    use crate::cache::AssetCategory;
    use crate::transform::tests::project;
    use std::sync::Arc;

    const PAGE: &str = r#"<link href="css/main.min.css?v=@@mainCss"><i>@@fooBar</i>@@liveReload"#;

    #[test]
    fn renders_tokens_into_pages() {
        let (_dir, ctx) = project(&[("src/html/index.html", PAGE)]);
        ctx.versions.init().unwrap();
        let token = ctx.versions.bump(AssetCategory::MainCss).unwrap();

        let outcome = render_pages(&ctx).unwrap();

        let page = ctx.config.resolve("build/index.html");
        assert_eq!(outcome, Outcome::Written(vec![page.clone()]));
        assert_eq!(
            fs::read_to_string(page).unwrap(),
            format!(r#"<link href="css/main.min.css?v={token}"><i>@@fooBar</i>"#)
        );
    }

    #[test]
    fn corrupt_cache_fails_without_output() {
        let (_dir, ctx) = project(&[
            ("src/html/index.html", PAGE),
            ("src/cache/cache.json", "[1, 2]"),
        ]);

        assert!(matches!(render_pages(&ctx), Err(TaskError::Cache(_))));
        assert!(!ctx.config.resolve("build/index.html").exists());
    }

    #[test]
    fn writes_a_sitemap_when_the_url_is_known() {
        let (_dir, ctx) = project(&[
            ("src/html/index.html", "<!doctype html>"),
            ("src/html/contact.html", "<!doctype html>"),
        ]);
        let mut config = (*ctx.config).clone();
        config.site.url = "https://example.com/".into();
        let ctx = BuildContext::new(Mode::Production, Arc::new(config));
        ctx.versions.init().unwrap();

        let Outcome::Written(files) = render_pages(&ctx).unwrap() else {
            panic!("pages were not written");
        };

        let sitemap = ctx.config.resolve("build/sitemap.xml");
        assert!(files.contains(&sitemap));

        let xml = fs::read_to_string(sitemap).unwrap();
        let root = xml.find("<loc>https://example.com/</loc>").unwrap();
        let contact = xml.find("<loc>https://example.com/contact.html</loc>").unwrap();
        assert!(root < contact);
    }

    #[test]
    fn page_urls() {
        assert_eq!(page_url("https://a.b", Utf8Path::new("index.html")), "https://a.b/");
        assert_eq!(page_url("https://a.b", Utf8Path::new("blog/index.html")), "https://a.b/blog/");
        assert_eq!(page_url("https://a.b", Utf8Path::new("about.html")), "https://a.b/about.html");
    }

    #[test]
    fn no_pages_is_empty() {
        let (_dir, ctx) = project(&[]);

        assert_eq!(render_pages(&ctx).unwrap(), Outcome::Empty);
    }
}
