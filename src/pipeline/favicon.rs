//! Favicon set generated from a single master picture.

use std::io::Cursor;

use anyhow::{anyhow, bail};
use camino::Utf8Path;
use image::codecs::ico::{IcoEncoder, IcoFrame};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageFormat, Rgba, RgbaImage};
use rayon::prelude::*;
use serde_json::json;

use crate::BuildContext;
use crate::config::{Paths, SiteConfig};
use crate::error::TaskError;
use crate::fileset;
use crate::freshness;
use crate::io::write_atomic;
use crate::task::{Outcome, Task};

const PNG_ICONS: [(&str, u32); 5] = [
    ("favicon-16x16.png", 16),
    ("favicon-32x32.png", 32),
    ("android-chrome-192x192.png", 192),
    ("android-chrome-512x512.png", 512),
    ("mstile-150x150.png", 150),
];

const ICO_SIZES: [u32; 3] = [16, 32, 48];

const TOUCH_ICON: u32 = 180;
/// Margin around the picture on the apple touch icon, per side.
const TOUCH_MARGIN: f32 = 0.14;

pub fn build() -> Task {
    Task::effect("favicon:build", build_favicons)
}

fn build_favicons(ctx: &BuildContext) -> Result<Outcome, TaskError> {
    let config = &ctx.config;
    let master = fileset::resolve(&config.root, std::slice::from_ref(&config.paths.src.favicon))?;

    let Some(input) = master.iter().next() else {
        tracing::debug!(picture = %config.paths.src.favicon, "no master picture");
        return Ok(Outcome::Empty);
    };

    let dest = config.resolve(&config.paths.build.favicon);
    if freshness::should_skip(ctx.mode, &master, &dest.join("favicon.ico")) {
        tracing::debug!(%dest, "favicons are up to date");
        return Ok(Outcome::Skipped);
    }

    let picture = image::open(&input.path).map_err(|e| anyhow!("couldn't open '{}': {e}", input.path))?;
    let files = render(&picture, &config.site, &icons_url(&config.paths))?;

    let mut written = Vec::with_capacity(files.len());
    for (name, data) in files {
        let path = dest.join(name);
        write_atomic(&path, &data)?;
        written.push(path);
    }

    Ok(Outcome::Written(written))
}

fn render(
    picture: &DynamicImage,
    site: &SiteConfig,
    icons: &str,
) -> anyhow::Result<Vec<(&'static str, Vec<u8>)>> {
    let background = parse_color(&site.favicon.bg_color)?;
    parse_color(&site.favicon.color)?;

    let mut files = PNG_ICONS
        .par_iter()
        .map(|(name, size)| {
            let icon = picture.resize_exact(*size, *size, FilterType::Lanczos3);
            Ok((*name, encode_png(&icon)?))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    files.push(("apple-touch-icon.png", encode_png(&touch_icon(picture, background))?));
    files.push(("favicon.ico", encode_ico(picture)?));
    files.push(("site.webmanifest", manifest(site, icons)?.into_bytes()));
    files.push(("browserconfig.xml", browserconfig(&site.favicon.color, icons).into_bytes()));

    Ok(files)
}

/// Url path of the favicon directory as seen from the server root, empty
/// when the icons live at the root.
fn icons_url(paths: &Paths) -> String {
    let favicon = Utf8Path::new(&paths.build.favicon);
    let relative = favicon.strip_prefix(&paths.build.server).unwrap_or(favicon);

    match relative.as_str() {
        "" => String::new(),
        path => format!("/{}", path.trim_matches('/')),
    }
}

fn encode_png(image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn encode_ico(picture: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let frames = ICO_SIZES
        .iter()
        .map(|size| {
            let frame = picture.resize_exact(*size, *size, FilterType::Lanczos3).to_rgba8();
            IcoFrame::as_png(frame.as_raw(), *size, *size, ExtendedColorType::Rgba8)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::new();
    IcoEncoder::new(&mut out).encode_images(&frames)?;
    Ok(out)
}

/// The picture centered on an opaque background, inset by the margin.
fn touch_icon(picture: &DynamicImage, background: [u8; 3]) -> DynamicImage {
    let margin = (TOUCH_ICON as f32 * TOUCH_MARGIN).round() as u32;
    let inner = TOUCH_ICON - 2 * margin;
    let icon = picture.resize(inner, inner, FilterType::Lanczos3).to_rgba8();

    let [r, g, b] = background;
    let mut canvas = RgbaImage::from_pixel(TOUCH_ICON, TOUCH_ICON, Rgba([r, g, b, 255]));
    let x = (TOUCH_ICON - icon.width()) / 2;
    let y = (TOUCH_ICON - icon.height()) / 2;
    imageops::overlay(&mut canvas, &icon, x.into(), y.into());

    DynamicImage::ImageRgba8(canvas)
}

fn manifest(site: &SiteConfig, icons: &str) -> serde_json::Result<String> {
    let manifest = json!({
        "name": site.name,
        "short_name": site.name,
        "icons": [
            {
                "src": format!("{icons}/android-chrome-192x192.png"),
                "sizes": "192x192",
                "type": "image/png",
            },
            {
                "src": format!("{icons}/android-chrome-512x512.png"),
                "sizes": "512x512",
                "type": "image/png",
            },
        ],
        "theme_color": site.favicon.bg_color,
        "background_color": site.favicon.bg_color,
        "display": "standalone",
    });

    serde_json::to_string_pretty(&manifest)
}

fn browserconfig(color: &str, icons: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<browserconfig>
    <msapplication>
        <tile>
            <square150x150logo src="{icons}/mstile-150x150.png"/>
            <TileColor>{color}</TileColor>
        </tile>
    </msapplication>
</browserconfig>
"#
    )
}

/// Parses a `#rgb` or `#rrggbb` hex color.
pub fn parse_color(color: &str) -> anyhow::Result<[u8; 3]> {
    let hex = color
        .strip_prefix('#')
        .ok_or_else(|| anyhow!("color '{color}' must start with '#'"))?;

    let digits = hex
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| anyhow!("color '{color}' isn't hexadecimal"))?;

    match digits[..] {
        [r, g, b] => Ok([r * 17, g * 17, b * 17]),
        [r1, r2, g1, g2, b1, b2] => Ok([r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2]),
        _ => bail!("color '{color}' must have 3 or 6 digits"),
    }
}
