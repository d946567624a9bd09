//! JavaScript and CSS minification.
//!
//! Uses oxc for JavaScript and grass in plain CSS mode for stylesheets.

use anyhow::anyhow;
use camino::Utf8Path;
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;

/// Minify a classic browser script.
///
/// Top-level bindings are left alone, scripts share the global scope.
pub fn minify_js(source: &str) -> anyhow::Result<String> {
    Ok(minify_script(source, None)?.0)
}

/// Minify a classic browser script, returning the code together with a JSON
/// source map that names `source_path` as its source.
pub fn minify_js_mapped(source: &str, source_path: &Utf8Path) -> anyhow::Result<(String, String)> {
    let (code, map) = minify_script(source, Some(source_path))?;
    let map = map.ok_or_else(|| anyhow!("no source map was generated for '{source_path}'"))?;
    Ok((code, map))
}

fn minify_script(
    source: &str,
    source_path: Option<&Utf8Path>,
) -> anyhow::Result<(String, Option<String>)> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::mjs().with_script(true)).parse();

    if let Some(error) = ret.errors.first() {
        return Err(anyhow!("{error}"));
    }

    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);
    let out = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            source_map_path: source_path.map(|path| path.as_std_path().to_path_buf()),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program);

    Ok((out.code, out.map.map(|map| map.to_json_string())))
}

/// Minify plain CSS.
pub fn minify_css(source: &str) -> anyhow::Result<String> {
    let options = grass::Options::default()
        .style(grass::OutputStyle::Compressed)
        .input_syntax(grass::InputSyntax::Css);

    grass::from_string(source.to_owned(), &options).map_err(|e| anyhow!("{e}"))
}
