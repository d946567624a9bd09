//! Tasks that are plain transforms over configured file sets.

use camino::Utf8Path;

use crate::cache::AssetCategory;
use crate::config::{Dependencies, Paths};
use crate::task::{Gate, Task};
use crate::transform::{Include, MinifyCss, MinifyJs, OptimizeImage, Rename, Scss, Transform};

/// Mirrors `inputs` into `output`, copying only what changed in production.
fn relocate(name: &str, inputs: &[String], output: &str) -> Task {
    Task::transform(name, inputs.iter(), Transform::per_file(output)).gate(Gate::Mirror(output.into()))
}

pub fn image_minify(paths: &Paths) -> Task {
    let output = &paths.build.images;

    Task::transform(
        "image:minify",
        paths.src.images.original.iter(),
        Transform::per_file(output).stage(OptimizeImage),
    )
    .gate(Gate::Mirror(output.into()))
}

pub fn image_relocate(paths: &Paths) -> Task {
    relocate("image:relocate", &paths.src.images.optimized, &paths.build.images)
}

pub fn dependencies_js(paths: &Paths, dependencies: &Dependencies) -> Task {
    let output = &paths.build.js;

    Task::transform(
        "dependencies:js",
        dependencies.js.iter(),
        Transform::bundle("dependencies.js", output)
            .stage(MinifyJs::default())
            .stage(Rename::suffix(".min")),
    )
    .gate(Gate::Output(Utf8Path::new(output).join("dependencies.min.js")))
    .bumps(AssetCategory::DependenciesJs)
}

pub fn dependencies_css(paths: &Paths, dependencies: &Dependencies) -> Task {
    let output = &paths.build.css;

    Task::transform(
        "dependencies:css",
        dependencies.css.iter(),
        Transform::bundle("dependencies.css", output)
            .stage(MinifyCss)
            .stage(Rename::suffix(".min")),
    )
    .gate(Gate::Output(Utf8Path::new(output).join("dependencies.min.css")))
    .bumps(AssetCategory::DependenciesCss)
}

/// The gate only looks at the entry file, a change to an included file alone
/// doesn't trigger a production rebuild.
pub fn js_build(paths: &Paths) -> Task {
    let output = &paths.build.js;

    Task::transform(
        "js:build",
        paths.src.js.iter(),
        Transform::per_file(output)
            .stage(Include)
            .stage(MinifyJs::with_source_map())
            .stage(Rename::suffix(".min")),
    )
    .gate(Gate::Output(Utf8Path::new(output).join("main.min.js")))
    .bumps(AssetCategory::MainJs)
}

/// Ungated: imported partials aren't part of the input set, so their changes
/// would be invisible to a freshness check.
pub fn css_build(paths: &Paths) -> Task {
    Task::transform(
        "css:build",
        paths.src.css.iter(),
        Transform::per_file(&paths.build.css)
            .stage(Scss)
            .stage(MinifyCss)
            .stage(Rename::suffix(".min").with_extension("css")),
    )
    .bumps(AssetCategory::MainCss)
}

pub fn forms_phpmailer(paths: &Paths) -> Task {
    relocate("forms:phpmailer", &paths.src.phpmailer, &paths.build.forms)
}

pub fn forms_relocate(paths: &Paths) -> Task {
    relocate("forms:relocate", &paths.src.forms, &paths.build.forms)
}

pub fn static_files(paths: &Paths) -> Task {
    relocate("relocate-static-files", &paths.src.static_files, &paths.build.static_files)
}
