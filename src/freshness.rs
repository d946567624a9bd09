//! Mtime-based staleness checks.
//!
//! Only active in [`Mode::Production`]. In development every task always runs,
//! so a save is never hidden behind a stale timestamp.
//!
//! An output whose mtime equals the newest input's mtime counts as fresh.

use std::time::SystemTime;

use camino::Utf8Path;

use crate::Mode;
use crate::fileset::FileSet;

/// Get the modification time of a file, `None` if it can't be read.
pub fn mtime(path: &Utf8Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

/// Decides whether a task whose single declared output is `output` can be
/// skipped.
///
/// Skips iff the mode is production, `output` exists, and it is at least as
/// new as every input. An input whose mtime can't be read never skips.
pub fn should_skip(mode: Mode, inputs: &FileSet, output: &Utf8Path) -> bool {
    if mode != Mode::Production {
        return false;
    }

    let Some(output_time) = mtime(output) else {
        return false;
    };

    inputs
        .paths()
        .all(|path| mtime(path).is_some_and(|input_time| output_time >= input_time))
}

/// Drops every input whose mirrored file under `dest` is at least as new as
/// the input itself. Used when a task writes one output per input.
pub fn retain_stale(mode: Mode, inputs: &mut FileSet, dest: &Utf8Path) {
    if mode != Mode::Production {
        return;
    }

    inputs.retain(|input| {
        let Some(output_time) = mtime(&dest.join(input.relative())) else {
            return true;
        };

        match mtime(&input.path) {
            Some(input_time) => output_time < input_time,
            None => true,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::resolve;
    use camino::Utf8PathBuf;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("out")).unwrap();
        (dir, root)
    }

    fn touch(path: &Utf8Path, at: SystemTime) {
        if !path.exists() {
            fs::write(path, b"x").unwrap();
        }
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(at)
            .unwrap();
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    #[test]
    fn equal_mtime_is_fresh() {
        let (_dir, root) = fixture();
        touch(&root.join("src/a.js"), at(10));
        touch(&root.join("src/b.js"), at(20));
        touch(&root.join("out/all.js"), at(20));

        let inputs = resolve(&root, &["src/*.js"]).unwrap();

        assert!(should_skip(Mode::Production, &inputs, &root.join("out/all.js")));
    }

    #[test]
    fn older_output_is_stale() {
        let (_dir, root) = fixture();
        touch(&root.join("src/a.js"), at(10));
        touch(&root.join("src/b.js"), at(30));
        touch(&root.join("out/all.js"), at(20));

        let inputs = resolve(&root, &["src/*.js"]).unwrap();

        assert!(!should_skip(Mode::Production, &inputs, &root.join("out/all.js")));
    }

    #[test]
    fn missing_output_never_skips() {
        let (_dir, root) = fixture();
        touch(&root.join("src/a.js"), at(10));

        let inputs = resolve(&root, &["src/*.js"]).unwrap();

        assert!(!should_skip(Mode::Production, &inputs, &root.join("out/none.js")));
    }

    #[test]
    fn vanished_input_never_skips() {
        let (_dir, root) = fixture();
        touch(&root.join("src/a.js"), at(10));
        touch(&root.join("src/b.js"), at(10));
        touch(&root.join("out/all.js"), at(50));

        let inputs = resolve(&root, &["src/*.js"]).unwrap();
        fs::remove_file(root.join("src/b.js")).unwrap();

        assert!(!should_skip(Mode::Production, &inputs, &root.join("out/all.js")));
    }

    #[test]
    fn development_never_skips() {
        let (_dir, root) = fixture();
        touch(&root.join("src/a.js"), at(10));
        touch(&root.join("out/all.js"), at(50));

        let inputs = resolve(&root, &["src/*.js"]).unwrap();

        assert!(!should_skip(Mode::Development, &inputs, &root.join("out/all.js")));
    }

    #[test]
    fn mirrored_inputs_are_filtered_individually() {
        let (_dir, root) = fixture();
        touch(&root.join("src/fresh.png"), at(10));
        touch(&root.join("out/fresh.png"), at(10));
        touch(&root.join("src/stale.png"), at(30));
        touch(&root.join("out/stale.png"), at(20));
        touch(&root.join("src/new.png"), at(10));

        let mut inputs = resolve(&root, &["src/*.png"]).unwrap();
        retain_stale(Mode::Production, &mut inputs, &root.join("out"));

        let names: Vec<_> = inputs.iter().map(|i| i.relative().to_string()).collect();
        assert_eq!(names, ["new.png", "stale.png"]);
    }
}
