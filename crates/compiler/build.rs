//! Build script for ny-compiler
//!
//! Exports `NY_RUNTIME_LIB_PATH` pointing at the ny-runtime static archive
//! so `lib.rs` can embed it with `include_bytes!`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    if env::var("CARGO_FEATURE_DOCSRS").is_ok() {
        // docs.rs build: embed an empty archive placeholder.
        let placeholder = out_dir.join("libny_runtime.a");
        fs::write(&placeholder, b"!<arch>\n").expect("write placeholder archive");
        println!("cargo:rustc-env=NY_RUNTIME_LIB_PATH={}", placeholder.display());
        return;
    }

    // Cargo builds ny-runtime (a build-dependency) before this script runs,
    // dropping `libny_runtime*.a` somewhere in the active profile directory
    // above OUT_DIR. Where exactly depends on cargo version and settings,
    // so rather than hard-coding a layout, walk the ancestors and take the
    // freshest archive in each candidate directory or its `deps/`.
    let Some(archive) = find_newest_archive(&out_dir) else {
        panic!(
            "no libny_runtime*.a found in any ancestor of {} — \
             was the ny-runtime build-dependency disabled?",
            out_dir.display()
        );
    };

    println!("cargo:rustc-env=NY_RUNTIME_LIB_PATH={}", archive.display());
    println!("cargo:rerun-if-changed={}", archive.display());
}

fn find_newest_archive(out_dir: &Path) -> Option<PathBuf> {
    out_dir
        .ancestors()
        .flat_map(|dir| [dir.to_path_buf(), dir.join("deps")])
        .find_map(|dir| newest_archive_in(&dir))
}

/// The freshest `libny_runtime*.a` in `dir`, by mtime, so a stale archive
/// from an earlier hashed build never shadows the one cargo just produced.
fn newest_archive_in(dir: &Path) -> Option<PathBuf> {
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir).ok()?.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("libny_runtime") || !name.ends_with(".a") {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(UNIX_EPOCH);
        if best.as_ref().is_none_or(|(t, _)| modified > *t) {
            best = Some((modified, entry.path()));
        }
    }
    best.map(|(_, path)| path)
}
