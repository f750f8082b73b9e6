//! Binds the stage-1 loader image into the library at compile time.
//!
//! The image is taken from `$STAGELOAD_STAGE1` when set, otherwise from `firmware/loader.bin`.
//! Without either, the library is built without a loader and `cfg(stage1_missing)` is set; the
//! binary then only builds in debug profiles, for tests.

use std::{env, fs, path::PathBuf};

const IMAGE_ENV: &str = "STAGELOAD_STAGE1";

fn main() {
    println!("cargo:rerun-if-env-changed={IMAGE_ENV}");
    println!("cargo:rerun-if-changed=firmware/loader.bin");
    println!("cargo:rustc-check-cfg=cfg(stage1_missing)");

    let manifest_dir = PathBuf::from(env::var_os("CARGO_MANIFEST_DIR").expect("set by cargo"));
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("set by cargo"));

    let (path, image) = match env::var_os(IMAGE_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            let image = fs::read(&path).unwrap_or_else(|err| {
                panic!("{IMAGE_ENV}={} could not be read: {err}", path.display())
            });
            (path, image)
        }
        None => {
            let path = manifest_dir.join("firmware").join("loader.bin");
            match fs::read(&path) {
                Ok(image) => (path, image),
                Err(err) => {
                    println!(
                        "cargo:warning=no stage-1 loader at {} ({err}), set {IMAGE_ENV} to bundle one",
                        path.display()
                    );
                    println!("cargo:rustc-cfg=stage1_missing");
                    return;
                }
            }
        }
    };

    if image.is_empty() {
        panic!("stage-1 loader {} is empty", path.display());
    }

    fs::write(out_dir.join("stage1.bin"), image).expect("write stage-1 image to OUT_DIR");
}
