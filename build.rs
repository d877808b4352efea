use std::env;
use std::fs;
use std::path::Path;

const DEFAULT_WORKERS: usize = 2;
const MAX_WORKERS: usize = 64;

/// Reads the default worker pool size, if overridden at build time.
fn default_workers() -> usize {
    let count = match env::var("MMREAP_DEFAULT_WORKERS") {
        Ok(var) => var
            .trim()
            .parse()
            .expect("MMREAP_DEFAULT_WORKERS must be an unsigned integer"),
        Err(_) => DEFAULT_WORKERS,
    };

    match count {
        0 => panic!("MMREAP_DEFAULT_WORKERS must be at least 1"),
        n if n > MAX_WORKERS => panic!("MMREAP_DEFAULT_WORKERS must not exceed {}", MAX_WORKERS),
        n => n,
    }
}

fn main() {
    println!("cargo:rerun-if-env-changed=MMREAP_DEFAULT_WORKERS");

    let out_dir = env::var("OUT_DIR").expect("cargo did not set OUT_DIR for the build script");
    let constants = format!("const BUILD_DEFAULT_WORKERS: usize = {};", default_workers());
    fs::write(Path::new(&out_dir).join("build_constants.rs"), constants)
        .expect("unable to write build_constants.rs");
}
