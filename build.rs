use std::{env, fs, path::Path};

/// 256 * 131072 bytes, enough for everything that allocates before the heap
/// reports ready.
const DEFAULT_BOOTSTRAP_CAPACITY: usize = 256 * 131072;

/// Must match `MIN_ALIGN` in `src/config.rs`
const MIN_ALIGN: usize = 16;

const CAPACITY_VAR: &str = "HOPEFUL_BOOTSTRAP_CAPACITY";

fn bootstrap_capacity() -> usize {
    let Ok(raw) = env::var(CAPACITY_VAR) else {
        return DEFAULT_BOOTSTRAP_CAPACITY;
    };
    let capacity = raw
        .trim()
        .parse::<usize>()
        .unwrap_or_else(|e| panic!("{CAPACITY_VAR}={raw:?} is not a byte count: {e}"));
    if capacity < MIN_ALIGN {
        panic!("{CAPACITY_VAR}={capacity} is smaller than the minimum alignment ({MIN_ALIGN})");
    }
    capacity
}

fn main() {
    println!("cargo:rerun-if-env-changed={CAPACITY_VAR}");
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = env::var_os("OUT_DIR").unwrap();
    let capacity = bootstrap_capacity();
    fs::write(
        Path::new(&out_dir).join("config.rs"),
        format!("pub const BOOTSTRAP_CAPACITY: usize = {capacity};\n"),
    )
    .unwrap();
}
