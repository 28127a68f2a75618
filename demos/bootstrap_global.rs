//! Run with `RUST_LOG=info cargo run --example bootstrap_global`. Everything
//! here, `env_logger` included, allocates through the facade.

use hopeful::{mark_ready, HopefulAlloc, Readiness, FACADE, HEAP_READY};

#[global_allocator]
static GLOBAL: HopefulAlloc = HopefulAlloc;

fn main() {
    env_logger::init();

    let stats = FACADE.stats();
    log::info!(
        "heap ready: {}, bootstrap region: {}/{} bytes in {} allocations",
        HEAP_READY.is_ready(),
        stats.bootstrap_used,
        stats.bootstrap_capacity,
        stats.bootstrap_allocations,
    );

    mark_ready();
    log::info!("heap ready: {}", HEAP_READY.is_ready());

    let words: Vec<String> = (0..1000).map(|i| format!("word{i}")).collect();
    let total: usize = words.iter().map(String::len).sum();
    log::info!("allocated {} strings, {total} bytes of text", words.len());

    let p = words[0].as_ptr() as *mut u8;
    log::info!(
        "first string lives in the {}, usable size {}",
        if FACADE.is_bootstrap_pointer(p) { "bootstrap region" } else { "heap" },
        unsafe { FACADE.usable_size(p) },
    );

    log::info!("{}", serde_json::to_string(&FACADE.stats()).unwrap());
}
