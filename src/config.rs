//! Build-time configuration. `BOOTSTRAP_CAPACITY` comes from `build.rs`, set
//! `HOPEFUL_BOOTSTRAP_CAPACITY` (bytes) when building to change it.

include!(concat!(env!("OUT_DIR"), "/config.rs"));

/// Every pointer the facade hands out is aligned to this, whichever phase
/// it was allocated in. Also the size of the block header.
pub const MIN_ALIGN: usize = 16;

const _: () = assert!(BOOTSTRAP_CAPACITY >= MIN_ALIGN);
