pub mod bootstrap;
pub mod dlmalloc;
pub mod facade;
pub mod fault;
pub mod global;
pub mod header;
pub mod heap;
pub mod readiness;
