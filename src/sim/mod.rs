pub mod config;
pub mod graph;
pub mod log;
pub mod memory;
pub mod perf_log;
pub mod push;
pub mod reduce;
pub mod top;
