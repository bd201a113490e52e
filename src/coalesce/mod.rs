//! Coalescing vertex cache: a direct-mapped line store with MSHR merging, deferred
//! apply/evict steps, and a retry bit-vector for records the push stage could not take.

mod apply;
pub mod config;
mod engine;
mod evict;
pub mod line;
mod mshr;
pub mod ports;
pub mod reduce;
mod respond;
pub mod retry;
mod schedule;
mod stats;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::CoalesceConfig;
pub use engine::{CoalesceEngine, ReadIssue, ReadReject, ReadResult, RejectReason};
pub use mshr::MshrReject;
pub use ports::{FillTag, MemPort, MemRequest, MemResponse, PushPort, ReducePort};
pub use reduce::{Min, Reduce};
pub use stats::CoalesceStats;
pub use types::{decode_records, encode_records, Addr, AddrMap, VertexRecord};
