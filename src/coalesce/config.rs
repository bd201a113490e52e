use serde::Deserialize;

use crate::coalesce::types::VertexRecord;
use crate::sim::config::Config;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CoalesceConfig {
    /// Total bytes of cache-line storage.
    pub cache_size: usize,
    /// Backing-memory transfer granularity; one cache line holds one atom.
    pub atom_size: usize,
    pub num_mshr_entries: usize,
    pub num_targets_per_mshr: usize,
    /// Soft limit on undelivered responses, zero for unbounded.
    pub response_queue_size: usize,
}

impl Config for CoalesceConfig {}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            cache_size: 1024,
            atom_size: 64,
            num_mshr_entries: 16,
            num_targets_per_mshr: 8,
            response_queue_size: 0,
        }
    }
}

impl CoalesceConfig {
    /// Fail fast on geometry the direct-mapped store cannot represent.
    pub fn ensure_valid(&self) {
        assert!(self.atom_size > 0, "atom_size must be > 0");
        assert!(
            self.atom_size % VertexRecord::BYTES == 0,
            "atom_size must hold whole vertex records"
        );
        assert!(
            self.records_per_line().is_power_of_two(),
            "records per line must be a power of two"
        );
        assert!(
            self.records_per_line() <= 64,
            "busy mask holds at most 64 records per line"
        );
        assert!(self.cache_size >= self.atom_size, "cache must hold at least one line");
        assert!(
            self.cache_size % self.atom_size == 0,
            "cache_size must be a multiple of atom_size"
        );
        assert!(self.num_lines().is_power_of_two(), "line count must be a power of two");
        assert!(self.num_mshr_entries > 0, "num_mshr_entries must be > 0");
        assert!(self.num_targets_per_mshr > 0, "num_targets_per_mshr must be > 0");
    }

    pub fn num_lines(&self) -> usize {
        self.cache_size / self.atom_size
    }

    pub fn records_per_line(&self) -> usize {
        self.atom_size / VertexRecord::BYTES
    }
}
