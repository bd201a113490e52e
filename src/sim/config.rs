use std::path::PathBuf;
use std::str::FromStr;

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::coalesce::types::Addr;
use crate::timeq::{Cycle, ServerConfig};

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: u64,
    pub timeout: u64,
    /// Where to write the JSON run summary, if anywhere.
    pub summary_json: Option<PathBuf>,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            timeout: 10_000_000,
            summary_json: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MemConfig {
    pub base_latency: Cycle,
    pub bytes_per_cycle: u32,
    /// Outstanding requests per memory channel.
    pub queue_capacity: usize,
    /// Address of vertex 0.
    pub base_addr: Addr,
    /// Number of engines the vertex space is striped across, one atom at a time.
    pub interleave: usize,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            base_latency: 20,
            bytes_per_cycle: 32,
            queue_capacity: 8,
            base_addr: 0,
            interleave: 1,
        }
    }
}

impl MemConfig {
    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            base_latency: self.base_latency,
            bytes_per_cycle: self.bytes_per_cycle,
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn ensure_valid(&self) {
        assert!(self.bytes_per_cycle > 0, "bytes_per_cycle must be > 0");
        assert!(self.queue_capacity >= 2, "memory queue must fit a write-back and a refill");
        assert!(self.interleave > 0, "interleave must be > 0");
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PushConfig {
    /// Forward slots; must hold at least one line's worth of records.
    pub queue_size: usize,
    /// Cycles to fetch one record's edge list.
    pub edge_latency: Cycle,
}

impl Config for PushConfig {}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            queue_size: 16,
            edge_latency: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ReduceConfig {
    pub update_queue_size: usize,
    /// Distinct vertices with a read outstanding or a record checked out.
    pub on_the_fly_size: usize,
}

impl Config for ReduceConfig {}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            update_queue_size: 32,
            on_the_fly_size: 16,
        }
    }
}

impl ReduceConfig {
    pub fn ensure_valid(&self) {
        assert!(self.update_queue_size > 0, "update_queue_size must be > 0");
        assert!(self.on_the_fly_size > 0, "on_the_fly_size must be > 0");
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Workload {
    #[default]
    Bfs,
    Sssp,
}

impl Workload {
    /// Value offered to a neighbor across an edge.
    pub fn propagate(&self, value: u32, weight: u32) -> u32 {
        match self {
            Workload::Bfs => value.saturating_add(1),
            Workload::Sssp => value.saturating_add(weight),
        }
    }
}

impl FromStr for Workload {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bfs" => Ok(Self::Bfs),
            "sssp" => Ok(Self::Sssp),
            _ => Err(format!(
                "unsupported workload '{}', expected one of: bfs, sssp",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConfig {
    /// Edge list to load; a random graph is generated when unset.
    pub path: Option<PathBuf>,
    pub num_vertices: usize,
    pub avg_degree: usize,
    pub max_weight: u32,
    pub seed: u64,
    pub root: usize,
    pub workload: Workload,
}

impl Config for GraphConfig {}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            path: None,
            num_vertices: 256,
            avg_degree: 4,
            max_weight: 16,
            seed: 0,
            root: 0,
            workload: Workload::Bfs,
        }
    }
}
