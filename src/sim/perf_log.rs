use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::AddAssign;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::coalesce::CoalesceStats;
use crate::sim::config::Workload;
use crate::sim::memory::MemStats;
use crate::sim::push::PushStats;
use crate::sim::reduce::ReduceStats;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub coalesce: CoalesceStats,
    pub mem: MemStats,
    pub push: PushStats,
    pub reduce: ReduceStats,
}

#[derive(Debug, Default, Serialize)]
pub struct AggregateSummary {
    pub num_channels: usize,
    pub coalesce: CoalesceStats,
    pub mem_bytes_read: u64,
    pub mem_bytes_written: u64,
    pub push_updates: u64,
    pub reduce_coalesced: u64,
}

impl AddAssign<&ChannelSummary> for AggregateSummary {
    fn add_assign(&mut self, channel: &ChannelSummary) {
        self.num_channels += 1;
        self.coalesce += &channel.coalesce;
        self.mem_bytes_read = self.mem_bytes_read.saturating_add(channel.mem.bytes_read);
        self.mem_bytes_written = self
            .mem_bytes_written
            .saturating_add(channel.mem.bytes_written);
        self.push_updates = self.push_updates.saturating_add(channel.push.updates);
        self.reduce_coalesced = self.reduce_coalesced.saturating_add(channel.reduce.coalesced);
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub workload: Workload,
    pub num_vertices: usize,
    pub num_edges: usize,
    pub root: usize,
    pub cycles: Cycle,
    pub finished: bool,
    pub reached: usize,
    pub total: AggregateSummary,
    pub per_channel: Vec<ChannelSummary>,
}

impl RunSummary {
    pub fn hit_rate(&self) -> f64 {
        let stats = &self.total.coalesce;
        if stats.vertex_reads == 0 {
            return 0.0;
        }
        stats.read_hits as f64 / stats.vertex_reads as f64
    }
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary).context("failed to serialize run summary")?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(read_hits: u64, vertex_reads: u64) -> ChannelSummary {
        ChannelSummary {
            coalesce: CoalesceStats {
                read_hits,
                vertex_reads,
                ..CoalesceStats::default()
            },
            mem: MemStats {
                bytes_read: 64,
                ..MemStats::default()
            },
            push: PushStats::default(),
            reduce: ReduceStats::default(),
        }
    }

    #[test]
    fn aggregate_sums_channels() {
        let per_channel = vec![channel(1, 4), channel(3, 4)];
        let mut total = AggregateSummary::default();
        per_channel.iter().for_each(|channel| total += channel);
        let summary = RunSummary {
            workload: Workload::Bfs,
            num_vertices: 8,
            num_edges: 0,
            root: 0,
            cycles: 10,
            finished: true,
            reached: 1,
            total,
            per_channel,
        };
        assert_eq!(2, summary.total.num_channels);
        assert_eq!(128, summary.total.mem_bytes_read);
        assert!((summary.hit_rate() - 0.5).abs() < 1e-9);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!("bfs", json["workload"]);
        assert_eq!(4, json["total"]["coalesce"]["read_hits"]);
    }

    #[test]
    fn summary_written_as_json() {
        let dir = std::env::temp_dir().join(format!("coalescer_summary_{}", std::process::id()));
        let path = dir.join("run.json");
        let summary = RunSummary {
            workload: Workload::Sssp,
            num_vertices: 0,
            num_edges: 0,
            root: 0,
            cycles: 0,
            finished: false,
            reached: 0,
            total: AggregateSummary::default(),
            per_channel: Vec::new(),
        };
        write_summary(&path, &summary).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!("sssp", json["workload"]);
        assert_eq!(false, json["finished"]);
        fs::remove_dir_all(dir).unwrap();
    }
}
