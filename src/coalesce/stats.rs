use serde::Serialize;
use std::ops::AddAssign;

use crate::coalesce::engine::RejectReason;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CoalesceStats {
    pub vertex_reads: u64,
    pub vertex_writes: u64,
    pub read_hits: u64,
    pub read_misses: u64,
    pub read_hit_under_misses: u64,
    pub mshr_full_rejects: u64,
    pub targets_full_rejects: u64,
    pub mem_queue_full_rejects: u64,
    pub response_queue_full_rejects: u64,
    pub responses: u64,
    pub applies: u64,
    pub false_apply_schedules: u64,
    pub false_evict_schedules: u64,
    pub forwards: u64,
    pub retry_flags_set: u64,
    pub retry_sweeps: u64,
    pub empty_retry_sweeps: u64,
    pub retry_forwards: u64,
    pub retry_fills: u64,
    pub stale_retry_fills: u64,
    pub write_backs: u64,
    pub refills: u64,
    pub deallocations: u64,
    pub mem_retry_backoffs: u64,
}

impl CoalesceStats {
    pub fn read_rejections(&self) -> u64 {
        self.mshr_full_rejects
            .saturating_add(self.targets_full_rejects)
            .saturating_add(self.mem_queue_full_rejects)
            .saturating_add(self.response_queue_full_rejects)
    }

    pub fn record_reject(&mut self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::MshrFull => &mut self.mshr_full_rejects,
            RejectReason::TargetsFull => &mut self.targets_full_rejects,
            RejectReason::MemQueueFull => &mut self.mem_queue_full_rejects,
            RejectReason::ResponseQueueFull => &mut self.response_queue_full_rejects,
        };
        *counter = counter.saturating_add(1);
    }
}

impl AddAssign<&CoalesceStats> for CoalesceStats {
    fn add_assign(&mut self, other: &CoalesceStats) {
        self.vertex_reads = self.vertex_reads.saturating_add(other.vertex_reads);
        self.vertex_writes = self.vertex_writes.saturating_add(other.vertex_writes);
        self.read_hits = self.read_hits.saturating_add(other.read_hits);
        self.read_misses = self.read_misses.saturating_add(other.read_misses);
        self.read_hit_under_misses = self
            .read_hit_under_misses
            .saturating_add(other.read_hit_under_misses);
        self.mshr_full_rejects = self.mshr_full_rejects.saturating_add(other.mshr_full_rejects);
        self.targets_full_rejects = self
            .targets_full_rejects
            .saturating_add(other.targets_full_rejects);
        self.mem_queue_full_rejects = self
            .mem_queue_full_rejects
            .saturating_add(other.mem_queue_full_rejects);
        self.response_queue_full_rejects = self
            .response_queue_full_rejects
            .saturating_add(other.response_queue_full_rejects);
        self.responses = self.responses.saturating_add(other.responses);
        self.applies = self.applies.saturating_add(other.applies);
        self.false_apply_schedules = self
            .false_apply_schedules
            .saturating_add(other.false_apply_schedules);
        self.false_evict_schedules = self
            .false_evict_schedules
            .saturating_add(other.false_evict_schedules);
        self.forwards = self.forwards.saturating_add(other.forwards);
        self.retry_flags_set = self.retry_flags_set.saturating_add(other.retry_flags_set);
        self.retry_sweeps = self.retry_sweeps.saturating_add(other.retry_sweeps);
        self.empty_retry_sweeps = self.empty_retry_sweeps.saturating_add(other.empty_retry_sweeps);
        self.retry_forwards = self.retry_forwards.saturating_add(other.retry_forwards);
        self.retry_fills = self.retry_fills.saturating_add(other.retry_fills);
        self.stale_retry_fills = self.stale_retry_fills.saturating_add(other.stale_retry_fills);
        self.write_backs = self.write_backs.saturating_add(other.write_backs);
        self.refills = self.refills.saturating_add(other.refills);
        self.deallocations = self.deallocations.saturating_add(other.deallocations);
        self.mem_retry_backoffs = self.mem_retry_backoffs.saturating_add(other.mem_retry_backoffs);
    }
}

impl AddAssign<CoalesceStats> for CoalesceStats {
    fn add_assign(&mut self, other: CoalesceStats) {
        *self += &other;
    }
}
