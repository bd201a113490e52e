use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace};
use serde::Serialize;

use crate::coalesce::ports::PushPort;
use crate::coalesce::types::{Addr, VertexRecord};
use crate::sim::config::{PushConfig, Workload};
use crate::sim::graph::Edge;
use crate::timeq::{Cycle, ServerConfig, ServiceRequest, TimedServer};

const EDGE_BYTES: u32 = 8;
const EDGE_BYTES_PER_CYCLE: u32 = 64;

/// A candidate value for the vertex record at `addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Update {
    pub addr: Addr,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PushStats {
    pub records: u64,
    pub retry_records: u64,
    pub refusals: u64,
    pub released_slots: u64,
    pub notifications: u64,
    pub updates: u64,
}

/// Downstream propagation model: each accepted record holds a slot while its edge list is
/// fetched and its updates wait to be routed.
pub struct PushEngine {
    config: PushConfig,
    workload: Workload,
    edges: Arc<[Edge]>,
    vertex_base: Addr,
    /// Slots reserved per capacity-freed notification: one line's worth of records.
    quantum: usize,
    used: usize,
    reserved: usize,
    fetch: TimedServer<VertexRecord>,
    /// Pending updates; the flag marks the last update of its record.
    updates: VecDeque<(Update, bool)>,
    notify_wanted: bool,
    notifications: usize,
    now: Cycle,
    stats: PushStats,
}

impl PushEngine {
    pub fn new(
        config: PushConfig,
        workload: Workload,
        edges: Arc<[Edge]>,
        vertex_base: Addr,
        quantum: usize,
    ) -> Self {
        assert!(
            config.queue_size >= quantum,
            "push queue_size {} cannot reserve a line of {quantum} records",
            config.queue_size
        );
        let fetch = TimedServer::new(ServerConfig {
            base_latency: config.edge_latency,
            bytes_per_cycle: EDGE_BYTES_PER_CYCLE,
            queue_capacity: config.queue_size,
        });
        Self {
            config,
            workload,
            edges,
            vertex_base,
            quantum,
            used: 0,
            reserved: 0,
            fetch,
            updates: VecDeque::new(),
            notify_wanted: false,
            notifications: 0,
            now: 0,
            stats: PushStats::default(),
        }
    }

    pub fn stats(&self) -> PushStats {
        self.stats
    }

    pub fn free_slots(&self) -> usize {
        self.config.queue_size - self.used - self.reserved
    }

    pub fn is_idle(&self) -> bool {
        self.used == 0 && self.reserved == 0 && self.notifications == 0 && self.fetch.is_idle()
    }

    fn start_fetch(&mut self, record: VertexRecord) {
        if record.degree == 0 {
            self.used -= 1;
            return;
        }
        let request = ServiceRequest::new(record, record.degree * EDGE_BYTES);
        if self.fetch.try_enqueue(self.now, request).is_err() {
            panic!("edge fetch refused a record holding a slot");
        }
    }

    /// Expand fetched edge lists into updates and grant a pending notification if a line's
    /// worth of slots is free.
    pub fn tick(&mut self, now: Cycle) {
        self.now = now;
        let edges = &self.edges;
        let workload = self.workload;
        let vertex_base = self.vertex_base;
        let updates = &mut self.updates;
        let stats = &mut self.stats;
        self.fetch.service_ready(now, |result| {
            let record = result.payload;
            let start = record.edge_index as usize;
            let list = &edges[start..start + record.degree as usize];
            for (i, edge) in list.iter().enumerate() {
                let update = Update {
                    addr: vertex_base + edge.neighbor as Addr * VertexRecord::BYTES as Addr,
                    value: workload.propagate(record.prop, edge.weight),
                };
                updates.push_back((update, i + 1 == list.len()));
                stats.updates = stats.updates.saturating_add(1);
            }
        });

        if self.notify_wanted && self.free_slots() >= self.quantum {
            self.notify_wanted = false;
            self.reserved += self.quantum;
            self.notifications += 1;
            self.stats.notifications = self.stats.notifications.saturating_add(1);
            debug!("push @ {now}: reserved {} slots for retries", self.quantum);
        }
    }

    pub fn peek_update(&self) -> Option<Update> {
        self.updates.front().map(|(update, _)| *update)
    }

    pub fn pop_update(&mut self) -> Option<Update> {
        let (update, last) = self.updates.pop_front()?;
        if last {
            self.used -= 1;
        }
        Some(update)
    }

    /// Capacity-freed notifications granted since the last call.
    pub fn take_notifications(&mut self) -> usize {
        std::mem::take(&mut self.notifications)
    }
}

impl PushPort for PushEngine {
    fn forward(&mut self, record: VertexRecord) -> bool {
        if self.free_slots() == 0 {
            self.notify_wanted = true;
            self.stats.refusals = self.stats.refusals.saturating_add(1);
            return false;
        }
        trace!("push: accepted {record}");
        self.used += 1;
        self.stats.records = self.stats.records.saturating_add(1);
        self.start_fetch(record);
        true
    }

    fn forward_retry(&mut self, record: VertexRecord) {
        assert!(self.reserved > 0, "retry forward without a reserved slot");
        self.reserved -= 1;
        self.used += 1;
        self.stats.retry_records = self.stats.retry_records.saturating_add(1);
        self.start_fetch(record);
    }

    fn release_forward_slots(&mut self, count: usize) {
        assert!(
            count <= self.reserved,
            "releasing {count} slots with only {} reserved",
            self.reserved
        );
        self.reserved -= count;
        self.stats.released_slots = self.stats.released_slots.saturating_add(count as u64);
    }

    fn request_capacity_notification(&mut self) {
        self.notify_wanted = true;
    }
}
