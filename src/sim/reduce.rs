use std::collections::{HashMap, VecDeque};

use log::trace;
use serde::Serialize;

use crate::coalesce::ports::{MemPort, PushPort, ReducePort};
use crate::coalesce::reduce::{Min, Reduce};
use crate::coalesce::types::{Addr, VertexRecord};
use crate::coalesce::CoalesceEngine;
use crate::sim::config::ReduceConfig;
use crate::sim::push::Update;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReduceStats {
    pub updates: u64,
    pub coalesced: u64,
    pub reads: u64,
    pub read_rejects: u64,
    pub write_backs: u64,
    pub update_queue_full: u64,
}

/// Upstream reduction model. Updates to a vertex that already has a read outstanding are folded
/// into the pending candidate, so each vertex is checked out at most once at a time.
pub struct ReduceEngine<R: Reduce = Min> {
    config: ReduceConfig,
    reducer: R,
    updates: VecDeque<Update>,
    on_the_fly: HashMap<Addr, u32>,
    delivered: VecDeque<(Addr, VertexRecord)>,
    stats: ReduceStats,
}

impl<R: Reduce> ReduceEngine<R> {
    pub fn new(config: ReduceConfig, reducer: R) -> Self {
        config.ensure_valid();
        Self {
            config,
            reducer,
            updates: VecDeque::with_capacity(config.update_queue_size),
            on_the_fly: HashMap::with_capacity(config.on_the_fly_size),
            delivered: VecDeque::new(),
            stats: ReduceStats::default(),
        }
    }

    pub fn stats(&self) -> ReduceStats {
        self.stats
    }

    pub fn is_idle(&self) -> bool {
        self.updates.is_empty() && self.on_the_fly.is_empty() && self.delivered.is_empty()
    }

    /// Accept an update unless the queue is full.
    pub fn try_push_update(&mut self, update: Update) -> bool {
        if self.updates.len() >= self.config.update_queue_size {
            self.stats.update_queue_full = self.stats.update_queue_full.saturating_add(1);
            return false;
        }
        self.updates.push_back(update);
        self.stats.updates = self.stats.updates.saturating_add(1);
        true
    }

    /// Write back one delivered record, then take one update off the queue.
    pub fn tick<M: MemPort, P: PushPort, E: Reduce>(&mut self, engine: &mut CoalesceEngine<M, P, E>) {
        if let Some((addr, mut record)) = self.delivered.pop_front() {
            let Some(candidate) = self.on_the_fly.remove(&addr) else {
                panic!("record for {addr:#x} delivered without an outstanding read");
            };
            record.temp_prop = self.reducer.reduce(record.temp_prop, candidate);
            engine.write_back(addr, record);
            self.stats.write_backs = self.stats.write_backs.saturating_add(1);
        }

        let Some(&update) = self.updates.front() else {
            return;
        };
        if let Some(pending) = self.on_the_fly.get_mut(&update.addr) {
            *pending = self.reducer.reduce(*pending, update.value);
            self.updates.pop_front();
            self.stats.coalesced = self.stats.coalesced.saturating_add(1);
        } else if self.on_the_fly.len() < self.config.on_the_fly_size {
            match engine.request_read(update.addr) {
                Ok(_) => {
                    self.on_the_fly.insert(update.addr, update.value);
                    self.updates.pop_front();
                    self.stats.reads = self.stats.reads.saturating_add(1);
                }
                Err(reject) => {
                    trace!("reduce: read {:#x} rejected ({:?}), retrying", reject.addr, reject.reason);
                    self.stats.read_rejects = self.stats.read_rejects.saturating_add(1);
                }
            }
        }
    }
}

impl<R: Reduce> ReducePort for ReduceEngine<R> {
    fn deliver_record(&mut self, addr: Addr, record: VertexRecord) {
        self.delivered.push_back((addr, record));
    }
}
