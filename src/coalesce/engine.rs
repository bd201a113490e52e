use std::collections::VecDeque;

use log::{debug, trace};

use crate::coalesce::config::CoalesceConfig;
use crate::coalesce::line::{CacheLine, LineStore};
use crate::coalesce::mshr::{MshrReject, MshrTable};
use crate::coalesce::ports::{FillTag, MemPort, MemResponse, PushPort, ReducePort};
use crate::coalesce::reduce::{Min, Reduce};
use crate::coalesce::retry::RetryBitVector;
use crate::coalesce::schedule::StepSchedule;
use crate::coalesce::stats::CoalesceStats;
use crate::coalesce::types::{decode_records, Addr, AddrMap, VertexRecord};
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MshrFull,
    TargetsFull,
    MemQueueFull,
    ResponseQueueFull,
}

impl From<MshrReject> for RejectReason {
    fn from(reject: MshrReject) -> Self {
        match reject {
            MshrReject::TableFull => RejectReason::MshrFull,
            MshrReject::TargetsFull => RejectReason::TargetsFull,
        }
    }
}

/// A read the engine could not take; the caller re-issues it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReject {
    pub addr: Addr,
    pub reason: RejectReason,
}

/// How an accepted read was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadIssue {
    /// Served from a resident line; the response is queued.
    Hit,
    /// Line allocated and a fill issued.
    Miss,
    /// Merged behind an in-flight fill for the same line address.
    HitUnderMiss,
    /// Queued behind a line held by, or being filled for, another address.
    Conflict,
}

pub type ReadResult = Result<ReadIssue, ReadReject>;

/// A retry-tagged fill on its way back from memory.
#[derive(Debug, Clone, Copy)]
pub(super) struct RetryFill {
    pub(super) line_addr: Addr,
    /// Set when the line was written back after this read was issued, so its data may be old.
    pub(super) stale: bool,
}

/// Coalescing cache between the reduction stage and backing memory.
pub struct CoalesceEngine<M: MemPort, P: PushPort, R: Reduce = Min> {
    pub(super) config: CoalesceConfig,
    pub(super) map: AddrMap,
    pub(super) lines: LineStore,
    pub(super) mshr: MshrTable,
    pub(super) retry_bits: RetryBitVector,
    pub(super) response_queue: VecDeque<(Addr, VertexRecord)>,
    pub(super) apply_queue: VecDeque<usize>,
    pub(super) evict_queue: VecDeque<usize>,
    pub(super) respond_step: StepSchedule,
    pub(super) apply_step: StepSchedule,
    pub(super) evict_step: StepSchedule,
    pub(super) retry_step: StepSchedule,
    pub(super) retries_received: usize,
    pub(super) retry_cursor: usize,
    pub(super) pending_retry_fills: VecDeque<Addr>,
    pub(super) retry_fills_inflight: Vec<RetryFill>,
    /// Evict step parked until the transport's capacity retry.
    pub(super) evict_blocked: bool,
    /// Retry fills parked until the transport's capacity retry.
    pub(super) retry_fill_blocked: bool,
    pub(super) now: Cycle,
    pub(super) mem: M,
    pub(super) push: P,
    pub(super) reducer: R,
    pub(super) stats: CoalesceStats,
}

impl<M: MemPort, P: PushPort, R: Reduce> CoalesceEngine<M, P, R> {
    /// `num_vertices` sizes the retry bit-vector for the loaded graph.
    pub fn new(
        config: CoalesceConfig,
        map: AddrMap,
        num_vertices: usize,
        mem: M,
        push: P,
        reducer: R,
    ) -> Self {
        config.ensure_valid();
        assert_eq!(
            config.atom_size as u64, map.atom_size,
            "address map and cache disagree on atom size"
        );
        let records_per_line = config.records_per_line();
        Self {
            config,
            map,
            lines: LineStore::new(
                config.num_lines(),
                records_per_line,
                config.atom_size,
                map.interleave,
            ),
            mshr: MshrTable::new(config.num_mshr_entries, config.num_targets_per_mshr),
            retry_bits: RetryBitVector::new(map.bits_for_vertices(num_vertices)),
            response_queue: VecDeque::new(),
            apply_queue: VecDeque::with_capacity(config.num_lines()),
            evict_queue: VecDeque::with_capacity(config.num_lines()),
            respond_step: StepSchedule::default(),
            apply_step: StepSchedule::default(),
            evict_step: StepSchedule::default(),
            retry_step: StepSchedule::default(),
            retries_received: 0,
            retry_cursor: 0,
            pending_retry_fills: VecDeque::new(),
            retry_fills_inflight: Vec::new(),
            evict_blocked: false,
            retry_fill_blocked: false,
            now: 0,
            mem,
            push,
            reducer,
            stats: CoalesceStats::default(),
        }
    }

    pub fn config(&self) -> &CoalesceConfig {
        &self.config
    }

    pub fn stats(&self) -> CoalesceStats {
        self.stats
    }

    pub fn mem(&self) -> &M {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    pub fn push(&self) -> &P {
        &self.push
    }

    pub fn push_mut(&mut self) -> &mut P {
        &mut self.push
    }

    pub fn line(&self, index: usize) -> &CacheLine {
        self.lines.line(index)
    }

    pub fn line_index(&self, addr: Addr) -> usize {
        self.lines.index_of(self.map.align(addr))
    }

    pub fn mshr_len(&self) -> usize {
        self.mshr.len()
    }

    pub fn mshr_targets(&self, line_index: usize) -> usize {
        self.mshr.target_count(line_index)
    }

    pub fn retry_bits(&self) -> &RetryBitVector {
        &self.retry_bits
    }

    pub fn pending_responses(&self) -> usize {
        self.response_queue.len()
    }

    /// Nothing queued, in flight, or owed downstream.
    pub fn is_idle(&self) -> bool {
        self.response_queue.is_empty()
            && self.apply_queue.is_empty()
            && self.evict_queue.is_empty()
            && self.mshr.is_empty()
            && self.retries_received == 0
            && self.pending_retry_fills.is_empty()
            && self.retry_fills_inflight.is_empty()
            && !self.retry_bits.any()
    }

    /// Record at `addr` if its line is resident, bypassing timing and busy state.
    pub fn resident_record(&self, addr: Addr) -> Option<VertexRecord> {
        let line_addr = self.map.align(addr);
        let line = self.lines.line(self.lines.index_of(line_addr));
        line.holds(line_addr).then(|| line.records[self.map.offset(addr)])
    }

    /// Untimed read; a resident line is newer than backing memory.
    pub fn read_functional(&self, addr: Addr) -> VertexRecord {
        self.resident_record(addr)
            .unwrap_or_else(|| self.mem.read_functional(addr))
    }

    /// Untimed write into the resident line if there is one, else into backing memory.
    pub fn write_functional(&mut self, addr: Addr, record: VertexRecord) {
        let line_addr = self.map.align(addr);
        let offset = self.map.offset(addr);
        let index = self.lines.index_of(line_addr);
        let line = self.lines.line_mut(index);
        if line.holds(line_addr) {
            line.records[offset] = record;
            line.dirty = true;
        } else {
            self.mem.write_functional(addr, record);
        }
    }

    pub(super) fn next_cycle(&self) -> Cycle {
        self.now.saturating_add(1)
    }

    pub fn request_read(&mut self, addr: Addr) -> ReadResult {
        let result = self.try_read(addr);
        match result {
            Ok(issue) => {
                self.stats.vertex_reads = self.stats.vertex_reads.saturating_add(1);
                trace!("read {addr:#x}: {issue:?}");
            }
            Err(reject) => {
                self.stats.record_reject(reject.reason);
                debug!("read {addr:#x} rejected: {:?}", reject.reason);
            }
        }
        result
    }

    fn try_read(&mut self, addr: Addr) -> ReadResult {
        let reject = |reason: RejectReason| ReadReject { addr, reason };
        if self.config.response_queue_size != 0
            && self.response_queue.len() >= self.config.response_queue_size
        {
            return Err(reject(RejectReason::ResponseQueueFull));
        }

        let line_addr = self.map.align(addr);
        let index = self.lines.index_of(line_addr);
        let offset = self.map.offset(addr);

        if self.lines.line(index).holds(line_addr) {
            let line = self.lines.line_mut(index);
            line.set_busy(offset);
            self.response_queue.push_back((addr, line.records[offset]));
            self.respond_step.schedule(self.next_cycle());
            self.stats.read_hits = self.stats.read_hits.saturating_add(1);
            return Ok(ReadIssue::Hit);
        }

        if self.mshr.has_entry(index) {
            self.mshr
                .push_target(index, addr)
                .map_err(|err| reject(err.into()))?;
            let line = self.lines.line_mut(index);
            if line.addr == line_addr {
                self.stats.read_hit_under_misses = self.stats.read_hit_under_misses.saturating_add(1);
                return Ok(ReadIssue::HitUnderMiss);
            }
            if !line.has_conflict {
                debug!("line[{index}]: {addr:#x} conflicts with pending {:#x}", line.addr);
            }
            line.has_conflict = true;
            self.stats.read_misses = self.stats.read_misses.saturating_add(1);
            return Ok(ReadIssue::Conflict);
        }

        if self.mshr.is_full() {
            return Err(reject(RejectReason::MshrFull));
        }

        if self.lines.line(index).allocated {
            let line = self.lines.line(index);
            assert!(
                line.valid,
                "line[{index}] @ {:#x} is filling without an MSHR entry",
                line.addr
            );
            debug!("line[{index}]: {addr:#x} conflicts with resident {:#x}", line.addr);
            self.mshr
                .push_target(index, addr)
                .map_err(|err| reject(err.into()))?;
            let line = self.lines.line_mut(index);
            line.has_conflict = true;
            if !line.is_busy() {
                // idle line: reconcile it now so it can be evicted for the new address
                self.apply_queue.push_back(index);
                self.apply_step.schedule(self.next_cycle());
            }
            self.stats.read_misses = self.stats.read_misses.saturating_add(1);
            return Ok(ReadIssue::Conflict);
        }

        if !self.mem.can_accept(1) {
            return Err(reject(RejectReason::MemQueueFull));
        }
        self.mshr
            .push_target(index, addr)
            .map_err(|err| reject(err.into()))?;
        self.lines.line_mut(index).allocate(line_addr, false);
        let accepted = self
            .mem
            .enqueue_fill_read(line_addr, self.config.atom_size, FillTag::Miss);
        assert!(accepted, "transport refused a fill for {line_addr:#x} after reporting room");
        debug!("line[{index}]: allocated for {line_addr:#x}, fill issued");
        self.stats.read_misses = self.stats.read_misses.saturating_add(1);
        Ok(ReadIssue::Miss)
    }

    /// Return a checked-out record. The read for `addr` must have been delivered.
    pub fn write_back(&mut self, addr: Addr, record: VertexRecord) {
        let line_addr = self.map.align(addr);
        let index = self.lines.index_of(line_addr);
        let offset = self.map.offset(addr);
        let line = self.lines.line_mut(index);
        assert!(
            line.addr == line_addr && line.is_record_busy(offset),
            "write-back to {addr:#x} without a checked-out record in line[{index}]"
        );

        if line.records[offset].temp_prop != record.temp_prop {
            line.dirty = true;
            self.stats.vertex_writes = self.stats.vertex_writes.saturating_add(1);
        }
        line.records[offset] = record;
        line.clear_busy(offset);
        trace!("line[{index}][{offset}] written: {record}");

        if !line.is_busy() {
            self.apply_queue.push_back(index);
            self.apply_step.schedule(self.next_cycle());
        }
    }

    pub fn on_mem_response(&mut self, response: MemResponse) {
        match response {
            MemResponse::Fill { line_addr, tag, data } => self.on_fill_response(line_addr, tag, &data),
            MemResponse::WriteAck { line_addr } => self.on_write_ack(line_addr),
        }
    }

    pub fn on_fill_response(&mut self, line_addr: Addr, tag: FillTag, data: &[u8]) {
        assert_eq!(
            self.config.atom_size,
            data.len(),
            "fill for {line_addr:#x} is not one atom"
        );
        match tag {
            FillTag::Miss => self.complete_fill(line_addr, data),
            FillTag::Retry => self.complete_retry_fill(line_addr, data),
        }
    }

    pub fn on_write_ack(&mut self, line_addr: Addr) {
        trace!("write-back of {line_addr:#x} acknowledged");
    }

    fn complete_fill(&mut self, line_addr: Addr, data: &[u8]) {
        let index = self.lines.index_of(line_addr);
        let map = self.map;
        let line = self.lines.line_mut(index);
        assert!(
            line.allocated && !line.valid && line.addr == line_addr && self.mshr.has_entry(index),
            "unexpected fill for {line_addr:#x} into line[{index}]"
        );
        line.records = decode_records(data);
        line.valid = true;

        let serviced = self
            .mshr
            .take_targets(index, |target| map.align(target) == line_addr);
        assert!(
            !serviced.is_empty(),
            "fill for {line_addr:#x} serviced no targets in line[{index}]"
        );
        for target in serviced {
            let offset = map.offset(target);
            line.set_busy(offset);
            self.response_queue.push_back((target, line.records[offset]));
        }

        if self.mshr.has_entry(index) {
            assert!(
                line.has_conflict,
                "line[{index}] keeps targets for other addresses without a conflict"
            );
        } else {
            line.has_conflict = false;
        }
        debug!(
            "line[{index}]: filled {line_addr:#x}, {} responses queued",
            self.response_queue.len()
        );
        self.respond_step.schedule(self.next_cycle());
    }

    /// Resume work parked on transport capacity.
    pub fn on_mem_retry(&mut self) {
        self.evict_blocked = false;
        self.retry_fill_blocked = false;
        self.issue_pending_retry_fills();
        if !self.evict_queue.is_empty() {
            self.evict_step.schedule(self.next_cycle());
        }
    }

    /// One scheduling step: deliver a response, then one apply, one evict and one retry sweep
    /// if each is due.
    pub fn tick<U: ReducePort>(&mut self, now: Cycle, upstream: &mut U) {
        self.now = now;
        if self.respond_step.take_due(now) {
            self.process_respond(upstream);
        }
        if self.apply_step.take_due(now) {
            self.process_apply();
        }
        if self.evict_step.take_due(now) {
            self.process_evict();
        }
        if self.retry_step.take_due(now) {
            self.process_retry_sweep();
        }
        if cfg!(debug_assertions) {
            self.check_invariants();
        }
    }

    fn process_respond<U: ReducePort>(&mut self, upstream: &mut U) {
        if let Some((addr, record)) = self.response_queue.pop_front() {
            upstream.deliver_record(addr, record);
            self.stats.responses = self.stats.responses.saturating_add(1);
        }
        if !self.response_queue.is_empty() {
            self.respond_step.schedule(self.next_cycle());
        }
    }

    pub(super) fn enqueue_evict(&mut self, index: usize) {
        if !self.evict_queue.contains(&index) {
            self.evict_queue.push_back(index);
        }
        if !self.evict_blocked {
            self.evict_step.schedule(self.next_cycle());
        }
    }

    /// Fold candidates into best values across a line, offering changes downstream.
    /// Records whose retry bit is set stay flagged; the retry responder re-offers them.
    pub(super) fn reconcile_line(&mut self, index: usize) {
        let line = self.lines.line_mut(index);
        let base_bit = self.map.bit_index_base(line.addr);
        for (i, record) in line.records.iter_mut().enumerate() {
            let best = self.reducer.reduce(record.prop, record.temp_prop);
            if best == record.prop {
                continue;
            }
            record.prop = best;
            record.temp_prop = best;
            trace!("vertex @ {:#x}: {record}", line.addr + (i * VertexRecord::BYTES) as u64);
            let bit = base_bit + i;
            if record.degree == 0 || self.retry_bits.get(bit) {
                continue;
            }
            if self.push.forward(*record) {
                self.stats.forwards = self.stats.forwards.saturating_add(1);
            } else {
                self.retry_bits.set(bit);
                self.stats.retry_flags_set = self.stats.retry_flags_set.saturating_add(1);
            }
        }
    }

    pub fn check_invariants(&self) {
        assert!(
            self.mshr.len() <= self.config.num_mshr_entries,
            "MSHR table holds {} entries over capacity {}",
            self.mshr.len(),
            self.config.num_mshr_entries
        );
        for (index, line) in self.lines.iter().enumerate() {
            line.check_invariants(index);
            assert!(
                self.mshr.target_count(index) <= self.config.num_targets_per_mshr,
                "line[{index}] holds too many MSHR targets"
            );
            if line.has_conflict || (line.allocated && !line.valid) {
                assert!(
                    self.mshr.has_entry(index),
                    "line[{index}] @ {:#x} waits on targets but has no MSHR entry",
                    line.addr
                );
            }
        }
    }
}
