use log::{debug, trace};

use crate::coalesce::engine::{CoalesceEngine, RetryFill};
use crate::coalesce::ports::{FillTag, MemPort, PushPort};
use crate::coalesce::reduce::Reduce;
use crate::coalesce::types::{decode_records, Addr};

/// Where a flagged group's records will come from.
#[derive(Debug, Clone, Copy)]
enum RetrySource {
    Resident(usize),
    Fill(Addr),
}

impl<M: MemPort, P: PushPort, R: Reduce> CoalesceEngine<M, P, R> {
    /// The push stage has reserved a line's worth of slots for flagged records.
    pub fn on_capacity_freed(&mut self) {
        self.retries_received += 1;
        self.retry_step.schedule(self.next_cycle());
    }

    /// One sweep of the retry bit-vector per capacity-freed notification.
    pub(super) fn process_retry_sweep(&mut self) {
        if self.retries_received == 0 {
            return;
        }
        self.retries_received -= 1;
        self.stats.retry_sweeps = self.stats.retry_sweeps.saturating_add(1);

        let per_line = self.map.records_per_line();
        let len = self.retry_bits.len();
        match self.find_retry_group() {
            Some((start, source)) => {
                self.retry_cursor = (start + per_line) % len;
                match source {
                    RetrySource::Resident(index) => {
                        debug!("retry sweep: group {start} resident in line[{index}]");
                        self.deliver_from_line(index);
                    }
                    RetrySource::Fill(line_addr) => {
                        debug!("retry sweep: group {start} needs a fill of {line_addr:#x}");
                        self.issue_retry_fill(line_addr);
                    }
                }
            }
            None => {
                if len > 0 {
                    self.retry_cursor = (self.retry_cursor + per_line) % len;
                }
                self.push.release_forward_slots(per_line);
                self.stats.empty_retry_sweeps = self.stats.empty_retry_sweeps.saturating_add(1);
            }
        }

        if self.retry_bits.any() {
            self.push.request_capacity_notification();
        }
        if self.retries_received > 0 {
            self.retry_step.schedule(self.next_cycle());
        }
    }

    /// First group from the cursor, wrapping once, with a flagged bit that can be served now.
    fn find_retry_group(&self) -> Option<(usize, RetrySource)> {
        let per_line = self.map.records_per_line();
        let groups = self.retry_bits.len() / per_line;
        if groups == 0 || !self.retry_bits.any() {
            return None;
        }
        let first = self.retry_cursor / per_line;
        (0..groups)
            .map(|step| ((first + step) % groups) * per_line)
            .filter(|&start| self.retry_bits.group(start, per_line) != 0)
            .find_map(|start| {
                let line_addr = self.map.line_addr_from_bit_index(start);
                if self.retry_fill_outstanding(line_addr) {
                    return None;
                }
                let index = self.lines.index_of(line_addr);
                let line = self.lines.line(index);
                if !line.holds(line_addr) {
                    Some((start, RetrySource::Fill(line_addr)))
                } else if line.is_busy() {
                    None
                } else {
                    Some((start, RetrySource::Resident(index)))
                }
            })
    }

    fn retry_fill_outstanding(&self, line_addr: Addr) -> bool {
        self.pending_retry_fills.contains(&line_addr)
            || self
                .retry_fills_inflight
                .iter()
                .any(|fill| fill.line_addr == line_addr)
    }

    /// Reconcile an idle resident line and hand its flagged records to the reserved slots.
    fn deliver_from_line(&mut self, index: usize) {
        let per_line = self.map.records_per_line();
        let line = self.lines.line_mut(index);
        let base_bit = self.map.bit_index_base(line.addr);
        let mut delivered = 0;
        for (i, record) in line.records.iter_mut().enumerate() {
            let best = self.reducer.reduce(record.prop, record.temp_prop);
            let changed = best != record.prop;
            if changed {
                record.prop = best;
                record.temp_prop = best;
                line.dirty = true;
            }
            let bit = base_bit + i;
            if self.retry_bits.get(bit) {
                self.push.forward_retry(*record);
                self.retry_bits.clear(bit);
                delivered += 1;
                self.stats.retry_forwards = self.stats.retry_forwards.saturating_add(1);
            } else if changed && record.degree != 0 {
                if self.push.forward(*record) {
                    self.stats.forwards = self.stats.forwards.saturating_add(1);
                } else {
                    self.retry_bits.set(bit);
                    self.stats.retry_flags_set = self.stats.retry_flags_set.saturating_add(1);
                }
            }
        }
        let has_conflict = line.has_conflict;
        self.push.release_forward_slots(per_line - delivered);

        // the line is reconciled; a queued apply for it has nothing left to do
        if self.apply_queue.contains(&index) {
            self.apply_queue.retain(|&queued| queued != index);
            if self.apply_queue.is_empty() {
                self.apply_step.deschedule();
            }
            if has_conflict {
                self.enqueue_evict(index);
            }
        }
    }

    fn issue_retry_fill(&mut self, line_addr: Addr) {
        if self.mem.can_accept(1) {
            let accepted = self
                .mem
                .enqueue_fill_read(line_addr, self.config.atom_size, FillTag::Retry);
            assert!(accepted, "transport refused retry fill of {line_addr:#x} after reporting room");
            self.retry_fills_inflight.push(RetryFill {
                line_addr,
                stale: false,
            });
            self.stats.retry_fills = self.stats.retry_fills.saturating_add(1);
        } else {
            self.pending_retry_fills.push_back(line_addr);
            if !self.retry_fill_blocked {
                self.mem.request_capacity_retry(1);
                self.retry_fill_blocked = true;
                self.stats.mem_retry_backoffs = self.stats.mem_retry_backoffs.saturating_add(1);
            }
        }
    }

    pub(super) fn issue_pending_retry_fills(&mut self) {
        while let Some(&line_addr) = self.pending_retry_fills.front() {
            if !self.mem.can_accept(1) {
                self.mem.request_capacity_retry(1);
                self.retry_fill_blocked = true;
                return;
            }
            self.pending_retry_fills.pop_front();
            self.issue_retry_fill(line_addr);
        }
    }

    /// A retry-tagged fill landed. Resident state wins over the packet; a line written back or
    /// checked out since the read was issued keeps its bits for a later sweep. Clearing them
    /// there would drop the change: the checked-out record may still improve, and nothing else
    /// re-offers a flagged record.
    pub(super) fn complete_retry_fill(&mut self, line_addr: Addr, data: &[u8]) {
        let Some(pos) = self
            .retry_fills_inflight
            .iter()
            .position(|fill| fill.line_addr == line_addr)
        else {
            panic!("retry fill for {line_addr:#x} was never issued");
        };
        let fill = self.retry_fills_inflight.remove(pos);
        let per_line = self.map.records_per_line();
        let index = self.lines.index_of(line_addr);
        let line = self.lines.line(index);

        if fill.stale || (line.holds(line_addr) && line.is_busy()) {
            debug!("retry fill {line_addr:#x}: stale, flags kept");
            self.push.release_forward_slots(per_line);
            self.stats.stale_retry_fills = self.stats.stale_retry_fills.saturating_add(1);
        } else if line.holds(line_addr) {
            debug!("retry fill {line_addr:#x}: line resident, serving from cache");
            self.deliver_from_line(index);
        } else {
            let base_bit = self.map.bit_index_base(line_addr);
            let mut delivered = 0;
            for (i, record) in decode_records(data).into_iter().enumerate() {
                let bit = base_bit + i;
                if self.retry_bits.get(bit) {
                    trace!("retry fill {line_addr:#x}[{i}]: {record}");
                    self.push.forward_retry(record);
                    self.retry_bits.clear(bit);
                    delivered += 1;
                    self.stats.retry_forwards = self.stats.retry_forwards.saturating_add(1);
                }
            }
            self.push.release_forward_slots(per_line - delivered);
        }

        if self.retry_bits.any() {
            self.push.request_capacity_notification();
        }
    }
}
