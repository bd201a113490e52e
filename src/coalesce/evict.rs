use log::debug;

use crate::coalesce::engine::CoalesceEngine;
use crate::coalesce::ports::{FillTag, MemPort, PushPort};
use crate::coalesce::reduce::Reduce;
use crate::coalesce::types::encode_records;

impl<M: MemPort, P: PushPort, R: Reduce> CoalesceEngine<M, P, R> {
    /// Write back and re-arm or release the line at the head of the evict queue.
    pub(super) fn process_evict(&mut self) {
        let Some(&index) = self.evict_queue.front() else {
            return;
        };

        let line = self.lines.line(index);
        if line.is_busy() || !line.valid || self.apply_queue.contains(&index) {
            debug!(
                "evict line[{index}] @ {:#x}: stale (busy {}, valid {})",
                line.addr,
                line.is_busy(),
                line.valid
            );
            self.stats.false_evict_schedules = self.stats.false_evict_schedules.saturating_add(1);
        } else {
            let slots = usize::from(line.dirty) + usize::from(line.has_conflict);
            if slots > 0 && !self.mem.can_accept(slots) {
                debug!("evict line[{index}]: transport full, waiting for {slots} slots");
                self.mem.request_capacity_retry(slots);
                self.evict_blocked = true;
                self.stats.mem_retry_backoffs = self.stats.mem_retry_backoffs.saturating_add(1);
                // keep the head; on_mem_retry reschedules
                return;
            }
            self.evict_line(index);
        }

        self.evict_queue.pop_front();
        if !self.evict_queue.is_empty() {
            self.evict_step.schedule(self.next_cycle());
        }
    }

    fn evict_line(&mut self, index: usize) {
        let atom_size = self.config.atom_size;
        let line = self.lines.line_mut(index);
        let old_addr = line.addr;

        if line.dirty {
            let accepted = self.mem.enqueue_write_back(old_addr, encode_records(&line.records));
            assert!(accepted, "transport refused write-back of {old_addr:#x} after reporting room");
            for fill in self.retry_fills_inflight.iter_mut() {
                if fill.line_addr == old_addr {
                    fill.stale = true;
                }
            }
            self.stats.write_backs = self.stats.write_backs.saturating_add(1);
        }

        if line.has_conflict {
            // the oldest target stays in the MSHR entry and is serviced when the refill lands
            let Some(target) = self.mshr.front_target(index) else {
                panic!("line[{index}] @ {old_addr:#x} has a conflict but no pending targets");
            };
            let new_addr = self.map.align(target);
            let accepted = self.mem.enqueue_fill_read(new_addr, atom_size, FillTag::Miss);
            assert!(accepted, "transport refused refill of {new_addr:#x} after reporting room");
            line.allocate(new_addr, true);
            debug!("line[{index}]: evicted {old_addr:#x}, refilling {new_addr:#x}");
            self.stats.refills = self.stats.refills.saturating_add(1);
        } else {
            line.deallocate();
            debug!("line[{index}]: evicted {old_addr:#x}");
            self.stats.deallocations = self.stats.deallocations.saturating_add(1);
        }
    }
}
