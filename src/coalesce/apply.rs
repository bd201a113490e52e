use log::debug;

use crate::coalesce::engine::CoalesceEngine;
use crate::coalesce::ports::{MemPort, PushPort};
use crate::coalesce::reduce::Reduce;

impl<M: MemPort, P: PushPort, R: Reduce> CoalesceEngine<M, P, R> {
    /// Reconcile the line at the head of the apply queue.
    ///
    /// A head entry whose line went busy or lost residency since it was queued is dropped as a
    /// false schedule; a later write-back re-queues it. Dirty stays set so eviction still writes
    /// the line out.
    pub(super) fn process_apply(&mut self) {
        let Some(&index) = self.apply_queue.front() else {
            return;
        };

        let line = self.lines.line(index);
        if line.is_busy() || !line.valid {
            debug!(
                "apply line[{index}] @ {:#x}: stale (busy {}, valid {})",
                line.addr,
                line.is_busy(),
                line.valid
            );
            self.stats.false_apply_schedules = self.stats.false_apply_schedules.saturating_add(1);
            // a busy conflicted line is evicted after its write-back re-queues the apply
        } else {
            if line.dirty {
                self.reconcile_line(index);
                self.stats.applies = self.stats.applies.saturating_add(1);
            }
            if self.lines.line(index).has_conflict {
                self.enqueue_evict(index);
            }
        }

        self.apply_queue.pop_front();
        if !self.apply_queue.is_empty() {
            self.apply_step.schedule(self.next_cycle());
        }
    }
}
