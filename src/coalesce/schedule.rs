use crate::timeq::Cycle;

/// Dedup state for one kind of follow-up step: at most one instance is ever scheduled, and it
/// runs on the first tick at or after its cycle.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StepSchedule {
    at: Option<Cycle>,
}

impl StepSchedule {
    /// Returns false when the step was already scheduled.
    pub(crate) fn schedule(&mut self, at: Cycle) -> bool {
        if self.at.is_some() {
            return false;
        }
        self.at = Some(at);
        true
    }

    pub(crate) fn deschedule(&mut self) {
        self.at = None;
    }

    /// Consume the schedule if it is due at `now`.
    pub(crate) fn take_due(&mut self, now: Cycle) -> bool {
        match self.at {
            Some(at) if at <= now => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StepSchedule;

    #[test]
    fn schedule_is_deduplicated() {
        let mut step = StepSchedule::default();
        assert!(step.schedule(3));
        assert!(!step.schedule(1));
        assert!(!step.take_due(2));
        assert!(step.take_due(3));
        assert!(!step.take_due(u64::MAX));
    }

    #[test]
    fn deschedule_cancels() {
        let mut step = StepSchedule::default();
        step.schedule(0);
        step.deschedule();
        assert!(!step.take_due(10));
    }
}
