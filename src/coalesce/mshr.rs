use smallvec::SmallVec;

use crate::coalesce::types::Addr;

/// Why a target could not be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MshrReject {
    /// No free entry for a new line index.
    TableFull,
    /// The line's target list is at its bound.
    TargetsFull,
}

#[derive(Debug)]
pub(crate) struct MshrEntry {
    line_index: usize,
    pub(crate) targets: SmallVec<[Addr; 4]>,
}

impl MshrEntry {
    fn new(line_index: usize) -> Self {
        Self {
            line_index,
            targets: SmallVec::new(),
        }
    }
}

/// Pending target addresses per cache-line index, bounded in entries and in targets per entry.
#[derive(Debug)]
pub(crate) struct MshrTable {
    capacity: usize,
    targets_per_entry: usize,
    entries: Vec<MshrEntry>,
}

impl MshrTable {
    pub(crate) fn new(capacity: usize, targets_per_entry: usize) -> Self {
        Self {
            capacity,
            targets_per_entry,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub(crate) fn has_entry(&self, line_index: usize) -> bool {
        self.entries.iter().any(|entry| entry.line_index == line_index)
    }

    pub(crate) fn target_count(&self, line_index: usize) -> usize {
        self.entry(line_index).map_or(0, |entry| entry.targets.len())
    }

    /// Whether `push_target` would succeed for `line_index`.
    pub(crate) fn check(&self, line_index: usize) -> Result<(), MshrReject> {
        match self.entry(line_index) {
            Some(entry) if entry.targets.len() >= self.targets_per_entry => {
                Err(MshrReject::TargetsFull)
            }
            Some(_) => Ok(()),
            None if self.is_full() => Err(MshrReject::TableFull),
            None => Ok(()),
        }
    }

    /// Append `addr` to the line's targets, creating the entry if needed.
    pub(crate) fn push_target(&mut self, line_index: usize, addr: Addr) -> Result<(), MshrReject> {
        self.check(line_index)?;
        let pos = match self.position(line_index) {
            Some(pos) => pos,
            None => {
                self.entries.push(MshrEntry::new(line_index));
                self.entries.len() - 1
            }
        };
        self.entries[pos].targets.push(addr);
        Ok(())
    }

    /// Oldest pending target for the line.
    pub(crate) fn front_target(&self, line_index: usize) -> Option<Addr> {
        self.entry(line_index).and_then(|entry| entry.targets.first().copied())
    }

    /// Remove and return, in append order, every target that `serviceable` accepts. The entry
    /// is erased once it has no targets left.
    pub(crate) fn take_targets<F>(&mut self, line_index: usize, mut serviceable: F) -> SmallVec<[Addr; 4]>
    where
        F: FnMut(Addr) -> bool,
    {
        let Some(pos) = self.position(line_index) else {
            return SmallVec::new();
        };
        let entry = &mut self.entries[pos];
        let mut taken = SmallVec::new();
        entry.targets.retain(|addr| {
            if serviceable(*addr) {
                taken.push(*addr);
                false
            } else {
                true
            }
        });
        if entry.targets.is_empty() {
            self.entries.swap_remove(pos);
        }
        taken
    }

    fn position(&self, line_index: usize) -> Option<usize> {
        self.entries.iter().position(|entry| entry.line_index == line_index)
    }

    fn entry(&self, line_index: usize) -> Option<&MshrEntry> {
        self.entries.iter().find(|entry| entry.line_index == line_index)
    }
}
