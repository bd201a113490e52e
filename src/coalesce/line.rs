use crate::coalesce::types::{Addr, VertexRecord};

/// One direct-mapped slot of the cache line store.
#[derive(Debug, Clone)]
pub struct CacheLine {
    pub addr: Addr,
    pub valid: bool,
    pub allocated: bool,
    pub dirty: bool,
    pub has_conflict: bool,
    /// Bit `i` set while record `i` is checked out to the reduction stage.
    pub busy_mask: u64,
    pub records: Vec<VertexRecord>,
}

impl CacheLine {
    fn new(records_per_line: usize) -> Self {
        Self {
            addr: 0,
            valid: false,
            allocated: false,
            dirty: false,
            has_conflict: false,
            busy_mask: 0,
            records: vec![VertexRecord::default(); records_per_line],
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy_mask != 0
    }

    pub fn is_record_busy(&self, offset: usize) -> bool {
        self.busy_mask & (1 << offset) != 0
    }

    pub fn set_busy(&mut self, offset: usize) {
        self.busy_mask |= 1 << offset;
    }

    pub fn clear_busy(&mut self, offset: usize) {
        self.busy_mask &= !(1 << offset);
    }

    /// Resident and holding data for `line_addr`.
    pub fn holds(&self, line_addr: Addr) -> bool {
        self.addr == line_addr && self.valid
    }

    /// Claim the slot for `line_addr` ahead of a fill.
    pub fn allocate(&mut self, line_addr: Addr, has_conflict: bool) {
        self.addr = line_addr;
        self.busy_mask = 0;
        self.allocated = true;
        self.valid = false;
        self.dirty = false;
        self.has_conflict = has_conflict;
    }

    pub fn deallocate(&mut self) {
        self.busy_mask = 0;
        self.allocated = false;
        self.valid = false;
        self.dirty = false;
        self.has_conflict = false;
    }

    pub fn check_invariants(&self, index: usize) {
        assert!(
            !self.valid || self.allocated,
            "cache line[{index}] @ {:#x} is valid but not allocated",
            self.addr
        );
        assert!(
            self.allocated || !self.is_busy(),
            "cache line[{index}] is unallocated with records checked out"
        );
    }
}

/// Fixed array of direct-mapped cache lines.
#[derive(Debug)]
pub struct LineStore {
    lines: Vec<CacheLine>,
    atom_size: u64,
    /// Engines striping the vertex space; consecutive owned atoms map to consecutive slots.
    interleave: u64,
}

impl LineStore {
    pub fn new(num_lines: usize, records_per_line: usize, atom_size: usize, interleave: u64) -> Self {
        assert!(num_lines.is_power_of_two(), "line count must be a power of two");
        Self {
            lines: (0..num_lines).map(|_| CacheLine::new(records_per_line)).collect(),
            atom_size: atom_size as u64,
            interleave,
        }
    }

    /// Slot for an atom-aligned address.
    pub fn index_of(&self, line_addr: Addr) -> usize {
        assert_eq!(0, line_addr % self.atom_size, "line address {line_addr:#x} not aligned");
        ((line_addr / self.atom_size / self.interleave) as usize) & (self.lines.len() - 1)
    }

    pub fn line(&self, index: usize) -> &CacheLine {
        &self.lines[index]
    }

    pub fn line_mut(&mut self, index: usize) -> &mut CacheLine {
        &mut self.lines[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheLine> {
        self.lines.iter()
    }
}
