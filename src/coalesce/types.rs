use serde::Serialize;

pub type Addr = u64;

/// Per-vertex work-list record as laid out in backing memory.
///
/// `prop` is the best value known so far, `temp_prop` the candidate the reduction stage has
/// folded in since the last apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VertexRecord {
    pub prop: u32,
    pub temp_prop: u32,
    pub degree: u32,
    pub edge_index: u32,
}

impl VertexRecord {
    /// Serialized size in bytes (four little-endian words).
    pub const BYTES: usize = 16;

    pub fn new(prop: u32, temp_prop: u32, degree: u32, edge_index: u32) -> Self {
        Self {
            prop,
            temp_prop,
            degree,
            edge_index,
        }
    }

    /// A record that has never been reached: both values at the identity of "keep minimum".
    pub fn unreached(degree: u32, edge_index: u32) -> Self {
        Self::new(u32::MAX, u32::MAX, degree, edge_index)
    }

    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let mut out = [0u8; Self::BYTES];
        out[0..4].copy_from_slice(&self.prop.to_le_bytes());
        out[4..8].copy_from_slice(&self.temp_prop.to_le_bytes());
        out[8..12].copy_from_slice(&self.degree.to_le_bytes());
        out[12..16].copy_from_slice(&self.edge_index.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert!(
            bytes.len() >= Self::BYTES,
            "vertex record needs {} bytes, got {}",
            Self::BYTES,
            bytes.len()
        );
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            prop: word(0),
            temp_prop: word(4),
            degree: word(8),
            edge_index: word(12),
        }
    }
}

impl std::fmt::Display for VertexRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{prop: {}, temp_prop: {}, degree: {}, edge_index: {}}}",
            self.prop, self.temp_prop, self.degree, self.edge_index
        )
    }
}

pub fn encode_records(records: &[VertexRecord]) -> Vec<u8> {
    records.iter().flat_map(|record| record.to_bytes()).collect()
}

pub fn decode_records(bytes: &[u8]) -> Vec<VertexRecord> {
    assert_eq!(
        0,
        bytes.len() % VertexRecord::BYTES,
        "line data must hold whole records"
    );
    bytes
        .chunks_exact(VertexRecord::BYTES)
        .map(VertexRecord::from_bytes)
        .collect()
}

/// Maps vertex-record addresses owned by one engine onto line and retry-bit coordinates.
///
/// The vertex space may be striped across `interleave` engines at atom granularity, starting at
/// `base_addr`; this engine owns every `interleave`-th atom from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrMap {
    pub base_addr: Addr,
    pub atom_size: u64,
    pub interleave: u64,
}

impl AddrMap {
    pub fn new(base_addr: Addr, atom_size: u64, interleave: u64) -> Self {
        assert!(atom_size > 0, "atom_size must be > 0");
        assert!(interleave > 0, "interleave must be > 0");
        assert_eq!(0, base_addr % atom_size, "base_addr must be atom aligned");
        assert_eq!(
            0,
            atom_size % VertexRecord::BYTES as u64,
            "atom must hold whole records"
        );
        Self {
            base_addr,
            atom_size,
            interleave,
        }
    }

    pub fn records_per_line(&self) -> usize {
        (self.atom_size / VertexRecord::BYTES as u64) as usize
    }

    pub fn align(&self, addr: Addr) -> Addr {
        (addr / self.atom_size) * self.atom_size
    }

    pub fn offset(&self, addr: Addr) -> usize {
        ((addr - self.align(addr)) / VertexRecord::BYTES as u64) as usize
    }

    /// First retry bit of the line at `line_addr`.
    pub fn bit_index_base(&self, line_addr: Addr) -> usize {
        assert_eq!(0, line_addr % self.atom_size, "line address {line_addr:#x} not aligned");
        assert!(
            line_addr >= self.base_addr,
            "line address {line_addr:#x} below vertex base {:#x}",
            self.base_addr
        );
        let atom_index = (line_addr - self.base_addr) / (self.atom_size * self.interleave);
        atom_index as usize * self.records_per_line()
    }

    /// Inverse of `bit_index_base` for group-aligned bit indices.
    pub fn line_addr_from_bit_index(&self, index: usize) -> Addr {
        let per_line = self.records_per_line();
        assert_eq!(0, index % per_line, "bit index {index} not group aligned");
        let atom_index = (index / per_line) as u64;
        self.base_addr + atom_index * self.atom_size * self.interleave
    }

    /// Number of retry bits needed to cover the lines this engine owns among `num_vertices`.
    pub fn bits_for_vertices(&self, num_vertices: usize) -> usize {
        let per_line = self.records_per_line();
        let total_atoms = num_vertices.div_ceil(per_line) as u64;
        let owned_atoms = total_atoms.div_ceil(self.interleave);
        owned_atoms as usize * per_line
    }
}
