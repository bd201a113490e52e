/// One bit per vertex slot owned by the engine: set while a changed value still has to be
/// re-offered to the downstream stage.
#[derive(Debug, Clone)]
pub struct RetryBitVector {
    words: Vec<u64>,
    len: usize,
    set_count: usize,
}

impl RetryBitVector {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
            set_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bits currently set.
    pub fn count(&self) -> usize {
        self.set_count
    }

    pub fn any(&self) -> bool {
        self.set_count > 0
    }

    pub fn get(&self, index: usize) -> bool {
        self.check_bounds(index);
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn set(&mut self, index: usize) {
        if !self.get(index) {
            self.words[index / 64] |= 1 << (index % 64);
            self.set_count += 1;
        }
    }

    pub fn clear(&mut self, index: usize) {
        if self.get(index) {
            self.words[index / 64] &= !(1 << (index % 64));
            self.set_count -= 1;
        }
    }

    /// Bits `start..start + width` packed into the low bits of the result.
    pub fn group(&self, start: usize, width: usize) -> u64 {
        assert!(width <= 64, "group wider than 64 bits");
        (0..width).fold(0u64, |acc, i| acc | ((self.get(start + i) as u64) << i))
    }

    fn check_bounds(&self, index: usize) {
        assert!(
            index < self.len,
            "retry bit {index} out of range for {} vertex slots",
            self.len
        );
    }
}
