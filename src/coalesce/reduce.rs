/// Folds a candidate value into the best known value.
///
/// The cache only needs to know whether the result differs from the current best; everything
/// else about the algorithm lives behind this trait.
pub trait Reduce {
    fn reduce(&self, best: u32, candidate: u32) -> u32;
}

/// Keep the minimum, as used by BFS and SSSP.
#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

impl Reduce for Min {
    fn reduce(&self, best: u32, candidate: u32) -> u32 {
        best.min(candidate)
    }
}
