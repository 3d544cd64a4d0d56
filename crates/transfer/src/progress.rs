/// Folds per-chunk progress into one job-level percentage.
///
/// Entries only move forward: an update lower than the stored value is
/// ignored, so a chunk at 100 stays at 100 and the aggregate never drops.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    chunks: Vec<u8>,
}

impl ProgressAggregator {
    /// Creates an aggregator for `count` chunks, all at 0.
    pub fn new(count: usize) -> Self {
        Self {
            chunks: vec![0; count],
        }
    }

    /// Records `pct` for chunk `index` and returns the new aggregate.
    ///
    /// Out-of-range indices are ignored. Values above 100 are clamped.
    pub fn update(&mut self, index: usize, pct: u8) -> u8 {
        if let Some(slot) = self.chunks.get_mut(index) {
            let pct = pct.min(100);
            if pct > *slot {
                *slot = pct;
            }
        }
        self.percent()
    }

    /// Marks chunk `index` complete and returns the new aggregate.
    pub fn complete(&mut self, index: usize) -> u8 {
        self.update(index, 100)
    }

    /// Floor of the arithmetic mean of all chunk values.
    pub fn percent(&self) -> u8 {
        if self.chunks.is_empty() {
            return 0;
        }
        let sum: u64 = self.chunks.iter().map(|&p| u64::from(p)).sum();
        (sum / self.chunks.len() as u64) as u8
    }

    /// Returns `true` exactly when every chunk is at 100.
    pub fn all_done(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|&p| p == 100)
    }

    pub fn chunk(&self, index: usize) -> Option<u8> {
        self.chunks.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
