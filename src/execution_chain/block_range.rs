use std::fmt::{Display, Formatter};

use super::BlockNumber;

/// A range of blocks. The range is inclusive of both the first and last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: BlockNumber,
    pub end: BlockNumber,
}

impl BlockRange {
    pub fn new(first: BlockNumber, last: BlockNumber) -> Self {
        if first > last {
            panic!("tried to create negative block range")
        }

        Self {
            start: first,
            end: last,
        }
    }

    pub fn count(&self) -> i64 {
        self.end - self.start + 1
    }

    /// Splits the range into chunks of at most `size` blocks, highest blocks first.
    pub fn descending_chunks(&self, size: i64) -> Vec<BlockRange> {
        let size = size.max(1);
        let mut chunks = Vec::with_capacity((self.count() / size + 1) as usize);
        let mut high = self.end;
        while high >= self.start {
            let low = (high - size + 1).max(self.start);
            chunks.push(BlockRange {
                start: low,
                end: high,
            });
            high = low - 1;
        }
        chunks
    }
}

impl Display for BlockRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_range_count_test() {
        assert_eq!(BlockRange::new(1, 4).count(), 4);
    }

    #[test]
    #[should_panic]
    fn negative_block_range_test() {
        BlockRange::new(4, 1);
    }

    #[test]
    fn descending_chunks_test() {
        let chunks = BlockRange::new(100, 1000).descending_chunks(360);
        assert_eq!(
            chunks,
            vec![
                BlockRange::new(641, 1000),
                BlockRange::new(281, 640),
                BlockRange::new(100, 280),
            ]
        );
    }

    #[test]
    fn descending_chunks_single_block_test() {
        let chunks = BlockRange::new(7, 7).descending_chunks(360);
        assert_eq!(chunks, vec![BlockRange::new(7, 7)]);
    }
}
