mod block_range;

pub use block_range::BlockRange;

pub type BlockNumber = i64;

/// Hash for a block on the execution layer.
pub type BlockHash = String;

pub const MERGE_BLOCK_NUMBER: BlockNumber = 15_537_394;
