mod gwei;
mod wei;

pub use gwei::GweiNewtype;

pub use wei::WeiNewtype;

pub const WEI_PER_ETH: i128 = 1_000_000_000_000_000_000;
