pub mod coin_snapshot;

pub use coin_snapshot::CoinSnapshot;
