pub mod sequencer;

pub use sequencer::{PairSequencer, UpgradeChain, VersionPair, maintenance_work_mem_directive};
