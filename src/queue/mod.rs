pub mod accumulator;
pub mod batch;
pub mod recovery;
pub mod store;
pub mod sweeper;

pub use batch::{Signal, SignalBatch};
pub use store::{QueueStats, QueueStore};
