pub mod codec;
pub mod error;
pub mod memory;
pub mod queue;
pub mod set;
pub mod sqs;

pub use codec::{decode, decode_batch, encode, publish};
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use queue::{DurableQueue, QueueHealth, QueueMessage};
pub use set::QueueSet;
pub use sqs::SqsQueue;
